//! Asynchronous single-producer single-consumer byte channels.
//!
//! A [`ByteChannel`] buffers bytes in a fixed-capacity ring over a block borrowed from a
//! [`BufferPool`]. Typed reads and writes of primitives honor a configurable [`ByteOrder`] and are
//! atomic even where a value straddles the physical end of the ring. One channel can be joined
//! into another, after which its writes flow into the destination directly.
//!
//! Channels are runtime-agnostic: operations are plain futures. Tasks producing into or
//! consuming from a channel can be spawned on tokio with [`writer`] and [`reader`], and blocking
//! code can drive operations with the [`blocking`] module.

#[macro_use]
extern crate tracing;

pub extern crate bytes;

mod channel;
mod config;
mod pool;
mod task;
#[cfg(feature = "futures")]
mod io;
pub mod blocking;

pub use crate::{
    channel::{
        api::ByteChannel,
        view::{ReadView, WriteView},
    },
    config::ChannelConfig,
    pool::{Block, BufferPool, DefaultPool, NoPool, BUFFER_SIZE, RESERVED_SIZE},
    task::{reader, writer, ChannelJob},
};
#[cfg(feature = "futures")]
pub use crate::io::{ChannelReader, ChannelWriter};
pub use penstock_packet::{ByteOrder, Packet, PacketBuilder, Primitive};

/// Error types
pub mod error {
    pub use crate::channel::error::*;
}
