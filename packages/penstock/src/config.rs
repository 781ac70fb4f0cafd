//! Channel configuration.

use crate::pool::{BufferPool, DefaultPool};
use penstock_packet::ByteOrder;
use std::{
    fmt::{self, Formatter, Debug},
    sync::Arc,
};


/// Configuration for constructing a [`ByteChannel`](crate::ByteChannel)
///
/// The default configuration does not auto-flush, buffers into blocks from the process-wide
/// [`DefaultPool`], and reads and writes big-endian.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Whether every write is published immediately, as if followed by a flush
    pub auto_flush: bool,
    /// Pool the channel's buffer block is borrowed from
    pub pool: Arc<dyn BufferPool>,
    /// Initial byte order for typed reads
    pub read_byte_order: ByteOrder,
    /// Initial byte order for typed writes
    pub write_byte_order: ByteOrder,
}

impl ChannelConfig {
    /// Set whether every write is published immediately.
    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Set the pool the buffer block is borrowed from.
    pub fn with_pool(mut self, pool: Arc<dyn BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Set the initial byte order for both typed reads and typed writes.
    pub fn with_byte_order(self, byte_order: ByteOrder) -> Self {
        self.with_read_byte_order(byte_order).with_write_byte_order(byte_order)
    }

    /// Set the initial byte order for typed reads.
    pub fn with_read_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.read_byte_order = byte_order;
        self
    }

    /// Set the initial byte order for typed writes.
    pub fn with_write_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.write_byte_order = byte_order;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            auto_flush: false,
            pool: DefaultPool::shared(),
            read_byte_order: ByteOrder::default(),
            write_byte_order: ByteOrder::default(),
        }
    }
}

impl Debug for ChannelConfig {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("auto_flush", &self.auto_flush)
            .field("block_size", &self.pool.block_size())
            .field("read_byte_order", &self.read_byte_order)
            .field("write_byte_order", &self.write_byte_order)
            .finish()
    }
}
