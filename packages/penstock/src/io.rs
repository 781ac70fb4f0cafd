//! Adapters to the `futures` I/O traits.

use crate::{
    channel::{
        core::{ReadClaim, WriteOp},
        ring::Ring,
    },
    error::*,
    ByteChannel,
};
use futures::io::{AsyncRead, AsyncWrite};
use penstock_packet::ByteOrder;
use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};


/// [`AsyncRead`] over a channel, holding its read side for as long as it lives
///
/// Reads resolve to zero bytes once the channel was closed cleanly and is drained.
pub struct ChannelReader {
    claim: ReadClaim,
}

/// [`AsyncWrite`] over a channel, holding its write side for as long as it lives
///
/// Flushing publishes staged bytes, and closing closes the channel cleanly.
pub struct ChannelWriter {
    op: WriteOp,
}

impl ByteChannel {
    /// Claim the read side of the channel as an [`AsyncRead`].
    ///
    /// Fails if a read is outstanding. Other reads fail while the adapter is alive.
    pub fn async_reader(&self) -> Result<ChannelReader, ConcurrentAccessError> {
        Ok(ChannelReader { claim: ReadClaim::new(&self.0)? })
    }

    /// Claim the write side of the channel as an [`AsyncWrite`].
    ///
    /// Fails if a write is outstanding. Other writes fail while the adapter is alive.
    pub fn async_writer(&self) -> Result<ChannelWriter, ConcurrentAccessError> {
        Ok(ChannelWriter { op: WriteOp::new(&self.0)? })
    }
}

impl ChannelReader {
    /// The channel being read.
    pub fn channel(&self) -> ByteChannel {
        ByteChannel(self.claim.channel().clone())
    }
}

impl ChannelWriter {
    /// The channel being written.
    pub fn channel(&self) -> ByteChannel {
        ByteChannel(self.op.channel().clone())
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut op = Some(|ring: &mut Ring, _: ByteOrder| ring.read(buf));
        match ready!(self.get_mut().claim.poll_read(cx, 1, &mut op)) {
            Ok(n) => Poll::Ready(Ok(n)),
            Err(ReadError::EndOfStream(_)) => Poll::Ready(Ok(0)),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut op = Some(|ring: &mut Ring| ring.write(buf));
        self.get_mut().op.poll_step(cx, 1, &mut op).map_err(io::Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        self.op.channel().flush();
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context) -> Poll<io::Result<()>> {
        self.op.channel().close(None);
        Poll::Ready(Ok(()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelConfig;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn copy_through_adapters() {
        let channel = ByteChannel::new(false);
        let mut writer = channel.async_writer().unwrap();
        let mut reader = channel.async_reader().unwrap();
        assert!(channel.write_u8(0).await.unwrap_err().to_string().contains("concurrent"));

        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let send = {
            let data = data.clone();
            tokio::spawn(async move {
                writer.write_all(&data).await.unwrap();
                writer.close().await.unwrap();
            })
        };
        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        send.await.unwrap();
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn failure_surfaces_as_io_error() {
        let channel = ByteChannel::with_config(ChannelConfig::default().with_auto_flush(true));
        let mut reader = channel.async_reader().unwrap();
        channel.close_with_cause(anyhow::anyhow!("upstream broke"));
        let mut buf = [0; 4];
        let e = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }
}
