// exposed API of byte channels

use super::{
    core::{self, CloseState, ReadClaim, WriteOp},
    error::*,
    view::{ReadView, WriteView},
};
use crate::{
    config::ChannelConfig,
    pool::RESERVED_SIZE,
};
use bytes::{Buf, BufMut, BytesMut};
use penstock_packet::{ByteOrder, Packet, Primitive};
use std::fmt::{self, Formatter, Debug};


// ==== helper functions ====


// write all of `src` through an already-claimed write side, suspending as needed.
async fn write_all(op: &mut WriteOp, mut src: &[u8]) -> Result<(), WriteError> {
    while !src.is_empty() {
        let n = op.step(1, |ring| ring.write(src)).await?;
        src = &src[n..];
    }
    Ok(())
}

// read one line through an already-claimed read side.
//
// returns the raw bytes without the terminator, or none if the stream ended with nothing read.
async fn read_line(claim: &mut ReadClaim) -> Result<Option<Vec<u8>>, ReadError> {
    let mut line = Vec::new();
    loop {
        match claim.read(1, |ring, _| ring.read_until(b'\n', &mut line)).await {
            Ok(true) => break,
            Ok(false) => (),
            Err(ReadError::EndOfStream(_)) if !line.is_empty() => return Ok(Some(line)),
            Err(ReadError::EndOfStream(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

// treat end of stream as the "no more data" sentinel.
fn end_as_none<T>(result: Result<T, ReadError>) -> Result<Option<T>, ReadError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ReadError::EndOfStream(_)) => Ok(None),
        Err(e) => Err(e),
    }
}


// ==== the exposed API ====


/// Asynchronous single-producer single-consumer byte channel
///
/// Bytes are buffered in a fixed-capacity ring over one block borrowed from a
/// [`BufferPool`](crate::BufferPool). Writes that find the ring full, and reads that find too few
/// bytes, suspend until the other side makes progress or the channel closes.
///
/// Written bytes are staged until [`flush`](Self::flush) publishes them to the reader, unless the
/// channel auto-flushes. A writer that must suspend for space publishes its staged bytes first.
///
/// At most one read and one write may be outstanding at a time. Starting a second read while one
/// is outstanding fails immediately with [`ConcurrentAccessError`], as does a second write.
/// Dropping a suspended read or write future abandons it cleanly.
///
/// Handles are cheap to clone and all refer to the same channel.
#[derive(Clone)]
pub struct ByteChannel(pub(crate) core::Channel);

macro_rules! typed_io {
    ($($t:ty => $write:ident, $read:ident;)*)=>{$(
        #[doc = concat!("Write a `", stringify!($t), "` in the current write byte order.")]
        pub async fn $write(&self, value: $t) -> Result<(), WriteError> {
            self.write_primitive(value).await
        }

        #[doc = concat!("Read a `", stringify!($t), "` in the current read byte order.")]
        pub async fn $read(&self) -> Result<$t, ReadError> {
            self.read_primitive().await
        }
    )*};
}

impl ByteChannel {
    /// Construct with the default configuration, optionally auto-flushing.
    pub fn new(auto_flush: bool) -> Self {
        Self::with_config(ChannelConfig::default().with_auto_flush(auto_flush))
    }

    /// Construct with the given configuration.
    pub fn with_config(config: ChannelConfig) -> Self {
        ByteChannel(core::Channel::new(&config))
    }

    /// Whether every write is published immediately.
    pub fn auto_flush(&self) -> bool {
        self.0.auto_flush()
    }

    /// Usable buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.0.lock().ring.capacity()
    }

    /// Published bytes which may be read without suspending.
    pub fn available_for_read(&self) -> usize {
        self.0.lock().ring.available_for_read()
    }

    /// Space which may be written without suspending.
    pub fn available_for_write(&self) -> usize {
        self.0.lock().ring.available_for_write()
    }

    /// Whether reads can never again succeed: the channel was closed with a cause, or closed
    /// cleanly and fully drained.
    pub fn is_closed_for_read(&self) -> bool {
        let lock = self.0.lock();
        match lock.state {
            CloseState::Open => false,
            CloseState::Finished => lock.ring.available_for_read() == 0,
            CloseState::Failed(_) => true,
        }
    }

    /// Whether the channel was closed, so writes fail.
    pub fn is_closed_for_write(&self) -> bool {
        !matches!(self.0.lock().state, CloseState::Open)
    }

    /// The cause the channel was closed with, if it was closed with one.
    pub fn closed_cause(&self) -> Option<Cause> {
        self.0.lock().closed_cause().cloned()
    }

    /// Total bytes read from the channel so far.
    pub fn total_bytes_read(&self) -> u64 {
        self.0.lock().ring.total_read()
    }

    /// Total bytes written into this channel's own buffer so far.
    ///
    /// Bytes a join redirected into its destination count towards the destination instead.
    pub fn total_bytes_written(&self) -> u64 {
        self.0.lock().ring.total_written()
    }

    /// Byte order used by typed reads.
    pub fn read_byte_order(&self) -> ByteOrder {
        self.0.lock().read_order
    }

    /// Set the byte order used by subsequent typed reads.
    pub fn set_read_byte_order(&self, byte_order: ByteOrder) {
        self.0.lock().read_order = byte_order;
    }

    /// Byte order used by typed writes.
    pub fn write_byte_order(&self) -> ByteOrder {
        self.0.lock().write_order
    }

    /// Set the byte order used by subsequent typed writes.
    pub fn set_write_byte_order(&self, byte_order: ByteOrder) {
        self.0.lock().write_order = byte_order;
    }

    /// Publish all staged bytes to the reader. No-op if nothing is staged.
    pub fn flush(&self) {
        self.0.flush();
    }

    /// Close the channel cleanly.
    ///
    /// Staged bytes are published and remain readable. Subsequent writes fail with
    /// [`ClosedForWriteError`], and reads fail with [`EndOfStreamError`] once the channel is
    /// drained. Returns false if the channel was already closed.
    pub fn close(&self) -> bool {
        self.0.close(None)
    }

    /// Close the channel with a failure cause.
    ///
    /// Buffered bytes are discarded. All pending and subsequent reads and writes fail with
    /// [`ClosedError`] carrying the cause. A task spawned with [`writer`](crate::writer) or
    /// [`reader`](crate::reader) for this channel is aborted. Returns false if the channel was
    /// already closed.
    pub fn close_with_cause(&self, cause: impl Into<anyhow::Error>) -> bool {
        self.0.close(Some(Cause::new(cause)))
    }

    /// Close the channel with [`CancelledError`] as the cause.
    pub fn cancel(&self) -> bool {
        self.close_with_cause(CancelledError)
    }


    // ==== typed I/O ====


    /// Write a primitive in the current write byte order.
    ///
    /// The value is written atomically, even if it straddles the physical end of the buffer.
    pub async fn write_primitive<P: Primitive>(&self, value: P) -> Result<(), WriteError> {
        let repr = value.encode(self.write_byte_order());
        let mut op = WriteOp::new(&self.0)?;
        op.step(P::SIZE, |ring| ring.write_atomic(repr.as_ref())).await
    }

    /// Read a primitive in the current read byte order.
    ///
    /// If the channel was closed cleanly with fewer than the primitive's width of bytes left, fails
    /// with [`TruncatedError`] and leaves those bytes readable.
    pub async fn read_primitive<P: Primitive>(&self) -> Result<P, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        claim.read(P::SIZE, |ring, order| {
            let mut repr = P::Repr::default();
            ring.read_atomic(repr.as_mut());
            P::decode(repr, order)
        }).await
    }

    typed_io!(
        u8 => write_u8, read_u8;
        i8 => write_i8, read_i8;
        u16 => write_u16, read_u16;
        i16 => write_i16, read_i16;
        u32 => write_u32, read_u32;
        i32 => write_i32, read_i32;
        u64 => write_u64, read_u64;
        i64 => write_i64, read_i64;
        f32 => write_f32, read_f32;
        f64 => write_f64, read_f64;
    );

    /// Write a boolean as a single `0` or `1` byte.
    pub async fn write_bool(&self, value: bool) -> Result<(), WriteError> {
        self.write_u8(value as u8).await
    }

    /// Read a single byte as a boolean. Any non-zero byte is `true`.
    pub async fn read_bool(&self) -> Result<bool, ReadError> {
        Ok(self.read_u8().await? != 0)
    }


    // ==== bulk I/O ====


    /// Write all of `src`, suspending as many times as necessary.
    pub async fn write_fully(&self, src: &[u8]) -> Result<(), WriteError> {
        let mut op = WriteOp::new(&self.0)?;
        write_all(&mut op, src).await
    }

    /// Write as much of `src` as fits, suspending only if there is no space at all. Returns how
    /// many bytes were written.
    pub async fn write_available(&self, src: &[u8]) -> Result<usize, WriteError> {
        let mut op = WriteOp::new(&self.0)?;
        if src.is_empty() {
            return Ok(0);
        }
        op.step(1, |ring| ring.write(src)).await
    }

    /// Write all remaining bytes of `buf`, advancing it as they are written.
    pub async fn write_buf<B: Buf>(&self, mut buf: B) -> Result<(), WriteError> {
        let mut op = WriteOp::new(&self.0)?;
        while buf.has_remaining() {
            let n = op.step(1, |ring| ring.write(buf.chunk())).await?;
            buf.advance(n);
        }
        Ok(())
    }

    /// Write all bytes of a packet, exactly as its producer emitted them.
    pub async fn write_packet(&self, packet: Packet) -> Result<(), WriteError> {
        let mut op = WriteOp::new(&self.0)?;
        for fragment in packet.fragments() {
            write_all(&mut op, &fragment).await?;
        }
        Ok(())
    }

    /// Write the UTF-8 encoding of `text`.
    pub async fn write_str_utf8(&self, text: &str) -> Result<(), WriteError> {
        self.write_fully(text.as_bytes()).await
    }

    /// Write the UTF-8 encoding of a sequence of characters, encoding them on the fly.
    pub async fn write_chars_utf8<I>(&self, chars: I) -> Result<(), WriteError>
    where
        I: IntoIterator<Item = char>,
    {
        let mut op = WriteOp::new(&self.0)?;
        let mut buf = [0; 256];
        let mut len = 0;
        for c in chars {
            if buf.len() - len < c.len_utf8() {
                write_all(&mut op, &buf[..len]).await?;
                len = 0;
            }
            len += c.encode_utf8(&mut buf[len..]).len();
        }
        write_all(&mut op, &buf[..len]).await
    }

    /// Fill all of `dst`, suspending as many times as necessary.
    ///
    /// If the channel closes cleanly before `dst` is filled, fails with [`TruncatedError`] if some
    /// bytes were read, or [`EndOfStreamError`] if none were.
    pub async fn read_fully(&self, dst: &mut [u8]) -> Result<(), ReadError> {
        let requested = dst.len();
        let mut claim = ReadClaim::new(&self.0)?;
        let mut filled = 0;
        while filled < requested {
            let rest = &mut dst[filled..];
            match claim.read(1, |ring, _| ring.read(rest)).await {
                Ok(n) => filled += n,
                Err(ReadError::EndOfStream(_)) if filled > 0 => {
                    return Err(TruncatedError { available: filled, requested }.into());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read as many bytes as are available into `dst`, suspending only if none are. Returns how
    /// many bytes were read, or `None` if the channel was closed cleanly and is drained.
    pub async fn read_available(&self, dst: &mut [u8]) -> Result<Option<usize>, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        if dst.is_empty() {
            return Ok(Some(0));
        }
        end_as_none(claim.read(1, |ring, _| ring.read(dst)).await)
    }

    /// Read as many bytes as are available into `buf`, suspending only if none are. Returns how
    /// many bytes were read, or `None` if the channel was closed cleanly and is drained.
    pub async fn read_available_buf<B: BufMut>(
        &self,
        buf: &mut B,
    ) -> Result<Option<usize>, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        if !buf.has_remaining_mut() {
            return Ok(Some(0));
        }
        end_as_none(claim.read(1, |ring, _| ring.read_buf(buf)).await)
    }

    /// Read exactly `len` bytes as a packet, which decodes with the current read byte order.
    pub async fn read_packet(&self, len: usize) -> Result<Packet, ReadError> {
        let mut buf = BytesMut::zeroed(len);
        self.read_fully(&mut buf).await?;
        Ok(Packet::from(buf.freeze()).with_byte_order(self.read_byte_order()))
    }

    /// Read a line of ASCII text, without its `\n` or `\r\n` terminator.
    ///
    /// A final line without a terminator is returned at end of stream. Returns `None` once the
    /// channel is closed cleanly and drained. Fails with [`MalformedTextError`] on non-ASCII bytes.
    pub async fn read_ascii_line(&self) -> Result<Option<String>, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        let Some(line) = read_line(&mut claim).await? else {
            return Ok(None);
        };
        if !line.is_ascii() {
            return Err(MalformedTextError.into());
        }
        String::from_utf8(line).map(Some).map_err(|_| MalformedTextError.into())
    }

    /// Read a line of UTF-8 text, without its `\n` or `\r\n` terminator.
    ///
    /// A final line without a terminator is returned at end of stream. Returns `None` once the
    /// channel is closed cleanly and drained.
    pub async fn read_utf8_line(&self) -> Result<Option<String>, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        match read_line(&mut claim).await? {
            Some(line) => String::from_utf8(line).map(Some).map_err(|_| MalformedTextError.into()),
            None => Ok(None),
        }
    }

    /// Skip up to `max` bytes, suspending until that many were skipped or the channel is drained.
    /// Returns how many bytes were skipped.
    pub async fn discard(&self, max: u64) -> Result<u64, ReadError> {
        let mut claim = ReadClaim::new(&self.0)?;
        let mut skipped = 0;
        while skipped < max {
            let want = usize::try_from(max - skipped).unwrap_or(usize::MAX);
            match claim.read(1, |ring, _| ring.skip(want)).await {
                Ok(n) => skipped += n as u64,
                Err(ReadError::EndOfStream(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(skipped)
    }


    // ==== zero-copy I/O ====


    /// Run `f` on a direct view of at least `min` contiguous readable bytes, suspending until
    /// that many are available. With `min` of zero, suspends until any byte is available.
    ///
    /// Bytes `f` advances the view past are consumed. Returns `None` if the channel was closed
    /// cleanly and is drained.
    ///
    /// `f` runs while the channel is locked and must not use the channel. Panics if `min`
    /// exceeds [`RESERVED_SIZE`].
    pub async fn read<R>(
        &self,
        min: usize,
        f: impl FnOnce(&mut ReadView<'_>) -> R,
    ) -> Result<Option<R>, ReadError> {
        assert!(min <= RESERVED_SIZE, "zero-copy read minimum {} exceeds {}", min, RESERVED_SIZE);
        let mut claim = ReadClaim::new(&self.0)?;
        end_as_none(claim.read(min.max(1), |ring, _| {
            let mut view = ReadView::new(ring.readable(min));
            let result = f(&mut view);
            let consumed = view.consumed();
            ring.consume(consumed);
            result
        }).await)
    }

    /// Run `f` on a direct view of at least `min` contiguous bytes of writable space, suspending
    /// until that much space is available. With `min` of zero, suspends until any space is.
    ///
    /// Bytes `f` writes to the view are committed.
    ///
    /// `f` runs while the channel is locked and must not use the channel. Panics if `min`
    /// exceeds [`RESERVED_SIZE`].
    pub async fn write<R>(
        &self,
        min: usize,
        f: impl FnOnce(&mut WriteView<'_>) -> R,
    ) -> Result<R, WriteError> {
        assert!(min <= RESERVED_SIZE, "zero-copy write minimum {} exceeds {}", min, RESERVED_SIZE);
        let mut op = WriteOp::new(&self.0)?;
        op.step(min.max(1), |ring| {
            let mut view = WriteView::new(ring.writable(min));
            let result = f(&mut view);
            let written = view.written();
            ring.commit(written);
            result
        }).await
    }
}

impl Debug for ByteChannel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let lock = self.0.lock();
        let state = match &lock.state {
            CloseState::Open => "open",
            CloseState::Finished => "finished",
            CloseState::Failed(_) => "failed",
        };
        f.debug_struct("ByteChannel")
            .field("id", &self.0.id())
            .field("state", &state)
            .field("available_for_read", &lock.ring.available_for_read())
            .field("staged", &lock.ring.staged())
            .finish()
    }
}
