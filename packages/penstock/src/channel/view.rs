// zero-copy views handed to `ByteChannel::read` and `ByteChannel::write` callbacks.

use bytes::{buf::UninitSlice, Buf, BufMut};


/// Direct view over contiguous readable bytes of a channel
///
/// Bytes the view is advanced past are consumed from the channel once the callback returns. Bytes
/// left unconsumed remain readable.
#[derive(Debug)]
pub struct ReadView<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        ReadView { buf, pos: 0 }
    }

    /// Unconsumed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

impl Buf for ReadView<'_> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        self.as_slice()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.remaining(), "advanced past end of read view");
        self.pos += cnt;
    }
}

/// Direct view over contiguous writable space of a channel
///
/// Bytes written to the view are committed to the channel once the callback returns.
#[derive(Debug)]
pub struct WriteView<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteView<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        WriteView { buf, pos: 0 }
    }

    /// Space not yet written. Contents are unspecified.
    ///
    /// Call [`advance`](Self::advance) after filling a prefix of it.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buf[self.pos..]
    }

    /// Mark the next `n` bytes of [`unfilled`](Self::unfilled) as written.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.buf.len() - self.pos, "advanced past end of write view");
        self.pos += n;
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }
}

// safety: the view is backed by initialized memory, and advance_mut is bounds checked.
unsafe impl BufMut for WriteView<'_> {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.pos
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        self.advance(cnt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(self.unfilled())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_track_position() {
        let data = *b"hello";
        let mut read = ReadView::new(&data);
        assert_eq!(read.get_u8(), b'h');
        read.advance(2);
        assert_eq!(read.as_slice(), b"lo");
        assert_eq!(read.consumed(), 3);

        let mut space = [0; 6];
        let mut write = WriteView::new(&mut space);
        write.put_u16(0x0102);
        write.unfilled()[0] = 9;
        write.advance(1);
        assert_eq!(write.written(), 3);
        assert_eq!(write.remaining_mut(), 3);
        assert_eq!(&space[..3], &[1, 2, 9]);
    }
}
