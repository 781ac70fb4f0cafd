// ring buffer over a single pooled block.
//
// memory layout of the borrowed block:
//
//     [0, capacity)                          ring storage, addressed by logical position % capacity
//     [capacity, capacity + RESERVED_SIZE)   scratch tail
//
// the scratch tail lets a span which straddles the physical end of the ring be viewed or
// assembled contiguously. on the write side, a value is written past the end into the tail and
// the overflow is then copied to the head in one move. on the read side, the head is mirrored into
// the tail before the contiguous span is read.

use crate::pool::{Block, BufferPool, RESERVED_SIZE};
use bytes::BufMut;
use std::sync::Arc;


pub(crate) struct Ring {
    pool: Arc<dyn BufferPool>,
    // borrowed lazily on first write, released whenever the ring becomes empty.
    block: Option<Block>,
    capacity: usize,
    // logical positions.
    //
    // invariant: read_pos <= flushed_pos <= write_pos <= read_pos + capacity
    read_pos: u64,
    flushed_pos: u64,
    write_pos: u64,
}

impl Ring {
    pub(crate) fn new(pool: Arc<dyn BufferPool>) -> Self {
        let block_size = pool.block_size();
        assert!(block_size >= 2 * RESERVED_SIZE, "pool block size {} too small", block_size);
        Ring {
            pool,
            block: None,
            capacity: block_size - RESERVED_SIZE,
            read_pos: 0,
            flushed_pos: 0,
            write_pos: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    // published bytes not yet read.
    pub(crate) fn available_for_read(&self) -> usize {
        (self.flushed_pos - self.read_pos) as usize
    }

    // bytes written but not yet published.
    pub(crate) fn staged(&self) -> usize {
        (self.write_pos - self.flushed_pos) as usize
    }

    pub(crate) fn available_for_write(&self) -> usize {
        self.capacity - (self.write_pos - self.read_pos) as usize
    }

    // nothing readable and nothing staged.
    pub(crate) fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub(crate) fn total_read(&self) -> u64 {
        self.read_pos
    }

    pub(crate) fn total_written(&self) -> u64 {
        self.write_pos
    }

    pub(crate) fn has_block(&self) -> bool {
        self.block.is_some()
    }

    // publish staged bytes. returns how many were published.
    pub(crate) fn flush(&mut self) -> usize {
        let n = self.staged();
        self.flushed_pos = self.write_pos;
        n
    }

    // drop all buffered bytes, published or not. returns how many were dropped.
    pub(crate) fn discard(&mut self) -> usize {
        let n = (self.write_pos - self.read_pos) as usize;
        self.read_pos = self.write_pos;
        self.flushed_pos = self.write_pos;
        self.release_if_empty();
        n
    }

    // return the block to the pool if nothing is buffered.
    pub(crate) fn release_if_empty(&mut self) {
        if self.is_empty() {
            if let Some(block) = self.block.take() {
                trace!("recycling ring block");
                self.pool.recycle(block);
            }
        }
    }

    fn offset(&self, pos: u64) -> usize {
        (pos % self.capacity as u64) as usize
    }

    fn block(&mut self) -> &mut Block {
        self.block.get_or_insert_with(|| {
            trace!("borrowing ring block");
            self.pool.borrow()
        })
    }

    // readable bytes as at most two linear segments, in order.
    pub(crate) fn segments(&self) -> (&[u8], &[u8]) {
        let n = self.available_for_read();
        let Some(block) = self.block.as_ref().filter(|_| n > 0) else {
            return (&[], &[]);
        };
        let start = self.offset(self.read_pos);
        let first = n.min(self.capacity - start);
        (&block[start..start + first], &block[..n - first])
    }

    // copy in as much of `src` as fits. returns how many bytes were copied.
    pub(crate) fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.available_for_write());
        if n == 0 {
            return 0;
        }
        let cap = self.capacity;
        let start = self.offset(self.write_pos);
        let first = n.min(cap - start);
        let block = self.block();
        block[start..start + first].copy_from_slice(&src[..first]);
        block[..n - first].copy_from_slice(&src[first..n]);
        self.write_pos += n as u64;
        n
    }

    // copy out as many readable bytes as fit in `dst`. returns how many bytes were copied.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let (a, b) = self.segments();
        let first = a.len().min(dst.len());
        let second = b.len().min(dst.len() - first);
        dst[..first].copy_from_slice(&a[..first]);
        dst[first..first + second].copy_from_slice(&b[..second]);
        let n = first + second;
        self.read_pos += n as u64;
        n
    }

    // copy out as many readable bytes as `dst` has room for. returns how many bytes were copied.
    pub(crate) fn read_buf<B: BufMut>(&mut self, dst: &mut B) -> usize {
        let (a, b) = self.segments();
        let first = a.len().min(dst.remaining_mut());
        dst.put_slice(&a[..first]);
        let second = b.len().min(dst.remaining_mut());
        dst.put_slice(&b[..second]);
        let n = first + second;
        self.read_pos += n as u64;
        n
    }

    // consume readable bytes up to and including the first `delim`, appending them to `out`.
    // returns whether `delim` was found.
    pub(crate) fn read_until(&mut self, delim: u8, out: &mut Vec<u8>) -> bool {
        let (a, b) = self.segments();
        let mut n = 0;
        let mut found = false;
        for seg in [a, b] {
            match seg.iter().position(|&byte| byte == delim) {
                Some(i) => {
                    out.extend_from_slice(&seg[..=i]);
                    n += i + 1;
                    found = true;
                    break;
                }
                None => {
                    out.extend_from_slice(seg);
                    n += seg.len();
                }
            }
        }
        self.read_pos += n as u64;
        found
    }

    // consume up to `n` readable bytes without copying them. returns how many were consumed.
    pub(crate) fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.available_for_read());
        self.read_pos += n as u64;
        n
    }

    // write `src` as a single contiguous value, staging a straddling value in the scratch tail.
    //
    // caller guarantees src.len() <= RESERVED_SIZE and src.len() <= available_for_write().
    pub(crate) fn write_atomic(&mut self, src: &[u8]) {
        let n = src.len();
        debug_assert!(n <= RESERVED_SIZE && n <= self.available_for_write());
        let cap = self.capacity;
        let start = self.offset(self.write_pos);
        let block = self.block();
        block[start..start + n].copy_from_slice(src);
        if start + n > cap {
            // wrap the overflow to the head in one move
            block.copy_within(cap..start + n, 0);
        }
        self.write_pos += n as u64;
    }

    // read exactly `dst.len()` bytes as a single contiguous value.
    //
    // caller guarantees dst.len() <= RESERVED_SIZE and dst.len() <= available_for_read().
    pub(crate) fn read_atomic(&mut self, dst: &mut [u8]) {
        let n = dst.len();
        debug_assert!(n <= RESERVED_SIZE && n <= self.available_for_read());
        let readable = self.readable(n);
        dst.copy_from_slice(&readable[..n]);
        self.read_pos += n as u64;
    }

    // contiguous readable bytes starting at the read position, at least `min` long if that many
    // are available. the head is mirrored into the scratch tail as needed.
    //
    // caller guarantees min <= RESERVED_SIZE. pair with `consume`.
    pub(crate) fn readable(&mut self, min: usize) -> &[u8] {
        debug_assert!(min <= RESERVED_SIZE);
        let avail = self.available_for_read();
        if avail == 0 {
            return &[];
        }
        let cap = self.capacity;
        let start = self.offset(self.read_pos);
        let run = avail.min(cap - start);
        let mut len = run;
        let block = self.block();
        if run < min {
            let extra = (avail - run).min(RESERVED_SIZE);
            block.copy_within(0..extra, cap);
            len += extra;
        }
        &block[start..start + len]
    }

    // mark `n` readable bytes consumed.
    pub(crate) fn consume(&mut self, n: usize) {
        assert!(n <= self.available_for_read(), "consumed more bytes than were readable");
        self.read_pos += n as u64;
    }

    // contiguous writable space starting at the write position, at least `min` long if that much
    // space is available. may extend into the scratch tail.
    //
    // caller guarantees min <= RESERVED_SIZE. pair with `commit`.
    pub(crate) fn writable(&mut self, min: usize) -> &mut [u8] {
        debug_assert!(min <= RESERVED_SIZE);
        let space = self.available_for_write();
        let cap = self.capacity;
        let start = self.offset(self.write_pos);
        let run = space.min(cap - start);
        let len = if run < min {
            space.min(cap + RESERVED_SIZE - start)
        } else {
            run
        };
        &mut self.block()[start..start + len]
    }

    // mark `n` bytes of space returned by `writable` as written.
    pub(crate) fn commit(&mut self, n: usize) {
        assert!(n <= self.available_for_write(), "committed more bytes than were writable");
        let cap = self.capacity;
        let start = self.offset(self.write_pos);
        if start + n > cap {
            self.block().copy_within(cap..start + n, 0);
        }
        self.write_pos += n as u64;
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.recycle(block);
        }
    }
}
