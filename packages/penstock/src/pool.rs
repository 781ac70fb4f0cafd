//! Pools of fixed-size memory blocks that back channel buffers.

use std::{
    fmt::{self, Formatter, Debug},
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, OnceLock, PoisonError},
};


/// Default block size in bytes.
pub const BUFFER_SIZE: usize = 4096;

/// Bytes at the end of every block kept as scratch space, so that a primitive which straddles the
/// physical end of a channel's ring can still be encoded or decoded contiguously.
///
/// Channel capacity is the block size minus this. It is at least the width of the widest
/// primitive.
pub const RESERVED_SIZE: usize = 8;

// idle blocks a DefaultPool holds onto before letting recycled blocks drop.
const DEFAULT_MAX_IDLE: usize = 1000;


/// Fixed-size memory block borrowed from a [`BufferPool`].
pub struct Block(Box<[u8]>);

impl Block {
    /// Allocate a zeroed block of the given size.
    pub fn new(size: usize) -> Self {
        Block(vec![0; size].into_boxed_slice())
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Debug for Block {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Block({} bytes)", self.0.len())
    }
}


/// Source of the memory blocks channels buffer into.
///
/// A channel borrows at most one block at a time, and recycles it once it is fully drained or the
/// channel is dropped.
pub trait BufferPool: Send + Sync + 'static {
    /// Size of every block this pool hands out.
    fn block_size(&self) -> usize;

    /// Borrow a block of `block_size` bytes. Its contents are unspecified.
    fn borrow(&self) -> Block;

    /// Return a previously borrowed block.
    fn recycle(&self, block: Block);
}

/// Pool which keeps a bounded free list of idle blocks.
pub struct DefaultPool {
    block_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Block>>,
}

impl DefaultPool {
    /// Construct with the given block size and maximum number of idle blocks retained.
    ///
    /// Panics if `block_size` leaves room for fewer than `RESERVED_SIZE` usable bytes.
    pub fn new(block_size: usize, max_idle: usize) -> Self {
        assert!(
            block_size >= 2 * RESERVED_SIZE,
            "block size {} too small, must be at least {}", block_size, 2 * RESERVED_SIZE,
        );
        DefaultPool {
            block_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Process-wide pool of [`BUFFER_SIZE`] blocks, used by channels unless configured otherwise.
    pub fn shared() -> Arc<DefaultPool> {
        static SHARED: OnceLock<Arc<DefaultPool>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(DefaultPool::new(BUFFER_SIZE, DEFAULT_MAX_IDLE))))
    }

    /// Number of idle blocks currently held.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl BufferPool for DefaultPool {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn borrow(&self) -> Block {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        idle.unwrap_or_else(|| Block::new(self.block_size))
    }

    fn recycle(&self, block: Block) {
        if block.len() != self.block_size {
            debug!(size = block.len(), expected = self.block_size, "dropping foreign block");
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(block);
        }
    }
}

impl Debug for DefaultPool {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("DefaultPool")
            .field("block_size", &self.block_size)
            .field("max_idle", &self.max_idle)
            .field("idle", &self.idle())
            .finish()
    }
}

/// Pool which allocates every block fresh and drops recycled blocks.
#[derive(Debug, Copy, Clone)]
pub struct NoPool {
    block_size: usize,
}

impl NoPool {
    /// Construct with the given block size.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size >= 2 * RESERVED_SIZE, "block size {} too small", block_size);
        NoPool { block_size }
    }
}

impl Default for NoPool {
    fn default() -> Self {
        NoPool::new(BUFFER_SIZE)
    }
}

impl BufferPool for NoPool {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn borrow(&self) -> Block {
        Block::new(self.block_size)
    }

    fn recycle(&self, _block: Block) {}
}


// pool which counts borrows and recycles, so tests can check every block comes back.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct VerifyingPool {
    borrowed: std::sync::atomic::AtomicUsize,
    recycled: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl VerifyingPool {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // blocks borrowed and not yet recycled.
    pub(crate) fn outstanding(&self) -> usize {
        use std::sync::atomic::Ordering::SeqCst;
        self.borrowed.load(SeqCst) - self.recycled.load(SeqCst)
    }

    pub(crate) fn borrowed(&self) -> usize {
        self.borrowed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl BufferPool for VerifyingPool {
    fn block_size(&self) -> usize {
        BUFFER_SIZE
    }

    fn borrow(&self) -> Block {
        self.borrowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Block::new(BUFFER_SIZE)
    }

    fn recycle(&self, block: Block) {
        assert_eq!(block.len(), BUFFER_SIZE, "foreign block recycled");
        self.recycled.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
