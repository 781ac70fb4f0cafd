// minimal safe API for the channel. the exposed API is a convenience wrapper around this.
//
// all state lives behind one mutex. an operation first claims its side of the channel, which is
// how concurrent second readers or writers are rejected, then polls the lockable state. a claim
// owns its side's waiter slot and clears it when dropped, so abandoning a suspended operation
// never leaves a phantom waiter behind.

use super::{
    error::*,
    ring::Ring,
};
use crate::config::ChannelConfig;
use penstock_packet::ByteOrder;
use smallvec::SmallVec;
use std::{
    future::poll_fn,
    mem::replace,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    task::{Context, Poll, Waker},
};
use tokio::task::AbortHandle;


// source of channel ids, used only to tell channels apart in logs.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);


// handle to a channel.
#[derive(Clone)]
pub(crate) struct Channel(Arc<Shared>);

// channel shared state.
struct Shared {
    id: u64,
    // publish after every write.
    auto_flush: bool,
    // mutex around lockable state.
    lockable: Mutex<Lockable>,
}

// channel lockable state.
pub(crate) struct Lockable {
    pub(crate) ring: Ring,
    pub(crate) read_order: ByteOrder,
    pub(crate) write_order: ByteOrder,
    // begins open. once changed, never changes again.
    pub(crate) state: CloseState,
    pub(crate) join: JoinState,
    reader: Slot,
    writer: Slot,
    // task producing or consuming this channel, aborted if the channel is closed with a cause.
    task: Option<AbortHandle>,
}

pub(crate) enum CloseState {
    Open,
    // closed without error. reads drain what remains.
    Finished,
    // closed with error. buffered bytes have been discarded.
    Failed(Cause),
}

// splice state of a channel as a join source.
pub(crate) enum JoinState {
    Idle,
    // a join is forwarding this channel into dst.
    //
    // - while redirect is false, the join drains this channel's backlog into dst.
    // - once redirect is set, the backlog is empty and writes go straight into dst.
    Linked {
        dst: Channel,
        close_on_end: bool,
        redirect: bool,
    },
    // this channel closed while linked. the join is finishing up.
    Draining {
        dst: Channel,
        close_on_end: bool,
    },
    // the join finished.
    Closed,
}

// pending-operation slot for one side of the channel.
#[derive(Default)]
struct Slot {
    // whether an operation currently owns this side.
    claimed: bool,
    waiter: Option<Waiter>,
}

// suspended operation, resumable once `need` bytes (or bytes of space) are available.
struct Waiter {
    need: usize,
    waker: Waker,
}

impl Slot {
    // install or refresh the waiter.
    fn park(&mut self, need: usize, waker: &Waker) {
        if let Some(waiter) = &mut self.waiter {
            if waiter.waker.will_wake(waker) {
                waiter.need = need;
                return;
            }
        }
        self.waiter = Some(Waiter { need, waker: waker.clone() });
    }

    // wake the waiter if `available` satisfies it.
    fn wake_if(&mut self, available: usize) {
        if let Some(waiter) = self.waiter.take_if(|waiter| available >= waiter.need) {
            waiter.waker.wake();
        }
    }

    fn wake(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.waker.wake();
        }
    }
}

impl Channel {
    // construct an open, empty channel.
    pub(crate) fn new(config: &ChannelConfig) -> Self {
        let id = NEXT_ID.fetch_add(1, Relaxed);
        Channel(Arc::new(Shared {
            id,
            auto_flush: config.auto_flush,
            lockable: Mutex::new(Lockable {
                ring: Ring::new(Arc::clone(&config.pool)),
                read_order: config.read_byte_order,
                write_order: config.write_byte_order,
                state: CloseState::Open,
                join: JoinState::Idle,
                reader: Slot::default(),
                writer: Slot::default(),
                task: None,
            }),
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id
    }

    pub(crate) fn auto_flush(&self) -> bool {
        self.0.auto_flush
    }

    pub(crate) fn same(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // lock the channel.
    //
    // a panic while locked cannot leave the ring in an inconsistent state, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Lockable> {
        self.0.lockable.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // publish staged bytes, following any redirecting joins.
    pub(crate) fn flush(&self) {
        let mut seen: SmallVec<[u64; 4]> = SmallVec::new();
        let mut channel = self.clone();
        loop {
            seen.push(channel.id());
            let mut lock = channel.lock();
            lock.flush_local();
            let next = match &lock.join {
                JoinState::Linked { dst, redirect: true, .. } => Some(dst.clone()),
                _ => None,
            };
            drop(lock);
            match next {
                Some(dst) if !seen.contains(&dst.id()) => channel = dst,
                _ => break,
            }
        }
    }

    // close the channel. returns false if it was already closed.
    //
    // - a clean close publishes staged bytes, which readers may still drain.
    // - a close with cause discards buffered bytes and aborts the attached task.
    // - either way, all suspended operations are woken.
    // - if a redirecting join is active, the destination is flushed, and closed too if the join
    //   was asked to close it.
    pub(crate) fn close(&self, cause: Option<Cause>) -> bool {
        let (task, forward) = {
            let mut lock = self.lock();
            if !matches!(lock.state, CloseState::Open) {
                return false;
            }
            let task = match &cause {
                Some(cause) => {
                    let discarded = lock.ring.discard();
                    debug!(channel = self.id(), %cause, discarded, "closing channel with cause");
                    lock.state = CloseState::Failed(cause.clone());
                    lock.task.take()
                }
                None => {
                    trace!(channel = self.id(), "closing channel");
                    lock.ring.flush();
                    lock.ring.release_if_empty();
                    lock.state = CloseState::Finished;
                    None
                }
            };
            let forward = match replace(&mut lock.join, JoinState::Idle) {
                JoinState::Linked { dst, close_on_end, redirect } => {
                    lock.join = JoinState::Draining { dst: dst.clone(), close_on_end };
                    redirect.then_some((dst, close_on_end))
                }
                other => {
                    lock.join = other;
                    None
                }
            };
            lock.reader.wake();
            lock.writer.wake();
            (task, forward)
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some((dst, close_on_end)) = forward {
            dst.flush();
            if close_on_end {
                dst.close(cause);
            }
        }
        true
    }

    // attach the task producing or consuming this channel.
    pub(crate) fn attach_task(&self, task: AbortHandle) {
        let mut lock = self.lock();
        if matches!(lock.state, CloseState::Failed(_)) {
            task.abort();
        } else {
            lock.task = Some(task);
        }
    }

    pub(crate) fn detach_task(&self) {
        self.lock().task = None;
    }
}

impl Lockable {
    // publish staged bytes and wake the reader if that satisfies it.
    pub(crate) fn flush_local(&mut self) {
        if self.ring.flush() > 0 {
            self.wake_reader();
        }
    }

    pub(crate) fn wake_reader(&mut self) {
        let available = self.ring.available_for_read();
        self.reader.wake_if(available);
    }

    pub(crate) fn wake_writer(&mut self) {
        let available = self.ring.available_for_write();
        self.writer.wake_if(available);
    }

    // wake the writer regardless of space, so it re-examines the join state.
    pub(crate) fn kick_writer(&mut self) {
        self.writer.wake();
    }

    pub(crate) fn park_reader(&mut self, need: usize, cx: &Context) {
        self.reader.park(need, cx.waker());
    }

    pub(crate) fn closed_cause(&self) -> Option<&Cause> {
        match &self.state {
            CloseState::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}


// ==== claims ====


// exclusive ownership of a channel's read side, released on drop.
pub(crate) struct ReadClaim(Channel);

impl ReadClaim {
    pub(crate) fn new(channel: &Channel) -> Result<Self, ConcurrentAccessError> {
        let mut lock = channel.lock();
        if lock.reader.claimed {
            debug!(channel = channel.id(), "rejecting concurrent read");
            return Err(ConcurrentAccessError(Direction::Read));
        }
        lock.reader.claimed = true;
        Ok(ReadClaim(channel.clone()))
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.0
    }

    // poll until at least `need` bytes are readable, then run `op` under the lock.
    //
    // - a failed channel errors first, regardless of buffered bytes.
    // - a finished channel errors with end of stream once empty, or truncated if some but not
    //   enough bytes remain. those bytes stay readable.
    pub(crate) fn poll_read<R, F>(
        &mut self,
        cx: &mut Context,
        need: usize,
        op: &mut Option<F>,
    ) -> Poll<Result<R, ReadError>>
    where
        F: FnOnce(&mut Ring, ByteOrder) -> R,
    {
        debug_assert!(need > 0);
        let mut lock = self.0.lock();
        assert!(need <= lock.ring.capacity(), "read of {} bytes exceeds channel capacity", need);

        if let Some(cause) = lock.closed_cause() {
            return Poll::Ready(Err(ClosedError { cause: cause.clone() }.into()));
        }

        let available = lock.ring.available_for_read();
        if available >= need {
            let Some(op) = op.take() else {
                unreachable!("read op polled after completion");
            };
            let order = lock.read_order;
            let result = op(&mut lock.ring, order);
            lock.ring.release_if_empty();
            lock.wake_writer();
            return Poll::Ready(Ok(result));
        }

        if let CloseState::Finished = lock.state {
            return Poll::Ready(Err(if available == 0 {
                EndOfStreamError.into()
            } else {
                TruncatedError { available, requested: need }.into()
            }));
        }

        lock.park_reader(need, cx);
        Poll::Pending
    }

    // suspend until at least `need` bytes are readable, then run `op` under the lock.
    pub(crate) async fn read<R>(
        &mut self,
        need: usize,
        op: impl FnOnce(&mut Ring, ByteOrder) -> R,
    ) -> Result<R, ReadError> {
        let mut op = Some(op);
        poll_fn(|cx| self.poll_read(cx, need, &mut op)).await
    }
}

impl Drop for ReadClaim {
    fn drop(&mut self) {
        self.0.lock().reader = Slot::default();
    }
}

// exclusive ownership of a channel's write side, released on drop.
pub(crate) struct WriteClaim(Channel);

// outcome of polling a write on one channel.
pub(crate) enum WriteStep<R> {
    Done(R),
    // the channel is being joined with redirection. the write must go to this destination.
    Redirect(Channel),
}

impl WriteClaim {
    pub(crate) fn new(channel: &Channel) -> Result<Self, ConcurrentAccessError> {
        let mut lock = channel.lock();
        if lock.writer.claimed {
            debug!(channel = channel.id(), "rejecting concurrent write");
            return Err(ConcurrentAccessError(Direction::Write));
        }
        lock.writer.claimed = true;
        Ok(WriteClaim(channel.clone()))
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.0
    }

    // poll until at least `need` bytes of space are available, then run `op` under the lock.
    //
    // before suspending, staged bytes are published so the reader can make room.
    fn poll_write<R, F>(
        &mut self,
        cx: &mut Context,
        need: usize,
        op: &mut Option<F>,
    ) -> Poll<Result<WriteStep<R>, WriteError>>
    where
        F: FnOnce(&mut Ring) -> R,
    {
        debug_assert!(need > 0);
        let mut lock = self.0.lock();
        assert!(need <= lock.ring.capacity(), "write of {} bytes exceeds channel capacity", need);

        match &lock.state {
            CloseState::Open => (),
            CloseState::Finished => return Poll::Ready(Err(ClosedForWriteError.into())),
            CloseState::Failed(cause) => {
                return Poll::Ready(Err(ClosedError { cause: cause.clone() }.into()));
            }
        }

        if let JoinState::Linked { dst, redirect: true, .. } = &lock.join {
            return Poll::Ready(Ok(WriteStep::Redirect(dst.clone())));
        }

        if lock.ring.available_for_write() >= need {
            let Some(op) = op.take() else {
                unreachable!("write op polled after completion");
            };
            let result = op(&mut lock.ring);
            if self.0.auto_flush() {
                lock.flush_local();
            }
            return Poll::Ready(Ok(WriteStep::Done(result)));
        }

        lock.flush_local();
        lock.writer.park(need, cx.waker());
        Poll::Pending
    }
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        self.0.lock().writer = Slot::default();
    }
}

// a sequence of writes into a channel, following redirecting joins.
//
// holds the write claim on the source for its whole lifetime, and write claims on the channels
// along the current redirect chain for as long as a write is in progress through them.
pub(crate) struct WriteOp {
    source: WriteClaim,
    hops: SmallVec<[WriteClaim; 1]>,
}

impl WriteOp {
    pub(crate) fn new(channel: &Channel) -> Result<Self, ConcurrentAccessError> {
        Ok(WriteOp {
            source: WriteClaim::new(channel)?,
            hops: SmallVec::new(),
        })
    }

    pub(crate) fn channel(&self) -> &Channel {
        self.source.channel()
    }

    // poll one write step, which runs `op` on the ring of whichever channel in the redirect chain
    // currently accepts writes.
    pub(crate) fn poll_step<R, F>(
        &mut self,
        cx: &mut Context,
        need: usize,
        op: &mut Option<F>,
    ) -> Poll<Result<R, WriteError>>
    where
        F: FnOnce(&mut Ring) -> R,
    {
        let mut depth = 0;
        loop {
            let claim = match depth {
                0 => &mut self.source,
                n => &mut self.hops[n - 1],
            };
            let step = match claim.poll_write(cx, need, op) {
                Poll::Ready(step) => step,
                Poll::Pending => {
                    self.hops.truncate(depth);
                    if depth > 0 {
                        self.park_upstream(cx);
                    }
                    return Poll::Pending;
                }
            };
            match step {
                Ok(WriteStep::Done(result)) => {
                    // redirected bytes are published as eagerly as the source would have
                    if self.source.channel().auto_flush() {
                        if let Some(last) = self.hops.last() {
                            last.channel().flush();
                        }
                    }
                    self.hops.clear();
                    return Poll::Ready(Ok(result));
                }
                Ok(WriteStep::Redirect(dst)) => {
                    let reuse = self.hops.get(depth).is_some_and(|hop| hop.channel().same(&dst));
                    if !reuse {
                        self.hops.truncate(depth);
                        if self.source.channel().same(&dst)
                            || self.hops.iter().any(|hop| hop.channel().same(&dst))
                        {
                            // a join cycle would redirect forever
                            self.hops.clear();
                            return Poll::Ready(Err(ConcurrentAccessError(Direction::Write).into()));
                        }
                        match WriteClaim::new(&dst) {
                            Ok(hop) => {
                                trace!(
                                    from = claim_id(&self.source, &self.hops),
                                    to = dst.id(),
                                    "write redirected"
                                );
                                self.hops.push(hop);
                            }
                            Err(e) => {
                                self.hops.clear();
                                return Poll::Ready(Err(e.into()));
                            }
                        }
                    }
                    depth += 1;
                }
                Err(e) => {
                    self.hops.clear();
                    return Poll::Ready(Err(e));
                }
            }
        }
    }

    // register the waker with every channel the write was redirected through, since closing one of
    // them or unlinking its join wakes only that channel's writer slot.
    //
    // need is usize::MAX so freed space never wakes these, only unconditional wakes do.
    fn park_upstream(&self, cx: &Context) {
        let upstream = self.hops.len().saturating_sub(1);
        for claim in std::iter::once(&self.source).chain(&self.hops[..upstream]) {
            let mut lock = claim.channel().lock();
            let redirecting = matches!(lock.state, CloseState::Open)
                && matches!(lock.join, JoinState::Linked { redirect: true, .. });
            if redirecting {
                lock.writer.park(usize::MAX, cx.waker());
            } else {
                // it changed since the redirect was followed
                cx.waker().wake_by_ref();
            }
        }
    }

    // suspend until one write step completes.
    pub(crate) async fn step<R>(
        &mut self,
        need: usize,
        op: impl FnOnce(&mut Ring) -> R,
    ) -> Result<R, WriteError> {
        let mut op = Some(op);
        poll_fn(|cx| self.poll_step(cx, need, &mut op)).await
    }
}

// id of the channel at the end of the current hop chain.
fn claim_id(source: &WriteClaim, hops: &[WriteClaim]) -> u64 {
    hops.last().unwrap_or(source).channel().id()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ChannelConfig, pool::NoPool};
    use futures::task::noop_waker_ref;

    fn small_channel() -> Channel {
        // capacity of 24 bytes
        Channel::new(&ChannelConfig::default().with_pool(Arc::new(NoPool::new(32))))
    }

    #[test]
    fn second_claim_rejected_until_first_dropped() {
        let channel = small_channel();
        let claim = ReadClaim::new(&channel).unwrap();
        assert!(ReadClaim::new(&channel).is_err());
        let _write = WriteClaim::new(&channel).unwrap();
        assert!(WriteClaim::new(&channel).is_err());
        drop(claim);
        assert!(ReadClaim::new(&channel).is_ok());
    }

    #[test]
    fn dropped_claim_leaves_no_waiter() {
        let channel = small_channel();
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut claim = ReadClaim::new(&channel).unwrap();
        let mut op = Some(|_: &mut Ring, _: ByteOrder| ());
        assert!(claim.poll_read(&mut cx, 4, &mut op).is_pending());
        assert!(channel.lock().reader.waiter.is_some());
        drop(claim);
        assert!(channel.lock().reader.waiter.is_none());
        assert!(!channel.lock().reader.claimed);
    }

    #[test]
    fn full_writer_publishes_before_parking() {
        let channel = small_channel();
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut op = WriteOp::new(&channel).unwrap();
        let mut write = Some(|ring: &mut Ring| ring.write(&[1; 24]));
        assert!(matches!(op.poll_step(&mut cx, 1, &mut write), Poll::Ready(Ok(24))));
        assert_eq!(channel.lock().ring.available_for_read(), 0);

        let mut write = Some(|ring: &mut Ring| ring.write(&[2; 4]));
        assert!(op.poll_step(&mut cx, 1, &mut write).is_pending());
        assert_eq!(channel.lock().ring.available_for_read(), 24);
    }

    #[test]
    fn close_with_cause_preempts_buffered_bytes() {
        let channel = small_channel();
        {
            let mut lock = channel.lock();
            lock.ring.write(b"abcd");
            lock.ring.flush();
        }
        assert!(channel.close(Some(Cause::new(CancelledError))));
        assert!(!channel.close(None));
        assert!(!channel.lock().ring.has_block());

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut claim = ReadClaim::new(&channel).unwrap();
        let mut op = Some(|_: &mut Ring, _: ByteOrder| ());
        match claim.poll_read(&mut cx, 1, &mut op) {
            Poll::Ready(Err(ReadError::Closed(e))) => assert!(e.cause.is_cancelled()),
            _ => panic!("expected closed error"),
        }
    }

    #[test]
    fn clean_close_drains_then_truncates() {
        let channel = small_channel();
        channel.lock().ring.write(b"abc");
        assert!(channel.close(None));

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut claim = ReadClaim::new(&channel).unwrap();
        let mut op = Some(|ring: &mut Ring, _: ByteOrder| ring.skip(4));
        match claim.poll_read(&mut cx, 4, &mut op) {
            Poll::Ready(Err(ReadError::Truncated(e))) => {
                assert_eq!(e, TruncatedError { available: 3, requested: 4 })
            }
            _ => panic!("expected truncated error"),
        }
        assert!(matches!(claim.poll_read(&mut cx, 2, &mut op), Poll::Ready(Ok(3))));
        let mut op = Some(|_: &mut Ring, _: ByteOrder| ());
        assert!(matches!(
            claim.poll_read(&mut cx, 1, &mut op),
            Poll::Ready(Err(ReadError::EndOfStream(_))),
        ));
    }
}
