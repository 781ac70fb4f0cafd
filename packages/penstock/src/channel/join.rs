// forwarding one channel into another.
//
// a join first drains the source's backlog into the destination chunk by chunk. once the source
// is empty it switches the link to redirect mode, after which the source's writer writes straight
// into the destination and the join only waits for the source to close.

use super::{
    api::ByteChannel,
    core::{self, CloseState, JoinState, ReadClaim},
    error::*,
};
use std::{
    future::poll_fn,
    mem::replace,
    task::{Context, Poll},
};


// what a join found on the source.
enum Backlog {
    // this many backlog bytes were moved into the scratch buffer.
    Chunk(usize),
    // the backlog is drained and the source's writes now go to the destination.
    Redirected,
    // the source closed and is drained, with its cause if it failed.
    Finished(Option<Cause>),
}

impl ReadClaim {
    // poll the source for backlog to forward.
    fn poll_backlog(&mut self, cx: &mut Context, scratch: &mut Vec<u8>) -> Poll<Backlog> {
        let mut lock = self.channel().lock();

        if let Some(cause) = lock.closed_cause() {
            return Poll::Ready(Backlog::Finished(Some(cause.clone())));
        }

        if lock.ring.available_for_read() > 0 {
            if scratch.is_empty() {
                scratch.resize(lock.ring.capacity(), 0);
            }
            let n = lock.ring.read(scratch);
            lock.ring.release_if_empty();
            lock.wake_writer();
            return Poll::Ready(Backlog::Chunk(n));
        }

        if let CloseState::Finished = lock.state {
            return Poll::Ready(Backlog::Finished(None));
        }

        if lock.ring.is_empty() {
            if let JoinState::Linked { redirect, .. } = &mut lock.join {
                *redirect = true;
            }
            // a writer waiting for space here can now write into the destination
            lock.kick_writer();
            return Poll::Ready(Backlog::Redirected);
        }

        // staged bytes will be published eventually
        lock.park_reader(1, cx);
        Poll::Pending
    }

    // poll until the source closes.
    fn poll_closed(&mut self, cx: &mut Context) -> Poll<Option<Cause>> {
        let mut lock = self.channel().lock();
        match &lock.state {
            CloseState::Open => (),
            CloseState::Finished => return Poll::Ready(None),
            CloseState::Failed(cause) => return Poll::Ready(Some(cause.clone())),
        }
        lock.park_reader(usize::MAX, cx);
        Poll::Pending
    }
}

// join link on a source channel. unlinks when dropped, unless the join finished.
struct Link<'a> {
    src: &'a core::Channel,
    finished: bool,
}

impl<'a> Link<'a> {
    fn new(src: &'a core::Channel, dst: &core::Channel, close_on_end: bool) -> Self {
        trace!(src = src.id(), dst = dst.id(), close_on_end, "join linked");
        src.lock().join = JoinState::Linked {
            dst: dst.clone(),
            close_on_end,
            redirect: false,
        };
        Link { src, finished: false }
    }
}

impl Drop for Link<'_> {
    fn drop(&mut self) {
        let mut lock = self.src.lock();
        if self.finished {
            let prev = replace(&mut lock.join, JoinState::Closed);
            if let JoinState::Draining { dst, close_on_end } = prev {
                trace!(src = self.src.id(), dst = dst.id(), close_on_end, "join drained");
            }
        } else if !matches!(lock.join, JoinState::Closed) {
            trace!(src = self.src.id(), "join abandoned");
            lock.join = JoinState::Idle;
            lock.kick_writer();
        }
    }
}

// apply a finished source's outcome to the destination.
fn finish_destination(
    dst: &ByteChannel,
    close_on_end: bool,
    outcome: Option<Cause>,
) -> Result<(), SpliceError> {
    dst.flush();
    match outcome {
        None => {
            if close_on_end {
                dst.close();
            }
            Ok(())
        }
        Some(cause) => {
            if close_on_end {
                dst.0.close(Some(cause.clone()));
            }
            Err(ClosedError { cause }.into())
        }
    }
}

impl ByteChannel {
    /// Forward all current and future bytes of this channel into `dst`, until this channel
    /// closes.
    ///
    /// Bytes already buffered here are forwarded first, in order. After that, writes into this
    /// channel go straight into `dst`. Raw bytes are forwarded unchanged: byte order settings of
    /// either channel play no part.
    ///
    /// Once this channel is closed and drained, `dst` is closed too if `close_on_end` is set, with
    /// this channel's cause if it has one. Fails with [`SpliceError::SourceClosed`] if this channel
    /// was closed with a cause. If writing into `dst` fails, this channel is closed with that
    /// error as its cause.
    ///
    /// The join holds this channel's read side until it returns. Dropping the future unlinks the
    /// channels.
    pub async fn join_to(&self, dst: &ByteChannel, close_on_end: bool) -> Result<(), SpliceError> {
        assert!(!self.0.same(&dst.0), "cannot join a channel to itself");
        let mut claim = ReadClaim::new(&self.0)?;
        let mut link = Link::new(&self.0, &dst.0, close_on_end);
        let mut scratch = Vec::new();

        let outcome = loop {
            match poll_fn(|cx| claim.poll_backlog(cx, &mut scratch)).await {
                Backlog::Chunk(n) => {
                    if let Err(e) = dst.write_fully(&scratch[..n]).await {
                        debug!(
                            src = self.0.id(),
                            dst = dst.0.id(),
                            error = %e,
                            "join destination failed"
                        );
                        self.close_with_cause(e.clone());
                        return Err(e.into());
                    }
                    dst.flush();
                }
                Backlog::Redirected => {
                    trace!(src = self.0.id(), dst = dst.0.id(), "join redirecting");
                    break poll_fn(|cx| claim.poll_closed(cx)).await;
                }
                Backlog::Finished(cause) => break cause,
            }
        };

        link.finished = true;
        drop(link);
        finish_destination(dst, close_on_end, outcome)
    }

    /// Copy up to `limit` bytes of this channel into `dst`, without linking the channels. Returns
    /// how many bytes were copied, which is less than `limit` only if this channel was closed
    /// cleanly and drained.
    ///
    /// Fails with [`SpliceError::SourceClosed`] if this channel was closed with a cause. If
    /// writing into `dst` fails, this channel is closed with that error as its cause.
    pub async fn copy_to(&self, dst: &ByteChannel, limit: u64) -> Result<u64, SpliceError> {
        assert!(!self.0.same(&dst.0), "cannot copy a channel to itself");
        let mut claim = ReadClaim::new(&self.0)?;
        let mut scratch = vec![0; self.capacity()];
        let mut copied = 0;

        while copied < limit {
            let max = usize::try_from(limit - copied)
                .map_or(scratch.len(), |n| n.min(scratch.len()));
            let chunk = &mut scratch[..max];
            let n = match claim.read(1, |ring, _| ring.read(chunk)).await {
                Ok(n) => n,
                Err(ReadError::EndOfStream(_)) => break,
                Err(ReadError::Closed(e)) => return Err(e.into()),
                Err(ReadError::ConcurrentAccess(e)) => return Err(e.into()),
                // one-byte raw reads are never truncated and decode no text
                Err(e @ (ReadError::Truncated(_) | ReadError::Malformed(_))) => {
                    unreachable!("one-byte raw read failed with {}", e)
                }
            };
            if let Err(e) = dst.write_fully(&scratch[..n]).await {
                debug!(src = self.0.id(), dst = dst.0.id(), error = %e, "copy destination failed");
                self.close_with_cause(e.clone());
                return Err(e.into());
            }
            dst.flush();
            copied += n as u64;
        }
        Ok(copied)
    }

    /// Copy all bytes of this channel into `dst`, then close `dst` the way this channel was
    /// closed. Returns how many bytes were copied.
    pub async fn copy_and_close(&self, dst: &ByteChannel) -> Result<u64, SpliceError> {
        let result = self.copy_to(dst, u64::MAX).await;
        match &result {
            Ok(_) => {
                dst.close();
            }
            Err(SpliceError::SourceClosed(e)) => {
                dst.0.close(Some(e.cause.clone()));
            }
            Err(_) => (),
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use crate::{
        error::*,
        pool::{NoPool, VerifyingPool},
        ByteChannel,
        ByteOrder,
        ChannelConfig,
    };
    use futures::{
        pin_mut,
        poll,
        task::{waker, ArcWake},
    };
    use std::{
        future::Future,
        sync::{
            atomic::{AtomicBool, Ordering::SeqCst},
            Arc,
        },
        task::{Context, Waker},
    };
    use tokio::task::yield_now;

    fn verified(pool: &Arc<VerifyingPool>, auto_flush: bool) -> ByteChannel {
        ByteChannel::with_config(
            ChannelConfig::default()
                .with_pool(pool.clone())
                .with_auto_flush(auto_flush),
        )
    }

    // waker which records that it was woken.
    #[derive(Default)]
    struct WakeFlag(AtomicBool);

    impl ArcWake for WakeFlag {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.store(true, SeqCst);
        }
    }

    fn wake_flag() -> (Arc<WakeFlag>, Waker) {
        let flag = Arc::new(WakeFlag::default());
        let waker = waker(flag.clone());
        (flag, waker)
    }

    // 24 bytes of capacity.
    fn small() -> ByteChannel {
        ByteChannel::with_config(ChannelConfig::default().with_pool(Arc::new(NoPool::new(32))))
    }

    #[tokio::test]
    async fn join_smoke() {
        let pool = VerifyingPool::new();
        let src = verified(&pool, false);
        let dst = verified(&pool, false);

        let join = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.join_to(&dst, true).await })
        };
        yield_now().await;

        src.write_u32(0x11223344).await.unwrap();
        src.flush();
        assert_eq!(dst.read_u32().await.unwrap(), 0x11223344);

        src.write_str_utf8("tail").await.unwrap();
        src.close();
        join.await.unwrap().unwrap();

        let mut tail = [0; 4];
        dst.read_fully(&mut tail).await.unwrap();
        assert_eq!(&tail, b"tail");
        assert!(dst.is_closed_for_read());
        assert!(matches!(dst.read_u8().await, Err(ReadError::EndOfStream(_))));

        drop((src, dst));
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn join_after_write_forwards_backlog_first() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        for i in 0..100u32 {
            src.write_u32(i).await.unwrap();
        }
        src.flush();

        let join = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.join_to(&dst, true).await })
        };
        for i in 100..200u32 {
            src.write_u32(i).await.unwrap();
        }
        src.close();

        for i in 0..200u32 {
            assert_eq!(dst.read_u32().await.unwrap(), i);
        }
        assert!(matches!(dst.read_u32().await, Err(ReadError::EndOfStream(_))));
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn join_closed_source_with_backlog() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        src.write_i32(777).await.unwrap();
        src.close();

        src.join_to(&dst, true).await.unwrap();
        assert_eq!(dst.read_i32().await.unwrap(), 777);
        assert!(dst.is_closed_for_read());
    }

    #[tokio::test]
    async fn join_without_close_on_end_leaves_destination_open() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        src.write_u16(5).await.unwrap();
        src.close();

        src.join_to(&dst, false).await.unwrap();
        assert!(!dst.is_closed_for_write());
        assert_eq!(dst.read_u16().await.unwrap(), 5);
        dst.write_u16(6).await.unwrap();
        dst.flush();
        assert_eq!(dst.read_u16().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn join_propagates_cause() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        src.write_u64(1).await.unwrap();
        src.close_with_cause(anyhow::anyhow!("boom"));

        match src.join_to(&dst, true).await {
            Err(SpliceError::SourceClosed(e)) => assert_eq!(e.cause.to_string(), "boom"),
            other => panic!("unexpected join result {:?}", other),
        }
        match dst.read_u8().await {
            Err(ReadError::Closed(e)) => assert_eq!(e.cause.to_string(), "boom"),
            other => panic!("unexpected read result {:?}", other),
        }
    }

    #[tokio::test]
    async fn join_forwards_raw_bytes_across_byte_orders() {
        let src = ByteChannel::with_config(
            ChannelConfig::default().with_byte_order(ByteOrder::LittleEndian),
        );
        let dst = ByteChannel::new(false);
        assert_eq!(dst.read_byte_order(), ByteOrder::BigEndian);

        src.write_u32(0x01020304).await.unwrap();
        src.close();
        src.join_to(&dst, true).await.unwrap();

        assert_eq!(dst.read_u32().await.unwrap(), 0x04030201);
    }

    #[tokio::test]
    async fn join_resumes_suspended_destination_reader() {
        let src = ByteChannel::new(true);
        let dst = ByteChannel::new(false);

        let read = dst.read_u64();
        pin_mut!(read);
        assert!(poll!(read.as_mut()).is_pending());

        let join = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.join_to(&dst, true).await })
        };
        yield_now().await;
        yield_now().await;

        src.write_u64(0x1122334455667788).await.unwrap();
        assert_eq!(read.await.unwrap(), 0x1122334455667788);
        assert_eq!(src.total_bytes_written(), 0);

        src.close();
        join.await.unwrap().unwrap();
        assert!(dst.is_closed_for_write());
    }

    #[tokio::test]
    async fn sequential_join() {
        const STEPS: u32 = 200_000;
        let parent = ByteChannel::new(false);

        let pipeline = {
            let parent = parent.clone();
            tokio::spawn(async move {
                for n in 1..=STEPS {
                    let child = ByteChannel::new(false);
                    let writer = {
                        let child = child.clone();
                        tokio::spawn(async move {
                            child.write_u32(n).await.unwrap();
                            child.close();
                        })
                    };
                    child.join_to(&parent, false).await.unwrap();
                    writer.await.unwrap();
                }
            })
        };

        for n in 1..=STEPS {
            assert_eq!(parent.read_u32().await.unwrap(), n);
        }
        pipeline.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn join_large_transfer() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        let total: u64 = 4 * 1024 * 1024;

        let join = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.join_to(&dst, true).await })
        };
        let writer = {
            let src = src.clone();
            tokio::spawn(async move {
                let block: Vec<u8> = (0..8192u32).map(|i| i as u8).collect();
                let mut written = 0;
                while written < total {
                    src.write_fully(&block).await.unwrap();
                    written += block.len() as u64;
                }
                src.close();
            })
        };

        let mut buf = vec![0; 5000];
        let mut read = 0u64;
        while let Some(n) = dst.read_available(&mut buf).await.unwrap() {
            for (i, &b) in buf[..n].iter().enumerate() {
                assert_eq!(b, ((read + i as u64) % 8192) as u8);
            }
            read += n as u64;
        }
        assert_eq!(read, total);
        writer.await.unwrap();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_join_unlinks() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        {
            let join = src.join_to(&dst, true);
            pin_mut!(join);
            assert!(poll!(join.as_mut()).is_pending());
        }
        src.write_u8(1).await.unwrap();
        src.flush();
        assert_eq!(src.read_u8().await.unwrap(), 1);
        assert_eq!(dst.available_for_read(), 0);
    }

    #[tokio::test]
    async fn failing_destination_closes_source() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        dst.close();
        src.write_u8(1).await.unwrap();
        src.flush();

        assert!(matches!(
            src.join_to(&dst, true).await,
            Err(SpliceError::Destination(WriteError::ClosedForWrite(_))),
        ));
        let cause = src.closed_cause().unwrap();
        assert!(cause.is::<WriteError>());
    }

    #[tokio::test]
    async fn copy_and_close() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::new(false);
        let writer = {
            let src = src.clone();
            tokio::spawn(async move {
                for i in 0..10_000u32 {
                    src.write_u32(i).await.unwrap();
                }
                src.close();
            })
        };
        let copy = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.copy_and_close(&dst).await })
        };
        for i in 0..10_000u32 {
            assert_eq!(dst.read_u32().await.unwrap(), i);
        }
        assert!(matches!(dst.read_u8().await, Err(ReadError::EndOfStream(_))));
        assert_eq!(copy.await.unwrap().unwrap(), 40_000);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn copy_to_respects_limit() {
        let src = ByteChannel::new(true);
        let dst = ByteChannel::new(false);
        src.write_fully(b"0123456789").await.unwrap();
        assert_eq!(src.copy_to(&dst, 4).await.unwrap(), 4);
        let mut buf = [0; 4];
        dst.read_fully(&mut buf).await.unwrap();
        assert_eq!(&buf, b"0123");
        assert_eq!(src.available_for_read(), 6);
    }

    #[tokio::test]
    async fn redirected_writer_resumes_on_source_cancel() {
        let src = ByteChannel::new(false);
        let dst = small();
        let mut join = Box::pin(src.join_to(&dst, false));
        assert!(poll!(join.as_mut()).is_pending());
        src.write_fully(&[1; 24]).await.unwrap();

        let (flag, waker) = wake_flag();
        let mut write = Box::pin(src.write_u8(2));
        assert!(write.as_mut().poll(&mut Context::from_waker(&waker)).is_pending());

        assert!(src.cancel());
        assert!(flag.0.load(SeqCst));
        match write.await {
            Err(WriteError::Closed(e)) => assert!(e.cause.is_cancelled()),
            other => panic!("unexpected write result {:?}", other),
        }
        assert!(matches!(join.await, Err(SpliceError::SourceClosed(_))));
        assert!(!dst.is_closed_for_write());
    }

    #[tokio::test]
    async fn redirected_writer_resumes_when_join_dropped() {
        let src = ByteChannel::new(false);
        let dst = small();
        let mut join = Box::pin(src.join_to(&dst, false));
        assert!(poll!(join.as_mut()).is_pending());
        src.write_fully(&[1; 24]).await.unwrap();

        let (flag, waker) = wake_flag();
        let mut write = Box::pin(src.write_u8(2));
        assert!(write.as_mut().poll(&mut Context::from_waker(&waker)).is_pending());

        drop(join);
        assert!(flag.0.load(SeqCst));
        write.await.unwrap();
        src.flush();
        assert_eq!(src.read_u8().await.unwrap(), 2);
        assert_eq!(dst.available_for_read(), 24);
    }

    #[tokio::test]
    async fn chained_joins() {
        let a = ByteChannel::new(false);
        let b = ByteChannel::new(false);
        let c = ByteChannel::new(false);

        let first = {
            let (a, b) = (a.clone(), b.clone());
            tokio::spawn(async move { a.join_to(&b, true).await })
        };
        let second = {
            let (b, c) = (b.clone(), c.clone());
            tokio::spawn(async move { b.join_to(&c, true).await })
        };
        yield_now().await;

        let writer = {
            let a = a.clone();
            tokio::spawn(async move {
                for i in 0..10_000u32 {
                    a.write_u32(i).await.unwrap();
                    if i % 1000 == 0 {
                        a.flush();
                    }
                }
                a.close();
            })
        };

        for i in 0..10_000u32 {
            assert_eq!(c.read_u32().await.unwrap(), i);
        }
        assert!(matches!(c.read_u8().await, Err(ReadError::EndOfStream(_))));
        writer.await.unwrap();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert!(b.is_closed_for_write());
    }

    #[tokio::test]
    async fn join_cycle_rejects_writes() {
        let a = ByteChannel::new(false);
        let b = ByteChannel::new(false);
        let mut forward = Box::pin(a.join_to(&b, false));
        let mut backward = Box::pin(b.join_to(&a, false));
        assert!(poll!(forward.as_mut()).is_pending());
        assert!(poll!(backward.as_mut()).is_pending());

        a.flush();
        match a.write_u8(1).await {
            Err(WriteError::ConcurrentAccess(e)) => assert_eq!(e.0, Direction::Write),
            other => panic!("unexpected write result {:?}", other),
        }
    }

    #[tokio::test]
    async fn redirect_into_claimed_destination() {
        let src = ByteChannel::new(false);
        let dst = small();
        let mut join = Box::pin(src.join_to(&dst, false));
        assert!(poll!(join.as_mut()).is_pending());

        dst.write_fully(&[0; 24]).await.unwrap();
        let blocked = dst.write_u8(1);
        pin_mut!(blocked);
        assert!(poll!(blocked.as_mut()).is_pending());

        assert!(matches!(src.write_u8(5).await, Err(WriteError::ConcurrentAccess(_))));
    }

    #[tokio::test]
    async fn live_join_keeps_source_byte_order() {
        let src = ByteChannel::new(false);
        let dst = ByteChannel::with_config(
            ChannelConfig::default()
                .with_auto_flush(true)
                .with_write_byte_order(ByteOrder::LittleEndian),
        );
        src.write_i32(0x11223344).await.unwrap();
        src.flush();

        let join = {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::spawn(async move { src.join_to(&dst, true).await })
        };
        yield_now().await;

        src.write_i32(0x55667788).await.unwrap();
        src.set_write_byte_order(ByteOrder::LittleEndian);
        src.write_i32(0x0abbccdd).await.unwrap();
        src.close();

        assert_eq!(dst.read_i32().await.unwrap(), 0x11223344);
        assert_eq!(dst.read_i32().await.unwrap(), 0x55667788);
        dst.set_read_byte_order(ByteOrder::LittleEndian);
        assert_eq!(dst.read_i32().await.unwrap(), 0x0abbccdd);
        join.await.unwrap().unwrap();
    }
}
