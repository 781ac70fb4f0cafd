//! Driving channel futures from blocking code.
//!
//! Design based on the pollster crate: the current thread parks on a condvar between polls, and
//! the future's waker notifies it.

use crate::error::TimedOutError;
use std::{
    future::Future,
    pin::pin,
    sync::{Arc, Condvar, Mutex, PoisonError},
    task::{Context, Poll, Wake, Waker},
    time::{Duration, Instant},
};


// timeout for blocking on a future.
enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
}

// synchronization signal state
enum State {
    Empty,
    Waiting,
    Notified,
}

// synchronization signal
struct Signal {
    state: Mutex<State>,
    cond: Condvar,
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut lock = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *lock {
            State::Notified => (),
            State::Empty => *lock = State::Notified,
            State::Waiting => {
                *lock = State::Empty;
                self.cond.notify_one();
            }
        }
    }
}

// poll the future until it resolves or the timeout is reached, in which case return none.
fn poll<F: Future>(fut: F, timeout: Timeout) -> Option<F::Output> {
    let mut fut = pin!(fut);
    let signal = Arc::new(Signal {
        state: Mutex::new(State::Empty),
        cond: Condvar::new(),
    });
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);

    loop {
        // return if ready
        if let Poll::Ready(output) = fut.as_mut().poll(&mut cx) {
            return Some(output);
        }

        // otherwise, block until notification or timeout
        let mut lock = signal.state.lock().unwrap_or_else(PoisonError::into_inner);

        // a notification which arrived while polling means poll again right away
        if let State::Notified = *lock {
            *lock = State::Empty;
            continue;
        }

        *lock = State::Waiting;
        while let State::Waiting = *lock {
            lock = match timeout {
                Timeout::Never => signal.cond.wait(lock).unwrap_or_else(PoisonError::into_inner),
                Timeout::At(deadline) => {
                    let remaining = deadline.checked_duration_since(Instant::now())?;
                    let (lock, result) = signal.cond
                        .wait_timeout(lock, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    if result.timed_out() {
                        return None;
                    }
                    lock
                }
            };
        }
        *lock = State::Empty;
    }
}

/// Block the current thread until the future resolves.
///
/// Must not be called from within an asynchronous runtime's worker thread if the future depends on
/// that runtime making progress.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    match poll(fut, Timeout::Never) {
        Some(output) => output,
        None => unreachable!("poll timed out with Timeout::Never"),
    }
}

/// Block the current thread until the future resolves or a timeout elapses.
///
/// If it times out, the future is dropped, which abandons any channel operation it was performing.
pub fn block_on_timeout<F: Future>(fut: F, timeout: Duration) -> Result<F::Output, TimedOutError> {
    block_on_deadline(fut, Instant::now() + timeout)
}

/// Block the current thread until the future resolves or the deadline is reached.
///
/// If it times out, the future is dropped, which abandons any channel operation it was performing.
pub fn block_on_deadline<F: Future>(fut: F, deadline: Instant) -> Result<F::Output, TimedOutError> {
    poll(fut, Timeout::At(deadline)).ok_or(TimedOutError)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteChannel;
    use std::thread;

    #[test]
    fn threads_exchange_through_channel() {
        let channel = ByteChannel::new(true);
        let writer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..=1000u32 {
                    block_on_timeout(channel.write_u32(i), Duration::from_secs(5))
                        .unwrap()
                        .unwrap();
                }
                channel.close();
            })
        };
        for i in 1..=1000u32 {
            let j = block_on_timeout(channel.read_u32(), Duration::from_secs(5)).unwrap().unwrap();
            assert_eq!(i, j);
        }
        assert!(block_on(channel.read_u32()).unwrap_err().is_end_of_stream());
        writer.join().unwrap();
    }

    #[test]
    fn timeout_abandons_read() {
        let channel = ByteChannel::new(false);
        assert!(block_on_timeout(channel.read_u8(), Duration::from_millis(20)).is_err());
        block_on(channel.write_u8(3)).unwrap();
        channel.flush();
        assert_eq!(block_on(channel.read_u8()).unwrap(), 3);
    }
}
