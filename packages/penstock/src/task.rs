//! Tasks that produce into or consume from a channel.

use crate::{
    error::Cause,
    ByteChannel,
    ChannelConfig,
};
use std::{
    future::Future,
    panic::resume_unwind,
};
use tokio::task::{spawn, JoinHandle};


/// Spawn a tokio task which writes into a new channel.
///
/// When `f`'s future finishes, the channel is closed: cleanly if it returned `Ok`, or with the
/// error as its cause if it returned `Err`. Closing the channel with a cause, for example by the
/// reader calling [`ByteChannel::cancel`], aborts the task.
///
/// Panics if called outside of a tokio runtime.
pub fn writer<F, Fut>(config: ChannelConfig, f: F) -> ChannelJob
where
    F: FnOnce(ByteChannel) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    ChannelJob::spawn("writer", config, f)
}

/// Spawn a tokio task which reads from a new channel.
///
/// When `f`'s future finishes, the channel is closed: cleanly if it returned `Ok`, so further
/// writes fail, or with the error as its cause if it returned `Err`. Closing the channel with a
/// cause, for example by the writer calling [`ByteChannel::cancel`], aborts the task.
///
/// Panics if called outside of a tokio runtime.
pub fn reader<F, Fut>(config: ChannelConfig, f: F) -> ChannelJob
where
    F: FnOnce(ByteChannel) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    ChannelJob::spawn("reader", config, f)
}

/// Handle to a task spawned with [`writer`] or [`reader`], together with its channel
///
/// Dropping the job aborts the task and cancels the channel, unless it was
/// [`detach`](Self::detach)ed.
#[derive(Debug)]
pub struct ChannelJob {
    channel: ByteChannel,
    handle: Option<JoinHandle<()>>,
}

impl ChannelJob {
    fn spawn<F, Fut>(role: &'static str, config: ChannelConfig, f: F) -> Self
    where
        F: FnOnce(ByteChannel) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let channel = ByteChannel::with_config(config);
        let body = f(channel.clone());
        let task_channel = channel.clone();
        let handle = spawn(async move {
            let result = body.await;
            task_channel.0.detach_task();
            match result {
                Ok(()) => {
                    trace!(channel = task_channel.0.id(), role, "channel task finished");
                    task_channel.close();
                }
                Err(e) => {
                    debug!(channel = task_channel.0.id(), role, error = %e, "channel task failed");
                    task_channel.close_with_cause(e);
                }
            }
        });
        channel.0.attach_task(handle.abort_handle());
        ChannelJob { channel, handle: Some(handle) }
    }

    /// The channel the task produces into or consumes from.
    pub fn channel(&self) -> &ByteChannel {
        &self.channel
    }

    /// Wait for the task to finish.
    ///
    /// Returns the cause the channel was closed with, if any. An aborted task counts as finished.
    /// If the task panicked, the panic is resumed.
    pub async fn join(mut self) -> Result<(), Cause> {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    resume_unwind(e.into_panic());
                }
            }
        }
        match self.channel.closed_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// Abort the task and cancel the channel.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
        self.channel.cancel();
    }

    /// Let the task run on without this handle, returning its channel.
    pub fn detach(mut self) -> ByteChannel {
        self.handle = None;
        self.channel.clone()
    }
}

impl Drop for ChannelJob {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            self.channel.cancel();
        }
    }
}
