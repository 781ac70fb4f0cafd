// channel error types.

use std::{
    fmt::{self, Formatter, Display, Debug},
    io,
    sync::Arc,
};
use thiserror::Error;


// ==== close cause ====


/// Failure a channel was closed with
///
/// Cheaply cloneable handle to an arbitrary error, so that the same cause can be delivered to
/// every operation which fails because of it.
#[derive(Clone)]
pub struct Cause(Arc<anyhow::Error>);

impl Cause {
    /// Wrap an error as a cause.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Cause(Arc::new(error.into()))
    }

    /// The underlying error.
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to downcast the underlying error to a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether the underlying error is of the given concrete type.
    pub fn is<E>(&self) -> bool
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.is::<E>()
    }

    /// Whether the channel was closed by [`cancel`](crate::ByteChannel::cancel).
    pub fn is_cancelled(&self) -> bool {
        self.is::<CancelledError>()
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl Debug for Cause {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for Cause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}


// ==== base error types ====


/// Which side of a channel an operation uses
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    /// The read side
    Read,
    /// The write side
    Write,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            Direction::Read => "read",
            Direction::Write => "write",
        })
    }
}

/// Error for reading from a channel which was closed cleanly and has no bytes left
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("end of stream")]
pub struct EndOfStreamError;

/// Error for writing into a channel which was closed cleanly
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("channel closed for write")]
pub struct ClosedForWriteError;

/// Error for using a channel which was closed with a failure cause
///
/// This takes precedence over any bytes still buffered in the channel.
#[derive(Error, Debug, Clone)]
#[error("channel closed with cause: {cause}")]
pub struct ClosedError {
    /// The failure the channel was closed with
    pub cause: Cause,
}

/// Error for starting a read while another read is outstanding on the same channel, or a write
/// while another write is outstanding
///
/// This signals a programming error rather than flow control. It is raised without suspending.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("concurrent {0} while another {0} is outstanding")]
pub struct ConcurrentAccessError(pub Direction);

/// Error for a read which needed more bytes than remained in a cleanly closed channel
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("channel closed after {available} of {requested} bytes")]
pub struct TruncatedError {
    /// Bytes that were available
    pub available: usize,
    /// Bytes that were needed
    pub requested: usize,
}

/// Error for text which could not be decoded
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("malformed text")]
pub struct MalformedTextError;

/// Cause a channel is closed with by [`cancel`](crate::ByteChannel::cancel)
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("channel cancelled")]
pub struct CancelledError;

/// Error for a blocking operation not completing by its deadline
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[error("timed out")]
pub struct TimedOutError;


// ==== compound error types ====


macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Error for reading from a channel
#[derive(Error, Debug, Clone)]
pub enum ReadError {
    /// The channel was closed cleanly and fully drained
    #[error(transparent)]
    EndOfStream(EndOfStreamError),
    /// The channel was closed with a failure cause
    #[error(transparent)]
    Closed(ClosedError),
    /// Another read is outstanding
    #[error(transparent)]
    ConcurrentAccess(ConcurrentAccessError),
    /// The channel was closed cleanly with fewer bytes left than the read needed
    #[error(transparent)]
    Truncated(TruncatedError),
    /// Text read from the channel could not be decoded
    #[error(transparent)]
    Malformed(MalformedTextError),
}

compound_from!(ReadError {
    EndOfStream(EndOfStreamError),
    Closed(ClosedError),
    ConcurrentAccess(ConcurrentAccessError),
    Truncated(TruncatedError),
    Malformed(MalformedTextError),
});

impl ReadError {
    /// Whether this is the normal end-of-stream condition.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadError::EndOfStream(_))
    }
}

/// Error for writing into a channel
#[derive(Error, Debug, Clone)]
pub enum WriteError {
    /// The channel was closed cleanly
    #[error(transparent)]
    ClosedForWrite(ClosedForWriteError),
    /// The channel was closed with a failure cause
    #[error(transparent)]
    Closed(ClosedError),
    /// Another write is outstanding
    #[error(transparent)]
    ConcurrentAccess(ConcurrentAccessError),
}

compound_from!(WriteError {
    ClosedForWrite(ClosedForWriteError),
    Closed(ClosedError),
    ConcurrentAccess(ConcurrentAccessError),
});

/// Error for forwarding one channel into another
#[derive(Error, Debug, Clone)]
pub enum SpliceError {
    /// Another read is outstanding on the source
    #[error(transparent)]
    ConcurrentAccess(ConcurrentAccessError),
    /// The source was closed with a failure cause
    #[error("source {0}")]
    SourceClosed(ClosedError),
    /// Writing into the destination failed
    #[error("destination: {0}")]
    Destination(WriteError),
}

compound_from!(SpliceError {
    ConcurrentAccess(ConcurrentAccessError),
    SourceClosed(ClosedError),
    Destination(WriteError),
});


// ==== io conversions ====


impl From<ReadError> for io::Error {
    fn from(e: ReadError) -> Self {
        let kind = match &e {
            ReadError::EndOfStream(_) | ReadError::Truncated(_) => io::ErrorKind::UnexpectedEof,
            ReadError::Closed(_) => io::ErrorKind::BrokenPipe,
            ReadError::ConcurrentAccess(_) => io::ErrorKind::Other,
            ReadError::Malformed(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

impl From<WriteError> for io::Error {
    fn from(e: WriteError) -> Self {
        let kind = match &e {
            WriteError::ClosedForWrite(_) | WriteError::Closed(_) => io::ErrorKind::BrokenPipe,
            WriteError::ConcurrentAccess(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

impl From<ConcurrentAccessError> for io::Error {
    fn from(e: ConcurrentAccessError) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}
