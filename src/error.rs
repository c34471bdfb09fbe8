use std::fmt;
use std::io;

/// Why a stream went down. Recorded once; later attempts to set a reason are ignored.
#[derive(strum::Display, strum::AsRefStr, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermReason {
    #[strum(serialize = "end-of-stream")]
    EndOfStream,
    #[strum(serialize = "stopped")]
    Stopped,
    #[strum(serialize = "aborted")]
    Aborted,
    #[strum(serialize = "error")]
    Error,
}

/// Stream-level and per-object error taxonomy.
///
/// The type is `Clone` because a terminal error is broadcast to every
/// completion still pending when the stream goes down.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StreamErr {
    /// Local fast-failure of `send()` on a terminating stream.
    #[error("stream terminated ({0})")]
    Terminated(TermReason),
    /// The stop cause delivered to objects that were still queued at `stop()`.
    #[error("stream stopped")]
    Stopped,
    /// The object reader hit EOF before yielding the size the header promised.
    #[error("read {read} bytes, object size {size}")]
    ShortRead { read: i64, size: i64 },
    #[error("offset {off} != object size {size}")]
    SizeMismatch { off: i64, size: i64 },
    /// The encoded object header does not fit the configured slab.
    #[error("object header does not fit in {max} bytes")]
    HeaderTooBig { max: usize },
    #[error("bad frame magic")]
    BadMagic,
    #[error("frame version {0} not supported")]
    Version(u8),
    /// The body ended in the middle of a frame.
    #[error("frame truncated")]
    Truncated,
    #[error("unsized object requires pdu framing")]
    UnsizedNoPdu,
    #[error("{0}")]
    Io(String),
}

impl From<io::Error> for StreamErr {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<StreamErr> for io::Error {
    #[inline]
    fn from(e: StreamErr) -> Self {
        match e {
            StreamErr::Truncated => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            _ => io::Error::other(e),
        }
    }
}

impl StreamErr {
    /// Formatting helper for `Option<&StreamErr>` in log lines.
    pub fn opt(err: Option<&StreamErr>) -> impl fmt::Display + '_ {
        struct OptErr<'a>(Option<&'a StreamErr>);
        impl fmt::Display for OptErr<'_> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self.0 {
                    Some(e) => fmt::Display::fmt(e, f),
                    None => write!(f, "ok"),
                }
            }
        }
        OptErr(err)
    }
}
