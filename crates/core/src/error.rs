//! Error types for the repacketizer library.

use std::fmt;

/// Errors that can occur in the repacketizer library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Wire format**: [`Parse`](Self::Parse) — malformed RTP packets.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
///
/// The [`Repacketizer`](crate::Repacketizer) itself never fails: malformed
/// NAL groups are dropped and logged, and processing resumes with the next
/// packet. Errors only arise on the parse and transport surfaces around it.
#[derive(Debug, thiserror::Error)]
pub enum RepackError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTP packet (RFC 3550 §5.1).
    #[error("RTP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTP parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Buffer shorter than the 12-byte fixed header.
    TruncatedHeader,
    /// Version field was not 2.
    UnsupportedVersion(u8),
    /// The CSRC list or header extension ran past the end of the buffer.
    TruncatedExtension,
    /// Padding count was zero or larger than the remaining payload.
    InvalidPadding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader => write!(f, "truncated header"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::TruncatedExtension => write!(f, "truncated csrc list or extension"),
            Self::InvalidPadding => write!(f, "invalid padding count"),
        }
    }
}

/// Convenience alias for `Result<T, RepackError>`.
pub type Result<T> = std::result::Result<T, RepackError>;
