//! Error kinds shared by every layer of the APX connection core.
//!
//! Per the error handling design: these are data, not control flow by
//! exception. The VM surfaces the first non-`Ok` result and aborts the
//! running program; the file manager turns data-layer errors into RemoteFile
//! error commands instead of killing the connection; header/greeting/program
//! errors do kill the connection.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds produced by this crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A caller passed a value outside what the operation accepts.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation or capacity bookkeeping failed.
    #[error("memory error: {0}")]
    Mem(String),

    /// A read or write cursor ran past the end of its buffer.
    #[error("buffer boundary: needed {needed} bytes, had {available}")]
    BufferBoundary {
        /// Bytes required by the operation.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// A required buffer (port data, definition data) was not present.
    #[error("missing buffer: {0}")]
    MissingBuffer(String),

    /// A length field decoded to something unusable (e.g. NumHeader
    /// incomplete, or a declared length that doesn't fit the remaining
    /// buffer).
    #[error("length error: {0}")]
    Length(String),

    /// A VM value didn't match the type the program expected.
    #[error("value type mismatch: expected {expected}, got {got}")]
    ValueType {
        /// Type the program expected.
        expected: String,
        /// Type actually supplied.
        got: String,
    },

    /// A scalar or array element fell outside its declared `(lo,hi)` range.
    #[error("value {value} out of range [{lo}, {hi}]")]
    ValueRange {
        /// The offending value, formatted.
        value: String,
        /// Lower bound.
        lo: String,
        /// Upper bound.
        hi: String,
    },

    /// A compiled program's header or body was self-inconsistent.
    #[error("invalid program: {0}")]
    InvalidProgram(String),

    /// An opcode byte didn't decode to a known instruction given the
    /// machine's current state.
    #[error("invalid instruction at pc {pc}: {detail}")]
    InvalidInstruction {
        /// Program counter the bad instruction was read from.
        pc: usize,
        /// Human-readable detail.
        detail: String,
    },

    /// A name (field, port, node, file) failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A greeting declared a `Message-Format` this crate can't speak.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    /// Reached a code path that is deliberately unimplemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Generic connection-layer failure (closed, malformed header, etc).
    #[error("connection error: {0}")]
    Connection(String),

    /// Failure parsing an APX definition, value table, or greeting.
    #[error("parse error at line {line}: {detail}")]
    Parse {
        /// 1-based offending line number, 0 if not line-oriented.
        line: usize,
        /// Human-readable detail.
        detail: String,
    },

    /// A node with that name is already present in the registry.
    #[error("node already exists: {0}")]
    NodeAlreadyExists(String),

    /// No node by that name is registered.
    #[error("node missing: {0}")]
    NodeMissing(String),

    /// An operation needed data that has not yet been received/processed.
    #[error("data not processed yet: {0}")]
    DataNotProcessed(String),
}

impl Error {
    /// Short string identifying the RemoteFile error code family this error
    /// kind maps to, per §7's propagation policy. Returns `None` for kinds
    /// that never cross the wire as an error command (those either abort a
    /// program locally or close the connection instead).
    #[must_use]
    pub fn wire_code(&self) -> Option<u32> {
        match self {
            Error::InvalidArgument(_) => Some(400), // INVALID_WRITE family
            Error::MissingBuffer(_) => Some(401),   // INVALID_READ_HANDLER family
            _ => None,
        }
    }
}
