use thiserror::Error;

/// Failures raised while reading from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    #[error("variable-length integer does not fit into 64 bits")]
    VarIntOverflow,
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
}
