use thiserror::Error;
use ycrdt_buffers::BufferError;

use crate::id::ID;

/// Errors raised by the document engine.
///
/// Missing causal dependencies are never errors: such updates are buffered
/// as pending and retried once their dependencies arrive.
#[derive(Debug, Error)]
pub enum Error {
    // ── Structure invariants ───────────────────────────────────────────────
    #[error("struct {id} does not continue client {client} at clock {expected}")]
    NonContiguous { id: ID, client: u64, expected: u32 },
    #[error("no struct covers {0}")]
    NotFound(ID),
    #[error("struct store integrity violated: {0}")]
    IntegrityViolation(String),

    // ── Decoding ───────────────────────────────────────────────────────────
    #[error("malformed buffer: {0}")]
    Buffer(#[from] BufferError),
    #[error("unknown content ref in info byte: {0}")]
    UnknownContentRef(u8),
    #[error("unknown type ref: {0}")]
    UnknownTypeRef(u64),
    #[error("unknown value tag: {0}")]
    UnknownAnyTag(u8),
    #[error("value nested deeper than {0} levels")]
    NestingTooDeep(usize),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid range in update: clock {clock}, length {len}")]
    InvalidRange { clock: u64, len: u64 },

    // ── Application logic ──────────────────────────────────────────────────
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: u32, len: u32 },
    #[error("shared type `{0}` has an unexpected kind")]
    UnexpectedType(String),
    #[error("garbage collection must be disabled to restore a snapshot")]
    GcEnabled,
    #[error("observer failed: {0}")]
    Observer(String),
}

pub type Result<T> = std::result::Result<T, Error>;
