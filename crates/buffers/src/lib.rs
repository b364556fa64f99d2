//! Binary primitives for the ycrdt update formats.
//!
//! - [`Writer`] / [`Reader`]: growable byte buffer and cursor reader with
//!   variable-length integer and length-prefixed string/byte encodings.
//! - [`rle`]: run-length and delta column codecs used by the columnar (V2)
//!   update format.

mod error;
mod reader;
pub mod rle;
mod writer;

pub use error::BufferError;
pub use reader::Reader;
pub use rle::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UintOptRleDecoder, UintOptRleEncoder,
};
pub use writer::Writer;

/// Result alias for buffer decoding.
pub type Result<T> = std::result::Result<T, BufferError>;
