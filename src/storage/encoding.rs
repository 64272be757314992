//! Shared helpers around the structured binary encoding.
//!
//! Everything that goes to disk beyond raw page framing (the metadata
//! payload, node payloads, row values) runs through these two functions so
//! the whole file uses a single encoding configuration.

use bincode::error::{DecodeError, EncodeError};
use bincode::{config, Decode, Encode};

/// Encodes a value with the standard configuration.
pub fn to_bytes<T: Encode>(value: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::encode_to_vec(value, config::standard())
}

/// Decodes a value from a byte slice, tolerating trailing padding.
///
/// The caller maps the error onto the appropriate crate error variant;
/// what counts as corruption depends on what is being decoded.
pub fn from_bytes<T: Decode<()>>(bytes: &[u8]) -> Result<T, DecodeError> {
    let (decoded, _) = bincode::decode_from_slice(bytes, config::standard())?;
    Ok(decoded)
}
