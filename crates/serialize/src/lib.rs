//! Ravel Serialization Library
//!
//! Compact binary serialization and deserialization for ravel's persistent
//! state (the trace database, the promoted-to-delete set, shared-cache
//! metadata). The design is inspired by `rustc_serialize`: a pair of
//! low-level traits ([`Encoder`] / [`Decoder`]) for emitting and reading
//! primitives, and a pair of high-level traits ([`Encode`] / [`Decode`])
//! implemented by serializable types.
//!
//! The only wire format shipped is a postcard-style varint format
//! ([`PostcardEncoder`] / [`PostcardDecoder`]); see the [`postcard`] module
//! for the exact byte layout.
//!
//! # Derive Macros
//!
//! ```ignore
//! #[derive(Encode, Decode)]
//! struct Point { x: i32, y: i32 }
//!
//! #[derive(Encode, Decode)]
//! enum Message {
//!     Quit,
//!     Move { x: i32, y: i32 },
//!     Write(String),
//! }
//! ```
//!
//! Use `#[serialize(skip)]` on a field to skip it during encoding; the field
//! must implement `Default` for decoding.

// Allow derive macros to reference this crate as `ravel_serialize` internally
extern crate self as ravel_serialize;

pub mod decode;
pub mod encode;
pub mod postcard;

pub use decode::{Decode, Decoder};
pub use encode::{Encode, Encoder};
pub use postcard::{PostcardDecoder, PostcardEncoder};
pub use ravel_serialize_derive::{Decode, Encode};

/// Encodes a value to a byte vector using the postcard format.
///
/// # Errors
///
/// Returns an error if the value fails to encode; with the in-memory buffer
/// this only happens for values that refuse encoding themselves.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut encoder = PostcardEncoder::new(Vec::new());
    value.encode(&mut encoder)?;
    Ok(encoder.into_inner())
}

/// Decodes a value from a byte slice using the postcard format.
///
/// # Errors
///
/// Returns an error on malformed input or trailing garbage left by a partial
/// read of a corrupted file.
pub fn from_bytes<T: Decode>(bytes: &[u8]) -> std::io::Result<T> {
    let mut decoder = PostcardDecoder::new(bytes);
    T::decode(&mut decoder)
}
