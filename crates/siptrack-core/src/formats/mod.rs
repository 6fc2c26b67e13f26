//! # Formats
//!
//! Byte-level encodings used between the core and storage backends.

pub mod codec;

pub use codec::{decode_value, encode_value};
