//! # ODB Codec
//!
//! Order-preserving variable-length integer encoding and byte stream
//! helpers for ODB.
//!
//! This crate provides:
//! - A variable-length unsigned integer codec (1-9 bytes) whose
//!   lexicographic byte order matches numeric order, used for all
//!   object-id and table-id keys
//! - [`Writer`] and [`Reader`] for assembling and consuming object
//!   payloads (varints, strings, raw byte runs)
//!
//! ## Ordering guarantee
//!
//! For any `a < b`, `encode(a)` sorts strictly before `encode(b)` under
//! bytewise comparison. This lets the key-value engine keep objects in
//! object-id order without decoding keys.
//!
//! ## Usage
//!
//! ```
//! use odb_codec::vuint;
//!
//! let bytes = vuint::encode(300);
//! let (value, len) = vuint::decode(&bytes).unwrap();
//! assert_eq!(value, 300);
//! assert_eq!(len, bytes.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod reader;
pub mod vuint;
mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::Reader;
pub use writer::Writer;
