//! # ObjDB Codec
//!
//! Binary primitives shared by the ObjDB storage and object layers.
//!
//! - [`ByteWriter`] / [`ByteReader`]: the row and key layout. Integers use an
//!   order-preserving variable-length form, so keys built from them sort in
//!   numeric order.
//! - [`to_record`] / [`from_record`]: CBOR encoding for metadata records
//!   such as persisted type schemas.
//!
//! ## Usage
//!
//! ```
//! use objdb_codec::{ByteReader, ByteWriter};
//!
//! let mut writer = ByteWriter::new();
//! writer.write_vuint(42);
//! writer.write_str("hello");
//!
//! let bytes = writer.into_bytes();
//! let mut reader = ByteReader::new(&bytes);
//! assert_eq!(reader.read_vuint().unwrap(), 42);
//! assert_eq!(reader.read_str().unwrap(), "hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
pub mod ordered;
mod record;
pub mod vuint;

pub use decoder::ByteReader;
pub use encoder::ByteWriter;
pub use error::{CodecError, CodecResult};
pub use record::{from_record, to_record};
pub use vuint::{read_vuint, vuint_len, write_vuint, zigzag_decode, zigzag_encode};
