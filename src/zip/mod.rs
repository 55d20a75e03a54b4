//! ZIP archive reading and writing.
//!
//! - [`structures`]: on-disk records (EOCD, ZIP64 EOCD, header signatures)
//!   and the parsed [`ZipFileEntry`]
//! - [`parser`]: locates and decodes the Central Directory over a
//!   [`ReadAt`](crate::io::ReadAt) source
//! - [`extractor`]: reads entry payloads (STORED and DEFLATE, CRC-checked)
//! - [`writer`]: builds a new archive entry by entry
//!
//! Reading understands ZIP64; writing is limited to classic archives
//! (under 4 GiB and 65535 entries). Encryption and multi-disk archives are
//! not supported.

mod extractor;
mod parser;
mod structures;
mod writer;

pub use extractor::ZipExtractor;
pub use parser::ZipParser;
pub use structures::*;
pub use writer::ZipWriter;
