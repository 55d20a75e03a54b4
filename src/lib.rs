//! # rezip
//!
//! Shrinks zip-based documents (`.docx`, `.pptx`, `.epub`, plain `.zip`, ...)
//! by recompressing the raster images inside them with an adaptive palette.
//!
//! Entries ending in `.png` are re-encoded as 8-bit indexed PNGs; `.jpeg` and
//! `.jpg` entries go through the same palette and are written back as JPEG.
//! Everything else is copied byte for byte. The result is written to
//! `compressed-<name>` next to the input.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use rezip::{RecompressOptions, recompress_archive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let report = recompress_archive(Path::new("report.docx"), &RecompressOptions::default()).await?;
//!
//!     println!(
//!         "{}: {} -> {} bytes",
//!         report.output_path.display(),
//!         report.total_original(),
//!         report.total_output()
//!     );
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod gallery;
pub mod io;
pub mod raster;
pub mod recompress;
pub mod zip;

pub use cli::Cli;
pub use io::{LocalFileReader, MemoryReader, ReadAt};
pub use raster::{ConvertError, ImageKind, ImageSettings};
pub use recompress::{
    EntryOutcome, EntryReport, FailurePolicy, RecompressOptions, RecompressReport,
    recompress_archive, recompress_reader,
};
pub use zip::{ZipExtractor, ZipFileEntry, ZipWriter};
