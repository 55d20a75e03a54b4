use clap::Parser;
use std::path::PathBuf;

use crate::raster::{DEFAULT_JPEG_QUALITY, DEFAULT_PALETTE_COLORS, ImageSettings};
use crate::recompress::{DEFAULT_OUTPUT_PREFIX, FailurePolicy, RecompressOptions, default_jobs};

#[derive(Parser, Debug)]
#[command(name = "rezip")]
#[command(version)]
#[command(about = "Shrink zip-based documents by recompressing their images", long_about = None)]
#[command(after_help = "Examples:\n  \
  rezip report.docx               write compressed-report.docx next to report.docx\n  \
  rezip -v slides.pptx            list entries with their sizes\n  \
  rezip -d thumbs -j book.epub    extract the images of book.epub into thumbs/\n\n\
  Set RUST_LOG=debug for per-entry logging.")]
pub struct Cli {
    /// ZIP archive (zip, docx, pptx, xlsx, epub, ...)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// List entries (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List entries verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract image entries into DIR instead of recompressing
    #[arg(short = 'd', long = "extract-images", value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Junk paths when extracting images (do not make directories)
    #[arg(short = 'j', long = "junk-paths")]
    pub junk_paths: bool,

    /// Maximum number of entries converted concurrently [default: number of CPUs]
    #[arg(short = 'J', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Copy images that fail to convert instead of dropping them
    #[arg(long)]
    pub keep_failed: bool,

    /// JPEG quality
    #[arg(long, value_name = "Q", default_value_t = DEFAULT_JPEG_QUALITY,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    /// Palette size
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PALETTE_COLORS as u16,
          value_parser = clap::value_parser!(u16).range(2..=256))]
    pub colors: u16,

    /// Output file name prefix
    #[arg(long, value_name = "PREFIX", default_value = DEFAULT_OUTPUT_PREFIX)]
    pub prefix: String,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => "info",
            1 => "warn",
            _ => "error",
        }
    }

    pub fn recompress_options(&self) -> RecompressOptions {
        RecompressOptions {
            jobs: self.jobs.unwrap_or_else(default_jobs),
            failure_policy: if self.keep_failed {
                FailurePolicy::PassThrough
            } else {
                FailurePolicy::Drop
            },
            output_prefix: self.prefix.clone(),
            image: ImageSettings {
                palette_colors: self.colors as usize,
                jpeg_quality: self.quality,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_options() {
        let cli = Cli::parse_from(["rezip", "report.docx"]);
        let options = cli.recompress_options();

        assert_eq!(cli.file, PathBuf::from("report.docx"));
        assert_eq!(options.failure_policy, FailurePolicy::Drop);
        assert_eq!(options.output_prefix, "compressed-");
        assert_eq!(options.image, ImageSettings::default());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn flags_map_to_options() {
        let cli = Cli::parse_from([
            "rezip", "--keep-failed", "-J", "3", "--quality", "60", "--colors", "64", "-qq", "a.zip",
        ]);
        let options = cli.recompress_options();

        assert_eq!(options.jobs, 3);
        assert_eq!(options.failure_policy, FailurePolicy::PassThrough);
        assert_eq!(options.image.jpeg_quality, 60);
        assert_eq!(options.image.palette_colors, 64);
        assert!(cli.is_very_quiet());
        assert_eq!(cli.log_level(), "error");
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(Cli::try_parse_from(["rezip", "--quality", "0", "a.zip"]).is_err());
        assert!(Cli::try_parse_from(["rezip", "--colors", "300", "a.zip"]).is_err());
    }
}
