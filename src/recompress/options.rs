use anyhow::{Result, bail};

use crate::raster::ImageSettings;

pub const DEFAULT_OUTPUT_PREFIX: &str = "compressed-";

/// What to do with an image entry that fails to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure and leave the entry out of the output archive.
    #[default]
    Drop,
    /// Log the failure and copy the original bytes through.
    PassThrough,
}

#[derive(Debug, Clone)]
pub struct RecompressOptions {
    /// Maximum number of entries converted at the same time
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
    /// Prepended to the input's file name to form the output file name
    pub output_prefix: String,
    pub image: ImageSettings,
}

impl Default for RecompressOptions {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            failure_policy: FailurePolicy::default(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            image: ImageSettings::default(),
        }
    }
}

impl RecompressOptions {
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        if self.output_prefix.is_empty() || self.output_prefix.contains(['/', '\\']) {
            bail!(
                "output prefix must be a non-empty file name fragment, got {:?}",
                self.output_prefix
            );
        }
        if !(2..=256).contains(&self.image.palette_colors) {
            bail!(
                "palette colors must be within 2..=256, got {}",
                self.image.palette_colors
            );
        }
        if !(1..=100).contains(&self.image.jpeg_quality) {
            bail!(
                "JPEG quality must be within 1..=100, got {}",
                self.image.jpeg_quality
            );
        }
        Ok(())
    }
}

/// One worker per available core, falling back to 4.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
