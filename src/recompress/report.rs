use std::path::PathBuf;

use crate::raster::ImageKind;

/// What happened to one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Not an image; bytes copied unchanged
    Copied,
    /// Image re-encoded with a reduced palette
    Recompressed(ImageKind),
    /// Image conversion failed; entry left out of the output
    Dropped(String),
    /// Image conversion failed; original bytes copied unchanged
    PassedThrough(String),
}

impl EntryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EntryOutcome::Copied => "copied",
            EntryOutcome::Recompressed(_) => "recompressed",
            EntryOutcome::Dropped(_) => "dropped",
            EntryOutcome::PassedThrough(_) => "kept",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryReport {
    pub name: String,
    pub original_size: u64,
    /// `None` when the entry was dropped
    pub output_size: Option<u64>,
    pub outcome: EntryOutcome,
}

impl EntryReport {
    /// Output size over original size, if both are meaningful.
    pub fn ratio(&self) -> Option<f64> {
        match self.output_size {
            Some(out) if self.original_size > 0 => Some(out as f64 / self.original_size as f64),
            _ => None,
        }
    }
}

/// Result of recompressing one archive. Entries are listed in the order
/// they were written.
#[derive(Debug, Clone)]
pub struct RecompressReport {
    pub output_path: PathBuf,
    pub entries: Vec<EntryReport>,
}

impl RecompressReport {
    pub fn input_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn output_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.output_size.is_some()).count()
    }

    pub fn dropped(&self) -> usize {
        self.input_entries() - self.output_entries()
    }

    pub fn recompressed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Recompressed(_)))
            .count()
    }

    /// Uncompressed bytes of every input entry
    pub fn total_original(&self) -> u64 {
        self.entries.iter().map(|e| e.original_size).sum()
    }

    /// Uncompressed bytes of every written entry
    pub fn total_output(&self) -> u64 {
        self.entries.iter().filter_map(|e| e.output_size).sum()
    }
}
