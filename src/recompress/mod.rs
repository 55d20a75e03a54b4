//! Archive-to-archive image recompression.
//!
//! Every entry of the input archive becomes one unit of work. Units run
//! concurrently (at most [`RecompressOptions::jobs`] at a time), and the
//! output archive is written only after all of them have finished, in the
//! order they finished.

mod options;
mod report;

pub use options::{DEFAULT_OUTPUT_PREFIX, FailurePolicy, RecompressOptions, default_jobs};
pub use report::{EntryOutcome, EntryReport, RecompressReport};

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::io::{LocalFileReader, ReadAt};
use crate::raster::{self, ImageKind, ImageSettings};
use crate::zip::{ZipExtractor, ZipFileEntry, ZipWriter};

/// An entry after its unit of work has run.
#[derive(Debug)]
pub struct ConvertedEntry {
    pub entry: ZipFileEntry,
    pub original_size: u64,
    /// Bytes to write, `None` if the entry is dropped
    pub data: Option<Vec<u8>>,
    pub outcome: EntryOutcome,
}

impl ConvertedEntry {
    pub fn report(&self) -> EntryReport {
        EntryReport {
            name: self.entry.file_name.clone(),
            original_size: self.original_size,
            output_size: self.data.as_ref().map(|d| d.len() as u64),
            outcome: self.outcome.clone(),
        }
    }
}

/// `<dir>/<prefix><file name>` for an input archive path.
pub fn output_path_for(input: &Path, prefix: &str) -> Result<PathBuf> {
    let Some(file_name) = input.file_name() else {
        bail!("{} has no file name", input.display());
    };

    let mut name = prefix.to_string();
    name.push_str(&file_name.to_string_lossy());

    Ok(match input.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    })
}

/// Recompress the archive at `input` into a new archive next to it.
///
/// Fails without creating any output if `input` cannot be opened or is not
/// a zip archive. Image entries that fail to convert are handled according
/// to [`RecompressOptions::failure_policy`].
pub async fn recompress_archive(input: &Path, options: &RecompressOptions) -> Result<RecompressReport> {
    options.validate()?;
    let output_path = output_path_for(input, &options.output_prefix)?;

    let reader = Arc::new(LocalFileReader::new(input)?);
    let converted = recompress_reader(reader, options)
        .await
        .with_context(|| format!("cannot recompress {}", input.display()))?;

    let path = output_path.clone();
    let converted = tokio::task::spawn_blocking(move || -> Result<Vec<ConvertedEntry>> {
        write_archive_file(&converted, &path)?;
        Ok(converted)
    })
    .await??;

    info!("Done writing {}", output_path.display());

    Ok(RecompressReport {
        output_path,
        entries: converted.iter().map(ConvertedEntry::report).collect(),
    })
}

/// Run one unit of work per entry of the archive behind `reader` and return
/// the results in completion order.
///
/// Errors reading the archive abort the whole run; image conversion errors
/// are recorded per entry.
pub async fn recompress_reader<R: ReadAt + 'static>(
    reader: Arc<R>,
    options: &RecompressOptions,
) -> Result<Vec<ConvertedEntry>> {
    options.validate()?;

    let extractor = Arc::new(ZipExtractor::new(reader));
    let entries = extractor.list_files().await?;

    info!(
        "Compressing {} entries with up to {} workers",
        entries.len(),
        options.jobs
    );

    let semaphore = Arc::new(Semaphore::new(options.jobs));
    let mut units = JoinSet::new();

    for entry in entries {
        let extractor = Arc::clone(&extractor);
        let semaphore = Arc::clone(&semaphore);
        let settings = options.image.clone();
        let policy = options.failure_policy;

        units.spawn(async move {
            let _permit = semaphore.acquire_owned().await?;

            let data = extractor.extract_to_memory(&entry).await?;
            let kind = if entry.is_directory {
                ImageKind::NotImage
            } else {
                ImageKind::from_file_name(&entry.file_name)
            };
            debug!("{} -> {:?}", entry.file_name, kind);

            let converted = tokio::task::spawn_blocking(move || {
                convert_entry(entry, kind, data, &settings, policy)
            })
            .await?;

            anyhow::Ok(converted)
        });
    }

    // Nothing is written until every unit has finished.
    let mut converted = Vec::with_capacity(units.len());
    while let Some(result) = units.join_next().await {
        converted.push(result??);
    }

    let dropped = converted.iter().filter(|c| c.data.is_none()).count();
    if dropped > 0 {
        warn!("{} of {} entries dropped after failed conversion", dropped, converted.len());
    }

    Ok(converted)
}

/// Write the archive to a temporary file next to `path` and move it into
/// place once it is complete. On error `path` is left untouched and the
/// temporary file is removed.
pub fn write_archive_file(entries: &[ConvertedEntry], path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;

    let temp = write_archive(entries, BufWriter::new(temp))?
        .into_inner()
        .map_err(|err| err.into_error())?;
    temp.persist(path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    Ok(())
}

/// Write every non-dropped entry to `out`, in the given order.
///
/// Names are written from their raw bytes with their original UTF-8 flag.
pub fn write_archive<W: Write>(entries: &[ConvertedEntry], out: W) -> Result<W> {
    let mut writer = ZipWriter::new(out);

    for converted in entries {
        let Some(data) = &converted.data else {
            continue;
        };
        let entry = &converted.entry;
        writer
            .add_entry_raw(
                &entry.raw_name,
                entry.has_utf8_name(),
                data,
                entry.last_mod_time,
                entry.last_mod_date,
            )
            .with_context(|| format!("cannot write {}", entry.file_name))?;
        debug!("Wrote {}", entry.file_name);
    }

    writer.finish()
}

fn convert_entry(
    entry: ZipFileEntry,
    kind: ImageKind,
    data: Vec<u8>,
    settings: &ImageSettings,
    policy: FailurePolicy,
) -> ConvertedEntry {
    let original_size = data.len() as u64;

    if !kind.is_image() {
        return ConvertedEntry {
            entry,
            original_size,
            data: Some(data),
            outcome: EntryOutcome::Copied,
        };
    }

    match raster::recompress_image(&data, kind, settings) {
        Ok(recompressed) => {
            let new_size = recompressed.len() as u64;
            let ratio = if original_size > 0 {
                new_size as f64 / original_size as f64
            } else {
                0.0
            };
            info!(
                "Compress: {} {:0.4} | {} --> {}",
                entry.file_name, ratio, original_size, new_size
            );
            ConvertedEntry {
                entry,
                original_size,
                data: Some(recompressed),
                outcome: EntryOutcome::Recompressed(kind),
            }
        }
        Err(err) => {
            let reason = err.to_string();
            match policy {
                FailurePolicy::Drop => {
                    warn!("Dropping {}: {}", entry.file_name, reason);
                    ConvertedEntry {
                        entry,
                        original_size,
                        data: None,
                        outcome: EntryOutcome::Dropped(reason),
                    }
                }
                FailurePolicy::PassThrough => {
                    warn!("Keeping original {}: {}", entry.file_name, reason);
                    ConvertedEntry {
                        entry,
                        original_size,
                        data: Some(data),
                        outcome: EntryOutcome::PassedThrough(reason),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::DOS_EPOCH_DATE;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Records how many reads are in progress at the same time.
    struct CountingReader {
        inner: MemoryReader,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ReadAt for CountingReader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let n = self.inner.read_at(offset, buf).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            n
        }

        fn size(&self) -> u64 {
            self.inner.size()
        }
    }

    fn archive(entries: &[(&str, &[u8])]) -> Arc<MemoryReader> {
        let mut writer = ZipWriter::new(Vec::new());
        for (name, data) in entries {
            writer.add_entry(name, data, 0, DOS_EPOCH_DATE).unwrap();
        }
        Arc::new(MemoryReader::new(writer.finish().unwrap()))
    }

    fn sorted_names(converted: &[ConvertedEntry]) -> Vec<&str> {
        let mut names: Vec<_> = converted.iter().map(|c| c.entry.file_name.as_str()).collect();
        names.sort();
        names
    }

    #[test]
    fn output_path_is_prefixed_sibling() {
        assert_eq!(
            output_path_for(Path::new("/tmp/upload/report.docx"), "compressed-").unwrap(),
            PathBuf::from("/tmp/upload/compressed-report.docx")
        );
        assert_eq!(
            output_path_for(Path::new("slides.pptx"), "small-").unwrap(),
            PathBuf::from("small-slides.pptx")
        );
        assert!(output_path_for(Path::new("/"), "compressed-").is_err());
    }

    #[tokio::test]
    async fn every_entry_is_accounted_for() {
        let reader = archive(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("word/", b""),
            ("word/document.xml", b"<w:document/>"),
            ("word/media/broken.png", b"not a png"),
        ]);

        let options = RecompressOptions {
            jobs: 2,
            ..RecompressOptions::default()
        };
        let converted = recompress_reader(reader, &options).await.unwrap();

        assert_eq!(
            sorted_names(&converted),
            ["[Content_Types].xml", "word/", "word/document.xml", "word/media/broken.png"]
        );
        let broken = converted
            .iter()
            .find(|c| c.entry.file_name == "word/media/broken.png")
            .unwrap();
        assert!(broken.data.is_none());
        assert!(matches!(broken.outcome, EntryOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn pass_through_keeps_failed_images() {
        let reader = archive(&[("broken.jpeg", b"\xff\xd8 truncated")]);
        let options = RecompressOptions {
            failure_policy: FailurePolicy::PassThrough,
            ..RecompressOptions::default()
        };

        let converted = recompress_reader(reader, &options).await.unwrap();
        assert_eq!(converted[0].data.as_deref(), Some(&b"\xff\xd8 truncated"[..]));
        assert!(matches!(converted[0].outcome, EntryOutcome::PassedThrough(_)));
    }

    #[tokio::test]
    async fn write_skips_dropped_entries() {
        let reader = archive(&[("keep.txt", b"keep"), ("drop.png", b"junk")]);
        let converted = recompress_reader(reader, &RecompressOptions::default())
            .await
            .unwrap();

        let data = write_archive(&converted, Vec::new()).unwrap();
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));
        let entries = extractor.list_files().await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "keep.txt");
        assert_eq!(extractor.extract_to_memory(&entries[0]).await.unwrap(), b"keep");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reads_never_exceed_the_worker_cap() {
        let names: Vec<String> = (0..24).map(|i| format!("xl/sheet{i}.xml")).collect();
        let body = "<row/>".repeat(40);
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), body.as_bytes())).collect();
        let mut writer = ZipWriter::new(Vec::new());
        for (name, data) in &entries {
            writer.add_entry(name, data, 0, DOS_EPOCH_DATE).unwrap();
        }
        let reader = Arc::new(CountingReader {
            inner: MemoryReader::new(writer.finish().unwrap()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let options = RecompressOptions {
            jobs: 2,
            ..RecompressOptions::default()
        };
        let converted = recompress_reader(Arc::clone(&reader), &options).await.unwrap();

        assert_eq!(converted.len(), 24);
        let max = reader.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=2).contains(&max), "{max} reads in flight with 2 workers");
        assert_eq!(reader.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn legacy_names_are_written_back_unchanged() {
        let cp437 = b"media/caf\x82.txt";
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_entry_raw(cp437, false, b"menu", 0, DOS_EPOCH_DATE).unwrap();
        writer
            .add_entry_raw("media/ñ.txt".as_bytes(), true, b"utf8", 0, DOS_EPOCH_DATE)
            .unwrap();
        let reader = Arc::new(MemoryReader::new(writer.finish().unwrap()));

        let converted = recompress_reader(reader, &RecompressOptions::default())
            .await
            .unwrap();
        let data = write_archive(&converted, Vec::new()).unwrap();
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));
        let mut entries = extractor.list_files().await.unwrap();
        entries.sort_by(|a, b| a.raw_name.cmp(&b.raw_name));

        assert_eq!(entries[0].raw_name, cp437);
        assert!(!entries[0].has_utf8_name());
        assert_eq!(entries[1].raw_name, "media/ñ.txt".as_bytes());
        assert!(entries[1].has_utf8_name());
        assert_eq!(extractor.extract_to_memory(&entries[0]).await.unwrap(), b"menu");
    }

    #[tokio::test]
    async fn failed_write_leaves_no_output() {
        let reader = archive(&[("ok.txt", b"fine"), ("long.txt", b"x")]);
        let mut converted = recompress_reader(reader, &RecompressOptions::default())
            .await
            .unwrap();
        for c in &mut converted {
            if c.entry.file_name == "long.txt" {
                c.entry.raw_name = vec![b'n'; u16::MAX as usize + 1];
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("compressed-out.zip");
        assert!(write_archive_file(&converted, &path).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn finished_write_replaces_output() {
        let reader = archive(&[("keep.txt", b"keep")]);
        let converted = recompress_reader(reader, &RecompressOptions::default())
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("compressed-out.zip");
        std::fs::write(&path, b"stale").unwrap();
        write_archive_file(&converted, &path).unwrap();

        let extractor = ZipExtractor::new(Arc::new(LocalFileReader::new(&path).unwrap()));
        let entries = extractor.list_files().await.unwrap();
        assert_eq!(entries[0].file_name, "keep.txt");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn single_worker_still_finishes() {
        let names: Vec<String> = (0..20).map(|i| format!("part{i}.xml")).collect();
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"<x/>"[..])).collect();

        let options = RecompressOptions {
            jobs: 1,
            ..RecompressOptions::default()
        };
        let converted = recompress_reader(archive(&entries), &options).await.unwrap();
        assert_eq!(converted.len(), 20);
        assert!(converted.iter().all(|c| c.outcome == EntryOutcome::Copied));
    }
}
