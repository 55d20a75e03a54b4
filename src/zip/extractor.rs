use flate2::read::DeflateDecoder;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::parser::ZipParser;

/// Deflate cannot expand data by more than this factor.
const MAX_DEFLATE_RATIO: u64 = 1032;
use super::structures::{CompressionMethod, ZipFileEntry};

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Extract file data to memory, inflating and checking the CRC-32
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            bail!("{} is encrypted, which is not supported", entry.file_name);
        }

        let data_offset = self.parser.get_data_offset(entry).await?;

        // Sizes come from the archive and are only trusted once they fit in it.
        let fits = data_offset
            .checked_add(entry.compressed_size)
            .is_some_and(|end| end <= self.parser.size());
        let Some(compressed_size) = usize::try_from(entry.compressed_size).ok().filter(|_| fits)
        else {
            bail!(
                "{} claims {} compressed bytes at offset {}, beyond the end of the archive",
                entry.file_name,
                entry.compressed_size,
                data_offset
            );
        };
        let max_uncompressed = match entry.compression_method {
            CompressionMethod::Deflate => entry
                .compressed_size
                .saturating_mul(MAX_DEFLATE_RATIO)
                .saturating_add(64),
            _ => entry.compressed_size,
        };
        if entry.uncompressed_size > max_uncompressed {
            bail!(
                "{} claims {} uncompressed bytes from {} compressed",
                entry.file_name,
                entry.uncompressed_size,
                entry.compressed_size
            );
        }

        let mut raw = vec![0u8; compressed_size];
        self.parser.read_exact_at(data_offset, &mut raw).await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => inflate(&raw, entry.uncompressed_size)
                .with_context(|| format!("cannot inflate {}", entry.file_name))?,
            CompressionMethod::Unknown(method) => bail!(
                "Unsupported compression method {} for {} (only STORED and DEFLATE are supported)",
                method,
                entry.file_name
            ),
        };

        if data.len() as u64 != entry.uncompressed_size {
            bail!(
                "Size mismatch for {}: expected {} bytes, got {}",
                entry.file_name,
                entry.uncompressed_size,
                data.len()
            );
        }

        let crc = crc32fast::hash(&data);
        if crc != entry.crc32 {
            bail!(
                "CRC-32 mismatch for {}: expected {:08x}, got {:08x}",
                entry.file_name,
                entry.crc32,
                crc
            );
        }

        Ok(data)
    }

    /// Extract file to disk
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let data = self.extract_to_memory(entry).await?;

        let mut file = fs::File::create(output_path)
            .await
            .with_context(|| format!("cannot create {}", output_path.display()))?;
        file.write_all(&data).await?;

        Ok(())
    }
}

fn inflate(raw: &[u8], expected_size: u64) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(expected_size.min(64 << 20) as usize);
    // One extra byte so an overlong stream shows up as a size mismatch.
    DeflateDecoder::new(raw)
        .take(expected_size.saturating_add(1))
        .read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::ZipWriter;
    use crate::zip::structures::DOS_EPOCH_DATE;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new());
        for (name, data) in entries {
            writer.add_entry(name, data, 0, DOS_EPOCH_DATE).unwrap();
        }
        writer.finish().unwrap()
    }

    #[tokio::test]
    async fn extracts_stored_and_deflated() {
        let text = "the quick brown fox ".repeat(50);
        let data = archive(&[("tiny", b"ab"), ("doc/text.xml", text.as_bytes())]);
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));

        let entries = extractor.list_files().await.unwrap();
        assert_eq!(entries[0].compression_method, CompressionMethod::Stored);
        assert_eq!(entries[1].compression_method, CompressionMethod::Deflate);

        assert_eq!(extractor.extract_to_memory(&entries[0]).await.unwrap(), b"ab");
        assert_eq!(
            extractor.extract_to_memory(&entries[1]).await.unwrap(),
            text.as_bytes()
        );
    }

    #[tokio::test]
    async fn rejects_bad_crc() {
        let data = archive(&[("a.txt", b"0123456789")]);
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));

        let mut entries = extractor.list_files().await.unwrap();
        entries[0].crc32 ^= 1;
        let err = extractor.extract_to_memory(&entries[0]).await.unwrap_err();
        assert!(err.to_string().contains("CRC-32 mismatch"));
    }

    #[tokio::test]
    async fn rejects_sizes_beyond_the_archive() {
        let text = "abc".repeat(100);
        let data = archive(&[("a.txt", b"0123456789"), ("b.xml", text.as_bytes())]);
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));
        let entries = extractor.list_files().await.unwrap();

        let mut huge = entries[0].clone();
        huge.compressed_size = u64::MAX - 16;
        huge.uncompressed_size = u64::MAX - 16;
        let err = extractor.extract_to_memory(&huge).await.unwrap_err();
        assert!(err.to_string().contains("beyond the end of the archive"));

        let mut past_end = entries[0].clone();
        past_end.compressed_size = 1 << 20;
        assert!(extractor.extract_to_memory(&past_end).await.is_err());

        let mut bomb = entries[1].clone();
        assert_eq!(bomb.compression_method, CompressionMethod::Deflate);
        bomb.uncompressed_size = u64::MAX;
        let err = extractor.extract_to_memory(&bomb).await.unwrap_err();
        assert!(err.to_string().contains("uncompressed bytes"));

        let mut stored = entries[0].clone();
        stored.uncompressed_size += 1;
        assert!(extractor.extract_to_memory(&stored).await.is_err());
    }

    #[tokio::test]
    async fn rejects_encrypted_entry() {
        let data = archive(&[("secret.txt", b"0123456789")]);
        let extractor = ZipExtractor::new(Arc::new(MemoryReader::new(data)));

        let mut entries = extractor.list_files().await.unwrap();
        entries[0].flags |= crate::zip::structures::FLAG_ENCRYPTED;
        assert!(extractor.extract_to_memory(&entries[0]).await.is_err());
    }
}
