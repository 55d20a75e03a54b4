//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! The archive is read from its tail:
//! 1. Locate the End of Central Directory (EOCD) record, skipping over a
//!    trailing archive comment if there is one
//! 2. For ZIP64 archives, follow the locator to the ZIP64 EOCD
//! 3. Read the whole Central Directory and decode one header per entry
//! 4. On extraction, read the entry's Local File Header to find its payload
//!
//! Every size and offset taken from the archive is checked against the
//! archive length before it is used to allocate or read.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// Bounds the tail that is scanned when the EOCD is followed by a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// ZIP64 extended information extra field ID
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Low-level ZIP file parser.
///
/// Reads and decodes ZIP structures from a data source. Generic over the
/// reader so the same code serves files on disk and archives in memory.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// for entry in parser.list_files().await? {
///     let offset = parser.get_data_offset(&entry).await?;
///     // Payload of entry.compressed_size bytes starts at offset
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - A shared reference to a reader implementing [`ReadAt`]
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Total size of the archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// # Arguments
    ///
    /// * `offset` - Absolute position in the archive
    /// * `buf` - Destination; its length is the number of bytes read
    ///
    /// # Errors
    ///
    /// Returns an error if the archive ends before `buf` is full, or if the
    /// underlying reader fails.
    pub async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.reader.read_at(offset, buf).await?;
        if n < buf.len() {
            bail!(
                "Unexpected end of archive: wanted {} bytes at offset {}, got {}",
                buf.len(),
                offset,
                n
            );
        }
        Ok(())
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Tries the last 22 bytes first (no comment), then scans backwards
    /// through the largest possible comment for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in the archive).
    ///
    /// # Errors
    ///
    /// Returns an error if no EOCD whose comment length reaches exactly to
    /// the end of the archive can be found, i.e. the input is not a ZIP file.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.read_exact_at(offset, &mut buf).await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.read_exact_at(search_start, &mut buf).await?;

        if buf.len() < EndOfCentralDirectory::SIZE {
            bail!("Not a valid ZIP file");
        }

        // A candidate only counts if its comment length reaches exactly to EOF.
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD has saturated fields (0xFFFF or
    /// 0xFFFFFFFF). The ZIP64 locator sits immediately before the regular
    /// EOCD and points at the ZIP64 record.
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the archive
    ///
    /// # Errors
    ///
    /// Returns an error if the locator or the ZIP64 record is missing or
    /// has a bad signature.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            bail!("Invalid ZIP64 format");
        };
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.read_exact_at(locator_offset, &mut locator_buf).await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// List all entries of the archive.
    ///
    /// Reads the EOCD (and ZIP64 EOCD if needed), then fetches the whole
    /// Central Directory in one read and decodes every header.
    ///
    /// # Returns
    ///
    /// One [`ZipFileEntry`] per file or directory, in Central Directory
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is not a ZIP file, if the Central
    /// Directory lies outside the archive or is too small for its declared
    /// entry count, or if any header is malformed.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > self.size {
            bail!("Central Directory lies outside the archive");
        }

        // Every header is at least 46 bytes, which bounds the entry count.
        if total_entries > cd_size / CDFH_MIN_SIZE as u64 {
            bail!(
                "Central Directory too small for {} entries",
                total_entries
            );
        }

        let mut cd_data = vec![0u8; cd_size as usize];
        self.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(&cd_data);

        for _ in 0..total_entries {
            let entry = self.parse_cdfh(&mut cursor)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header at the cursor position.
    ///
    /// ZIP64 extended information (extra field 0x0001) replaces the sizes
    /// and offset that are saturated in the fixed part of the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is wrong or the header is truncated.
    fn parse_cdfh(&self, cursor: &mut Cursor<&Vec<u8>>) -> Result<ZipFileEntry> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut raw_name = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut raw_name)?;
        // Display form only; the raw bytes are what gets written back
        let file_name = String::from_utf8_lossy(&raw_name).to_string();

        let is_directory = raw_name.last() == Some(&b'/');

        let extra_field_end = cursor.position() + extra_field_length as u64;

        while cursor.position() + 4 <= extra_field_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()?;
            let field_end = cursor.position() + field_size as u64;

            if header_id == ZIP64_EXTRA_ID {
                // Only the fields saturated in the fixed header are present, in order.
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
            }

            cursor.set_position(field_end);
        }

        cursor.set_position(extra_field_end + file_comment_length as u64);

        Ok(ZipFileEntry {
            file_name,
            raw_name,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            is_directory,
        })
    }

    /// Get the offset where an entry's payload begins.
    ///
    /// The Local File Header carries its own name and extra field lengths,
    /// which may differ from the Central Directory copy, so it has to be
    /// read to locate the data.
    ///
    /// # Arguments
    ///
    /// * `entry` - An entry returned by [`list_files()`](Self::list_files)
    ///
    /// # Returns
    ///
    /// The absolute offset of the first payload byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the Local File Header is missing, truncated or
    /// has a bad signature.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.read_exact_at(entry.lfh_offset, &mut lfh_buf).await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header for {}", entry.file_name);
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        match entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64 + file_name_length + extra_field_length)
        {
            Some(offset) => Ok(offset),
            None => bail!("Local File Header offset out of range for {}", entry.file_name),
        }
    }
}
