//! ZIP archive writer.
//!
//! Entries are written sequentially as Local File Header + payload; the
//! Central Directory and EOCD follow in [`ZipWriter::finish`]. Payloads are
//! passed in memory, so sizes and CRC are known up front and no data
//! descriptors are needed.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

use anyhow::{Result, bail};

use super::structures::*;

/// MS-DOS external attribute bit for directories
const DOS_DIRECTORY_ATTR: u32 = 0x10;

/// Central Directory record kept until the archive is finished
struct CentralRecord {
    file_name: Vec<u8>,
    flags: u16,
    method: CompressionMethod,
    last_mod_time: u16,
    last_mod_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    lfh_offset: u32,
    is_directory: bool,
}

/// Sequential ZIP writer over any [`Write`] sink.
pub struct ZipWriter<W: Write> {
    out: W,
    offset: u64,
    records: Vec<CentralRecord>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            offset: 0,
            records: Vec::new(),
        }
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one entry. The payload is deflated when that makes it smaller
    /// and stored otherwise. Non-ASCII names are flagged as UTF-8.
    pub fn add_entry(
        &mut self,
        file_name: &str,
        data: &[u8],
        last_mod_time: u16,
        last_mod_date: u16,
    ) -> Result<()> {
        self.add_entry_raw(
            file_name.as_bytes(),
            !file_name.is_ascii(),
            data,
            last_mod_time,
            last_mod_date,
        )
    }

    /// Append one entry under a name given as raw archive bytes.
    ///
    /// The bytes are written unchanged and `utf8` sets the language
    /// encoding flag, so a name read from another archive (possibly in
    /// CP437) is written back exactly as it was.
    pub fn add_entry_raw(
        &mut self,
        file_name: &[u8],
        utf8: bool,
        data: &[u8],
        last_mod_time: u16,
        last_mod_date: u16,
    ) -> Result<()> {
        let display_name = String::from_utf8_lossy(file_name);
        if self.records.len() >= 0xFFFF {
            bail!("Too many entries for a non-ZIP64 archive");
        }
        if file_name.len() > u16::MAX as usize {
            bail!("File name too long: {}", display_name);
        }

        let Ok(uncompressed_size) = u32::try_from(data.len()) else {
            bail!("{} is too large for a non-ZIP64 archive", display_name);
        };
        let Ok(lfh_offset) = u32::try_from(self.offset) else {
            bail!("Archive is too large for a non-ZIP64 archive");
        };

        let crc32 = crc32fast::hash(data);
        let deflated = deflate(data)?;
        let (method, payload) = if deflated.len() < data.len() {
            (CompressionMethod::Deflate, deflated.as_slice())
        } else {
            (CompressionMethod::Stored, data)
        };
        let compressed_size = payload.len() as u32;

        let flags = if utf8 { FLAG_UTF8 } else { 0 };

        self.out.write_all(LFH_SIGNATURE)?;
        self.out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        self.out.write_u16::<LittleEndian>(flags)?;
        self.out.write_u16::<LittleEndian>(method.as_u16())?;
        self.out.write_u16::<LittleEndian>(last_mod_time)?;
        self.out.write_u16::<LittleEndian>(last_mod_date)?;
        self.out.write_u32::<LittleEndian>(crc32)?;
        self.out.write_u32::<LittleEndian>(compressed_size)?;
        self.out.write_u32::<LittleEndian>(uncompressed_size)?;
        self.out.write_u16::<LittleEndian>(file_name.len() as u16)?;
        self.out.write_u16::<LittleEndian>(0)?;
        self.out.write_all(file_name)?;
        self.out.write_all(payload)?;

        self.offset += (LFH_SIZE + file_name.len() + payload.len()) as u64;

        self.records.push(CentralRecord {
            file_name: file_name.to_vec(),
            flags,
            method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            lfh_offset,
            is_directory: file_name.last() == Some(&b'/'),
        });

        Ok(())
    }

    /// Write the Central Directory and EOCD, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        let Ok(cd_offset) = u32::try_from(self.offset) else {
            bail!("Archive is too large for a non-ZIP64 archive");
        };

        let mut cd_size: u64 = 0;
        for record in &self.records {
            self.out.write_all(CDFH_SIGNATURE)?;
            self.out.write_u16::<LittleEndian>(VERSION_NEEDED)?; // made by: MS-DOS, 2.0
            self.out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            self.out.write_u16::<LittleEndian>(record.flags)?;
            self.out.write_u16::<LittleEndian>(record.method.as_u16())?;
            self.out.write_u16::<LittleEndian>(record.last_mod_time)?;
            self.out.write_u16::<LittleEndian>(record.last_mod_date)?;
            self.out.write_u32::<LittleEndian>(record.crc32)?;
            self.out.write_u32::<LittleEndian>(record.compressed_size)?;
            self.out.write_u32::<LittleEndian>(record.uncompressed_size)?;
            self.out.write_u16::<LittleEndian>(record.file_name.len() as u16)?;
            self.out.write_u16::<LittleEndian>(0)?; // extra field
            self.out.write_u16::<LittleEndian>(0)?; // comment
            self.out.write_u16::<LittleEndian>(0)?; // disk number start
            self.out.write_u16::<LittleEndian>(0)?; // internal attributes
            self.out.write_u32::<LittleEndian>(if record.is_directory {
                DOS_DIRECTORY_ATTR
            } else {
                0
            })?;
            self.out.write_u32::<LittleEndian>(record.lfh_offset)?;
            self.out.write_all(&record.file_name)?;

            cd_size += (CDFH_MIN_SIZE + record.file_name.len()) as u64;
        }

        let Ok(cd_size) = u32::try_from(cd_size) else {
            bail!("Central Directory is too large for a non-ZIP64 archive");
        };
        if u64::from(cd_offset) + u64::from(cd_size) > u64::from(u32::MAX) {
            bail!("Archive is too large for a non-ZIP64 archive");
        }

        let count = self.records.len() as u16;
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size,
            cd_offset,
            comment_len: 0,
        }
        .write_to(&mut self.out)?;

        self.out.flush()?;
        Ok(self.out)
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
