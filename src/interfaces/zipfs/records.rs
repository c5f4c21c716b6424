//! Central directory records, duplicates included.
//!
//! `ZipArchive` indexes entries by name, so when an archive carries the same
//! name twice it only exposes one of the records. The interface needs every
//! record in file order (listing) and the first record of each name
//! (resolution). This module reads the central directory itself and joins
//! the result with the archive's own index:
//!
//! 1. Find the End of Central Directory record at the end of the file
//! 2. If ZIP64, follow the locator to the ZIP64 EOCD
//! 3. Parse every Central Directory File Header
//! 4. Mark the records the archive can open by index; the rest are read
//!    straight from their local header

use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;
use rustc_hash::FxHashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::fs::File;
use std::path::Path;
use zip::{result::ZipError, ZipArchive};

const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
const EOCD_SIZE: usize = 22;
const ZIP64_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";
const ZIP64_LOCATOR_SIZE: usize = 20;
const ZIP64_EOCD_SIGNATURE: &[u8] = b"PK\x06\x06";
const ZIP64_EOCD_SIZE: usize = 56;
const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";

/// Largest archive comment the format allows; bounds the EOCD search.
const MAX_COMMENT_SIZE: u64 = 65535;

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Entry name, decoded the same way the archive decodes it.
    pub name: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Offset of the record's local file header.
    pub header_start: u64,
    /// Index in the `ZipArchive`, or `None` when the archive resolves this
    /// record's name to a different record.
    pub index: Option<usize>,
}

struct RawRecord {
    name: Vec<u8>,
    size: u64,
    header_start: u64,
}

/// Lists every record of `archive` in central directory order.
///
/// `reader` must be a second handle on the same bytes. If the central
/// directory cannot be parsed independently, the archive's own (deduplicated)
/// view is returned instead.
pub fn scan<R, A>(reader: &mut R, archive: &mut ZipArchive<A>) -> Result<Vec<Record>, ZipError>
where
    R: Read + Seek,
    A: Read + Seek,
{
    let mut indexed = Vec::with_capacity(archive.len());
    let mut by_offset = FxHashMap::default();
    let mut by_raw_name = FxHashMap::default();
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        by_offset.insert(file.header_start(), i);
        by_raw_name.entry(file.name_raw().to_vec()).or_insert(i);
        indexed.push(Record {
            name: file.name().to_owned(),
            size: file.size(),
            header_start: file.header_start(),
            index: Some(i),
        });
    }

    let raw = match read_central_directory(reader) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("central directory scan failed, duplicate names are hidden: {err}");
            return Ok(indexed);
        }
    };
    let matched = raw.iter().filter(|r| by_offset.contains_key(&r.header_start)).count();
    if matched != indexed.len() {
        warn!("central directory scan disagrees with archive index, duplicate names are hidden");
        return Ok(indexed);
    }

    let records = raw
        .into_iter()
        .map(|r| {
            let index = by_offset.get(&r.header_start).copied();
            let name = match index.or_else(|| by_raw_name.get(&r.name).copied()) {
                Some(i) => indexed[i].name.clone(),
                None => String::from_utf8_lossy(&r.name).into_owned(),
            };
            Record { name, size: r.size, header_start: r.header_start, index }
        })
        .collect();
    Ok(records)
}

/// Streams the decompressed content of the record at `header_start` into
/// `dest`, reading from its local file header.
///
/// Used for records the archive index does not reach. Records whose sizes
/// live in a trailing data descriptor cannot be read this way.
pub fn copy_from_local_header(
    path: &Path,
    header_start: u64,
    dest: &mut dyn Write,
) -> Result<u64, ZipError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(header_start))?;
    match zip::read::read_zipfile_from_stream(&mut file)? {
        Some(mut entry) => Ok(io::copy(&mut entry, dest)?),
        None => Err(ZipError::FileNotFound),
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn read_central_directory<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<RawRecord>> {
    let len = reader.seek(SeekFrom::End(0))?;

    // The EOCD sits in the last 22 bytes plus an optional comment.
    let tail_len = (MAX_COMMENT_SIZE + EOCD_SIZE as u64).min(len);
    let tail_start = len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    reader.seek(SeekFrom::Start(tail_start))?;
    reader.read_exact(&mut tail)?;

    let eocd_at = (0..(tail.len() + 1).saturating_sub(EOCD_SIZE))
        .rev()
        .find(|&i| {
            let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            &tail[i..i + 4] == EOCD_SIGNATURE && i + EOCD_SIZE + comment_len <= tail.len()
        })
        .ok_or_else(|| invalid("end of central directory not found"))?;
    let eocd_offset = tail_start + eocd_at as u64;

    let mut eocd = Cursor::new(&tail[eocd_at + 4..eocd_at + EOCD_SIZE]);
    let _disk_number = eocd.read_u16::<LittleEndian>()?;
    let _disk_with_cd = eocd.read_u16::<LittleEndian>()?;
    let _disk_entries = eocd.read_u16::<LittleEndian>()?;
    let total_entries = eocd.read_u16::<LittleEndian>()?;
    let cd_size = eocd.read_u32::<LittleEndian>()?;
    let cd_offset = eocd.read_u32::<LittleEndian>()?;

    let is_zip64 = total_entries == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF;
    let (total_entries, cd_size, cd_offset, shift) = if is_zip64 {
        let (total, size, offset) = read_zip64_eocd(reader, eocd_offset)?;
        (total, size, offset, 0)
    } else {
        let (size, offset) = (cd_size as u64, cd_offset as u64);
        // Bytes prepended to the archive shift every stored offset.
        (total_entries as u64, size, offset, eocd_offset.saturating_sub(offset + size))
    };

    let cd_start = cd_offset + shift;
    if cd_start.saturating_add(cd_size) > len {
        return Err(invalid("central directory extends past end of file"));
    }
    let mut cd = vec![0u8; cd_size as usize];
    reader.seek(SeekFrom::Start(cd_start))?;
    reader.read_exact(&mut cd)?;

    let mut cursor = Cursor::new(cd.as_slice());
    let mut records = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
    for _ in 0..total_entries {
        records.push(parse_cdfh(&mut cursor, shift)?);
    }
    Ok(records)
}

fn read_zip64_eocd<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> io::Result<(u64, u64, u64)> {
    let locator_offset = eocd_offset
        .checked_sub(ZIP64_LOCATOR_SIZE as u64)
        .ok_or_else(|| invalid("missing ZIP64 locator"))?;
    let mut locator = [0u8; ZIP64_LOCATOR_SIZE];
    reader.seek(SeekFrom::Start(locator_offset))?;
    reader.read_exact(&mut locator)?;
    if &locator[0..4] != ZIP64_LOCATOR_SIGNATURE {
        return Err(invalid("missing ZIP64 locator"));
    }
    let mut cursor = Cursor::new(&locator[4..]);
    let _disk_with_eocd64 = cursor.read_u32::<LittleEndian>()?;
    let eocd64_offset = cursor.read_u64::<LittleEndian>()?;

    let mut eocd64 = [0u8; ZIP64_EOCD_SIZE];
    reader.seek(SeekFrom::Start(eocd64_offset))?;
    reader.read_exact(&mut eocd64)?;
    if &eocd64[0..4] != ZIP64_EOCD_SIGNATURE {
        return Err(invalid("invalid ZIP64 end of central directory"));
    }
    // Skip record size, versions and disk numbers.
    let mut cursor = Cursor::new(&eocd64[4 + 8 + 2 + 2 + 4 + 4..]);
    let _disk_entries = cursor.read_u64::<LittleEndian>()?;
    let total_entries = cursor.read_u64::<LittleEndian>()?;
    let cd_size = cursor.read_u64::<LittleEndian>()?;
    let cd_offset = cursor.read_u64::<LittleEndian>()?;
    Ok((total_entries, cd_size, cd_offset))
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>, shift: u64) -> io::Result<RawRecord> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(invalid("invalid central directory file header"));
    }

    // version made by, version needed, flags, method, time, date, crc32
    cursor.set_position(cursor.position() + 2 + 2 + 2 + 2 + 2 + 2 + 4);
    let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    // disk number start, internal and external attributes
    cursor.set_position(cursor.position() + 2 + 2 + 4);
    let mut header_start = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name = vec![0u8; name_len as usize];
    cursor.read_exact(&mut name)?;

    let extra_end = cursor.position() + extra_len as u64;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;

        // ZIP64 extended information: present only for saturated fields.
        if header_id == 0x0001 {
            if uncompressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                cursor.set_position(cursor.position() + 8);
            }
            if header_start == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                header_start = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len as u64);
    if cursor.position() > cursor.get_ref().len() as u64 {
        return Err(invalid("truncated central directory"));
    }

    Ok(RawRecord { name, size: uncompressed_size, header_start: header_start + shift })
}
