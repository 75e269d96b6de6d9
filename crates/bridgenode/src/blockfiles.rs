//! Block container parsing.
//!
//! A container file is a concatenation of `[4-byte magic | 4-byte LE size |
//! payload]` records. Containers are append-only and their blocks are NOT in
//! chain order; the orderer reads only the 80-byte headers to reconstruct it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use utbridge_primitives::{sha256d, Hash256, HEADER_SIZE};

use crate::error::BridgeError;

/// Magic plus the LE size word that precede every record payload.
pub const RECORD_OVERHEAD: u32 = 8;

/// One block header as it lies in a container file, before ordering.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawHeaderRecord {
    pub file_num: u32,
    pub offset: u32,
    pub prev_hash: Hash256,
    pub current_hash: Hash256,
}

pub fn block_file_path(dir: &Path, file_num: u32) -> PathBuf {
    dir.join(format!("blk{file_num:05}.dat"))
}

pub fn rev_file_path(dir: &Path, file_num: u32) -> PathBuf {
    dir.join(format!("rev{file_num:05}.dat"))
}

/// Reads the headers out of one container file starting at `start_offset`,
/// returning them along with the offset the scan ended at (the byte after
/// the last complete record).
///
/// A record that does not start with the expected magic ends the scan: the
/// tail of the most recent container is ragged while the node is writing it.
pub fn read_raw_headers(
    dir: &Path,
    file_num: u32,
    start_offset: u32,
    magic: [u8; 4],
) -> Result<(Vec<RawHeaderRecord>, u32), BridgeError> {
    let path = block_file_path(dir, file_num);
    let mut file = File::open(&path)?;
    let file_size = file.metadata()?.len();
    file.seek(SeekFrom::Start(u64::from(start_offset)))?;

    let mut headers = Vec::new();
    let mut offset: u32 = start_offset;
    loop {
        if u64::from(offset) >= file_size {
            break;
        }
        let mut magic_bytes = [0u8; 4];
        if !try_read_exact(&mut file, &mut magic_bytes)? || magic_bytes != magic {
            break;
        }

        let mut size_bytes = [0u8; 4];
        file.read_exact(&mut size_bytes)?;
        let size = u32::from_le_bytes(size_bytes);
        if size < HEADER_SIZE as u32 {
            return Err(BridgeError::Integrity(format!(
                "container {} record at byte {offset} is {size} bytes, shorter than a header",
                path.display()
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;

        let mut prev_hash = [0u8; 32];
        prev_hash.copy_from_slice(&header[4..36]);
        headers.push(RawHeaderRecord {
            file_num,
            offset,
            prev_hash,
            current_hash: sha256d(&header),
        });

        file.seek(SeekFrom::Current(i64::from(size) - HEADER_SIZE as i64))?;
        offset = offset
            .checked_add(size + RECORD_OVERHEAD)
            .ok_or_else(|| BridgeError::Integrity(format!(
                "container {} exceeds the 4 GiB offset range",
                path.display()
            )))?;
    }
    Ok((headers, offset))
}

/// Reads the record payload starting at `offset`, re-checking the magic.
pub fn read_record_at(path: &Path, offset: u32, magic: [u8; 4]) -> Result<Vec<u8>, BridgeError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(u64::from(offset)))?;

    let mut magic_bytes = [0u8; 4];
    file.read_exact(&mut magic_bytes)?;
    if magic_bytes != magic {
        return Err(BridgeError::Integrity(format!(
            "no record magic at byte {offset} of {}",
            path.display()
        )));
    }
    let mut size_bytes = [0u8; 4];
    file.read_exact(&mut size_bytes)?;
    let size = u32::from_le_bytes(size_bytes);

    let mut payload = vec![0u8; size as usize];
    file.read_exact(&mut payload)?;
    Ok(payload)
}

/// Reads the raw block payload recorded in the location index.
pub fn read_block_at(
    dir: &Path,
    file_num: u32,
    offset: u32,
    magic: [u8; 4],
) -> Result<Vec<u8>, BridgeError> {
    read_record_at(&block_file_path(dir, file_num), offset, magic)
}

/// read_exact that reports a clean end-of-file as `Ok(false)`.
fn try_read_exact(file: &mut File, buf: &mut [u8]) -> Result<bool, BridgeError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
