//! The block-location index: height to container position.
//!
//! Fixed 8-byte records, one per height starting at height 1, densely packed.
//! The companion last-height file holds a single u32 equal to the record
//! count and is only rewritten (atomically) when an ordering pass completes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::BridgeError;

pub const LOCATION_RECORD_SIZE: u64 = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockLocation {
    pub file_num: u32,
    pub offset: u32,
}

impl BlockLocation {
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..4].copy_from_slice(&self.file_num.to_be_bytes());
        out[4..8].copy_from_slice(&self.offset.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        let file_num = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let offset = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        Some(Self { file_num, offset })
    }
}

/// Append side, owned by the orderer.
pub struct LocationWriter {
    file: File,
}

impl LocationWriter {
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, location: BlockLocation) -> Result<(), BridgeError> {
        self.file.write_all(&location.encode())?;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), BridgeError> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// Read side, used by the block reader and the resumption path.
pub struct LocationReader {
    file: File,
    records: u32,
}

impl LocationReader {
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % LOCATION_RECORD_SIZE != 0 {
            return Err(BridgeError::Integrity(format!(
                "location index {} is {len} bytes, not a record multiple",
                path.display()
            )));
        }
        Ok(Self {
            file,
            records: (len / LOCATION_RECORD_SIZE) as u32,
        })
    }

    pub fn records(&self) -> u32 {
        self.records
    }

    /// Record for a 1-based chain height.
    pub fn get(&mut self, height: i32) -> Result<BlockLocation, BridgeError> {
        if height < 1 || height as u32 > self.records {
            return Err(BridgeError::Integrity(format!(
                "height {height} outside the location index (1..={})",
                self.records
            )));
        }
        self.file
            .seek(SeekFrom::Start((height as u64 - 1) * LOCATION_RECORD_SIZE))?;
        let mut bytes = [0u8; 8];
        self.file.read_exact(&mut bytes)?;
        BlockLocation::decode(&bytes)
            .ok_or_else(|| BridgeError::Integrity("invalid location record".to_string()))
    }
}

/// Number of records currently on disk; zero when the file is absent.
pub fn location_record_count(path: &Path) -> Result<u32, BridgeError> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok((meta.len() / LOCATION_RECORD_SIZE) as u32),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}

pub fn read_last_location_height(path: &Path) -> Result<u32, BridgeError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut bytes = [0u8; 4];
    file.read_exact(&mut bytes)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Rewrites the last-height file through a temp file and rename, so a crash
/// never leaves a torn value behind.
pub fn write_last_location_height(path: &Path, height: u32) -> Result<(), BridgeError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&height.to_be_bytes())?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
