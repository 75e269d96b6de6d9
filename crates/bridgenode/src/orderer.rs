//! Chain-order reconstruction over unordered container files.
//!
//! Containers hold blocks in arrival order, not chain order. The orderer
//! scans headers file by file and threads them against the tip: a header
//! whose prev-hash matches the tip extends the chain immediately, anything
//! else waits in a pending map keyed by prev-hash until its predecessor
//! lands.

use std::collections::HashMap;

use utbridge_log::{log_info, log_warn};
use utbridge_primitives::{sha256d, Hash256, HEADER_SIZE, ZERO_HASH};

use crate::blockfiles::{self, RawHeaderRecord};
use crate::config::BridgeConfig;
use crate::driver::StopSignal;
use crate::error::BridgeError;
use crate::locations::{
    location_record_count, write_last_location_height, BlockLocation, LocationReader,
    LocationWriter,
};

/// Safety cap on the pending map. Overflow means a dead-end tip: corrupt
/// container data or a missing predecessor the operator must sort out.
pub const PENDING_CAP: usize = 10_000;

pub struct OrderOutcome {
    pub tip: Hash256,
    pub last_height: u32,
    /// Stop was requested mid-pass; the last-height file was not rewritten.
    pub interrupted: bool,
}

/// Where the previous ordering pass stopped scanning. Containers are
/// append-only and scanned in file order, so re-runs pick up exactly where
/// the last pass left off instead of re-threading indexed headers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanCursor {
    pub file_num: u32,
    pub offset: u32,
}

pub fn read_scan_cursor(path: &std::path::Path) -> Result<ScanCursor, BridgeError> {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScanCursor::default())
        }
        Err(err) => return Err(err.into()),
    };
    let mut bytes = [0u8; 8];
    file.read_exact(&mut bytes)?;
    Ok(ScanCursor {
        file_num: u32::from_be_bytes(bytes[0..4].try_into().expect("split")),
        offset: u32::from_be_bytes(bytes[4..8].try_into().expect("split")),
    })
}

pub fn write_scan_cursor(path: &std::path::Path, cursor: ScanCursor) -> Result<(), BridgeError> {
    use std::io::Write;

    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&cursor.file_num.to_be_bytes())?;
        file.write_all(&cursor.offset.to_be_bytes())?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Extends the location index from `tip`, scanning containers from the
/// persisted cursor until the first missing file number. Returns the new
/// tip and last indexed height.
pub fn build_location_index(
    config: &BridgeConfig,
    mut tip: Hash256,
    start_height: u32,
    stop: &StopSignal,
) -> Result<OrderOutcome, BridgeError> {
    let magic = config.network.magic();
    let mut pending: HashMap<Hash256, RawHeaderRecord> = HashMap::new();
    let mut writer = LocationWriter::open(&config.location_index_path())?;
    let mut height = start_height;
    let mut cursor = read_scan_cursor(&config.scan_cursor_path())?;

    let mut file_num = cursor.file_num;
    let mut start_offset = cursor.offset;
    loop {
        if stop.is_stopped() {
            return Ok(OrderOutcome {
                tip,
                last_height: height,
                interrupted: true,
            });
        }
        let path = blockfiles::block_file_path(&config.block_dir, file_num);
        if !path.exists() {
            break;
        }
        log_info!("ordering {}", path.display());

        let (headers, end_offset) =
            blockfiles::read_raw_headers(&config.block_dir, file_num, start_offset, magic)?;
        for record in headers {
            if record.prev_hash != tip {
                pending.insert(record.prev_hash, record);
                if pending.len() > PENDING_CAP {
                    return Err(BridgeError::Integrity(format!(
                        "dead-end tip: {} headers pending with no predecessor",
                        pending.len()
                    )));
                }
                continue;
            }

            emit(&mut writer, &record, &mut tip, &mut height)?;
            while let Some(next) = pending.remove(&tip) {
                emit(&mut writer, &next, &mut tip, &mut height)?;
            }
        }
        cursor = ScanCursor {
            file_num,
            offset: end_offset,
        };

        // A container with a ragged tail is still being written; the next
        // numbered file cannot exist yet.
        let next = blockfiles::block_file_path(&config.block_dir, file_num + 1);
        if !next.exists() {
            break;
        }
        file_num += 1;
        start_offset = 0;
    }

    if height == start_height && !pending.is_empty() {
        return Err(BridgeError::Integrity(
            "dead-end tip: no container header extends the current tip".to_string(),
        ));
    }
    if !pending.is_empty() {
        log_warn!("{} container headers left unconnected", pending.len());
    }

    // Order matters for crash detection: index data first, then the cursor,
    // then the height that marks the pass consistent.
    writer.sync()?;
    write_scan_cursor(&config.scan_cursor_path(), cursor)?;
    write_last_location_height(&config.last_location_height_path(), height)?;
    log_info!("location index complete at height {height}");
    Ok(OrderOutcome {
        tip,
        last_height: height,
        interrupted: false,
    })
}

fn emit(
    writer: &mut LocationWriter,
    record: &RawHeaderRecord,
    tip: &mut Hash256,
    height: &mut u32,
) -> Result<(), BridgeError> {
    writer.append(BlockLocation {
        file_num: record.file_num,
        offset: record.offset,
    })?;
    *tip = record.current_hash;
    *height += 1;
    Ok(())
}

/// Derives the resumption tip from the artifacts themselves: the hash of the
/// block the last location record points at, or the all-zero sentinel when
/// nothing is indexed yet.
pub fn resume_tip(config: &BridgeConfig) -> Result<(Hash256, u32), BridgeError> {
    let count = location_record_count(&config.location_index_path())?;
    if count == 0 {
        return Ok((ZERO_HASH, 0));
    }
    let mut reader = LocationReader::open(&config.location_index_path())?;
    let location = reader.get(count as i32)?;
    let payload = blockfiles::read_block_at(
        &config.block_dir,
        location.file_num,
        location.offset,
        config.network.magic(),
    )?;
    if payload.len() < HEADER_SIZE {
        return Err(BridgeError::Integrity(format!(
            "block at height {count} is shorter than a header"
        )));
    }
    Ok((sha256d(&payload[..HEADER_SIZE]), count))
}
