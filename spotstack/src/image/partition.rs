//! MBR partition table parsing.

use std::io::Read;
use std::path::Path;

use spotstack_shared::constants::disk::SECTOR_SIZE;
use spotstack_shared::errors::{SpotstackError, SpotstackResult};

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const ENTRY_COUNT: usize = 4;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// One primary partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub partition_type: u8,
    pub start_sector: u32,
    pub sector_count: u32,
}

/// Parse the four primary entries of a boot sector. Empty slots are skipped.
pub fn parse_mbr(sector: &[u8]) -> SpotstackResult<Vec<PartitionEntry>> {
    if sector.len() < SECTOR_SIZE as usize || sector[510..512] != SIGNATURE {
        return Err(offset_error());
    }

    let entries = (0..ENTRY_COUNT)
        .map(|i| {
            let raw = &sector[TABLE_OFFSET + i * ENTRY_SIZE..TABLE_OFFSET + (i + 1) * ENTRY_SIZE];
            PartitionEntry {
                partition_type: raw[4],
                start_sector: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
                sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            }
        })
        .filter(|e| e.partition_type != 0 && e.start_sector != 0)
        .collect();

    Ok(entries)
}

/// Byte offset of the first partition in a raw disk image.
pub fn partition_offset(disk: &Path) -> SpotstackResult<u64> {
    let mut sector = vec![0u8; SECTOR_SIZE as usize];
    let mut file = std::fs::File::open(disk)?;
    file.read_exact(&mut sector).map_err(|e| {
        tracing::debug!(disk = %disk.display(), error = %e, "Disk shorter than one sector");
        offset_error()
    })?;

    parse_mbr(&sector)?
        .first()
        .map(|e| u64::from(e.start_sector) * SECTOR_SIZE)
        .ok_or_else(offset_error)
}

fn offset_error() -> SpotstackError {
    SpotstackError::Parse("could not determine partition offset".into())
}

/// Boot sector with the given `(type, start, count)` entries.
#[cfg(test)]
pub(crate) fn boot_sector(entries: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut sector = vec![0u8; SECTOR_SIZE as usize];
    for (i, (kind, start, count)) in entries.iter().enumerate() {
        let base = TABLE_OFFSET + i * ENTRY_SIZE;
        sector[base + 4] = *kind;
        sector[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
        sector[base + 12..base + 16].copy_from_slice(&count.to_le_bytes());
    }
    sector[510..512].copy_from_slice(&SIGNATURE);
    sector
}
