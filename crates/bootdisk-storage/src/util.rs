//! Checked offset arithmetic and little-endian field readers for on-disk structures.
//!
//! The readers index into fixed-size buffers at explicit byte offsets instead of overlaying
//! packed structs; several superblock fields sit at offsets that are not aligned to their width.

use crate::{DiskError, Result, SECTOR_SIZE};

/// Validates that `count` sectors starting at `sector` fit in a device of `capacity` sectors.
pub fn checked_range(sector: u64, count: u64, capacity: u64) -> Result<()> {
    let end = sector
        .checked_add(count)
        .ok_or(DiskError::OffsetOverflow)?;
    if end > capacity {
        return Err(DiskError::OutOfBounds {
            sector,
            count,
            capacity,
        });
    }
    Ok(())
}

/// Returns the number of whole sectors in `len` bytes, rejecting partial sectors.
pub fn sector_count(len: usize) -> Result<u64> {
    if !len.is_multiple_of(SECTOR_SIZE) {
        return Err(DiskError::UnalignedLength {
            len,
            alignment: SECTOR_SIZE,
        });
    }
    Ok((len / SECTOR_SIZE) as u64)
}

pub fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

pub fn put_le_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_le_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_le_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
