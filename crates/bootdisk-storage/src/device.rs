use std::collections::BTreeMap;

use crate::util::{checked_range, sector_count};
use crate::{DiskError, Result, SECTOR_SIZE};

/// Sector-addressed block device.
///
/// `buf` lengths passed to [`BlockDevice::read_sectors`] and [`BlockDevice::write_sectors`] must
/// be whole multiples of [`SECTOR_SIZE`]; use [`BlockDevice::read_at`] for byte-granular reads of
/// on-disk structures.
pub trait BlockDevice {
    /// Device size in 512-byte sectors.
    fn total_sectors(&self) -> u64;

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()>;

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()>;

    /// Reads `buf.len()` bytes starting `offset` bytes into `sector`.
    fn read_at(&mut self, sector: u64, offset: usize, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let first = sector
            .checked_add((offset / SECTOR_SIZE) as u64)
            .ok_or(DiskError::OffsetOverflow)?;
        let within = offset % SECTOR_SIZE;
        let span = (within + buf.len()).div_ceil(SECTOR_SIZE);

        if within == 0 && buf.len().is_multiple_of(SECTOR_SIZE) {
            return self.read_sectors(first, buf);
        }

        let mut staging = vec![0u8; span * SECTOR_SIZE];
        self.read_sectors(first, &mut staging)?;
        buf.copy_from_slice(&staging[within..within + buf.len()]);
        Ok(())
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    fn total_sectors(&self) -> u64 {
        (**self).total_sectors()
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_sectors(sector, buf)
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()> {
        (**self).write_sectors(sector, buf)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn total_sectors(&self) -> u64 {
        (**self).total_sectors()
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_sectors(sector, buf)
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()> {
        (**self).write_sectors(sector, buf)
    }
}

type Sector = Box<[u8; SECTOR_SIZE]>;

/// Sparse in-memory block device.
///
/// Only sectors that have been written hold storage, so multi-gigabyte fixtures cost nothing
/// until touched. Unwritten sectors read back as zeros.
#[derive(Debug, Clone)]
pub struct MemDisk {
    total_sectors: u64,
    sectors: BTreeMap<u64, Sector>,
    read_only: bool,
}

impl MemDisk {
    pub fn new(total_sectors: u64) -> Self {
        Self {
            total_sectors,
            sectors: BTreeMap::new(),
            read_only: false,
        }
    }

    /// Builds a disk from a raw image, padding a trailing partial sector with zeros.
    pub fn from_bytes(data: &[u8]) -> Self {
        let total_sectors = data.len().div_ceil(SECTOR_SIZE) as u64;
        let mut disk = Self::new(total_sectors);
        for (idx, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
            if chunk.iter().all(|&b| b == 0) {
                continue;
            }
            let mut sector = Box::new([0u8; SECTOR_SIZE]);
            sector[..chunk.len()].copy_from_slice(chunk);
            disk.sectors.insert(idx as u64, sector);
        }
        disk
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Number of sectors currently backed by storage.
    pub fn allocated_sectors(&self) -> usize {
        self.sectors.len()
    }
}

impl BlockDevice for MemDisk {
    fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let count = sector_count(buf.len())?;
        checked_range(sector, count, self.total_sectors)?;

        for (i, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            match self.sectors.get(&(sector + i as u64)) {
                Some(data) => chunk.copy_from_slice(&data[..]),
                None => chunk.fill(0),
            }
        }
        Ok(())
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(DiskError::ReadOnly("memdisk".to_string()));
        }
        let count = sector_count(buf.len())?;
        checked_range(sector, count, self.total_sectors)?;

        for (i, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            let entry = self
                .sectors
                .entry(sector + i as u64)
                .or_insert_with(|| Box::new([0u8; SECTOR_SIZE]));
            entry.copy_from_slice(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unwritten_sectors_read_as_zero() {
        let mut disk = MemDisk::new(1_000_000);
        let mut buf = [0xffu8; SECTOR_SIZE];
        disk.read_sectors(999_999, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(disk.allocated_sectors(), 0);
    }

    #[test]
    fn reads_past_the_end_are_rejected() {
        let mut disk = MemDisk::new(8);
        let mut buf = [0u8; SECTOR_SIZE * 2];
        assert!(matches!(
            disk.read_sectors(7, &mut buf),
            Err(DiskError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn from_bytes_pads_trailing_partial_sector() {
        let mut disk = MemDisk::from_bytes(&[0xab; SECTOR_SIZE + 3]);
        assert_eq!(disk.total_sectors(), 2);
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sectors(1, &mut buf).unwrap();
        assert_eq!(&buf[..3], &[0xab; 3]);
        assert!(buf[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_at_spans_sector_boundaries() {
        let mut disk = MemDisk::new(4);
        let mut data = vec![0u8; SECTOR_SIZE * 2];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        disk.write_sectors(1, &data).unwrap();

        let mut out = [0u8; 16];
        disk.read_at(1, SECTOR_SIZE - 8, &mut out).unwrap();
        assert_eq!(&out[..], &data[SECTOR_SIZE - 8..SECTOR_SIZE + 8]);
    }

    #[test]
    fn read_only_disk_rejects_writes() {
        let mut disk = MemDisk::new(4);
        disk.set_read_only(true);
        assert!(matches!(
            disk.write_sectors(0, &[0u8; SECTOR_SIZE]),
            Err(DiskError::ReadOnly(_))
        ));
    }

    proptest! {
        #[test]
        fn read_at_matches_flat_image(
            offset in 0usize..3 * SECTOR_SIZE,
            len in 1usize..2 * SECTOR_SIZE,
            seed in any::<u8>(),
        ) {
            let image: Vec<u8> = (0..6 * SECTOR_SIZE)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
                .collect();
            let mut disk = MemDisk::from_bytes(&image);

            let mut out = vec![0u8; len];
            disk.read_at(1, offset, &mut out).unwrap();
            let start = SECTOR_SIZE + offset;
            prop_assert_eq!(&out[..], &image[start..start + len]);
        }
    }
}
