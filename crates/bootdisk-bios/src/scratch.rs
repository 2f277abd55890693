use bootdisk_storage::{DiskError, Result, SECTOR_SIZE};

use crate::firmware::FarPtr;
use crate::MAX_SECTORS;

/// Staging area for every firmware transfer.
///
/// Sized for one protocol-maximum transfer plus a sector of slack, which also covers an optical
/// read rounded up to whole optical sectors. Allocated once per backend; the transfer path only
/// hands out sub-slices.
pub struct ScratchBuffer {
    data: Box<[u8]>,
    segment: u16,
}

impl ScratchBuffer {
    pub const SECTORS: usize = MAX_SECTORS as usize + 1;

    pub fn new(segment: u16) -> Self {
        Self {
            data: vec![0u8; Self::SECTORS * SECTOR_SIZE].into_boxed_slice(),
            segment,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Byte range `[offset, offset + len)` of the scratch area.
    pub fn region_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let end = offset.checked_add(len).ok_or(DiskError::OffsetOverflow)?;
        self.data
            .get_mut(offset..end)
            .ok_or(DiskError::OutOfBounds {
                sector: (offset / SECTOR_SIZE) as u64,
                count: len.div_ceil(SECTOR_SIZE) as u64,
                capacity: Self::SECTORS as u64,
            })
    }

    /// Far pointer to `offset` bytes into the scratch area.
    pub fn far_ptr(&self, offset: usize) -> FarPtr {
        FarPtr::from_linear((u32::from(self.segment) << 4) + offset as u32)
    }
}
