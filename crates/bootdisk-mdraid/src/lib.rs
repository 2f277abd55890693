//! Linux MD RAID member detection.
//!
//! [`detect`] inspects one block device and reports which array it belongs to:
//!
//! - v1.x superblocks are searched first, at the end of the device and at sectors 0 and 8. A
//!   candidate only counts if its self-reported location matches where it was read from; among
//!   several valid copies the newest creation time wins.
//! - The v0.90 superblock lives in the last 64 KiB-aligned block of the device.
//!
//! Read errors are never swallowed: an unreadable candidate location aborts detection.

mod error;
mod md;
pub mod superblock;

pub use error::{RaidError, Result};
pub use md::{detect, MdRaid, MDRAID_NAME};

use bootdisk_storage::BlockDevice;

/// Superblock magic shared by every MD metadata version.
pub const MD_MAGIC: u32 = 0xa92b_4efc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    V0_90,
    V1,
}

/// What one member disk says about the array it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDescriptor {
    pub format_version: FormatVersion,
    /// Preferred md minor for v0.90 arrays, 0 for v1.x.
    pub array_number: u32,
    pub raid_level: i32,
    pub raid_layout: u32,
    pub total_member_disks: u32,
    pub member_index: u32,
    /// Sectors of array data this member contributes.
    pub per_member_size: u64,
    /// Sector where array data starts on this member.
    pub data_offset: u64,
    /// Chunk size in sectors.
    pub chunk_size: u32,
    pub array_uuid: [u8; 16],
    /// Set name from v1.x metadata, without trailing NULs.
    pub array_name: Option<String>,
}

/// A RAID metadata format that can recognize array members.
pub trait RaidDetector {
    fn name(&self) -> &'static str;

    fn detect(&self, device: &mut dyn BlockDevice) -> Result<ArrayDescriptor>;
}

/// RAID levels the array assembler can drive.
pub const SUPPORTED_LEVELS: [i32; 6] = [0, 1, 4, 5, 6, 10];

/// Level -4 is the legacy multipath personality, which reads like RAID 1.
pub(crate) const LEVEL_MULTIPATH: i32 = -4;

pub(crate) fn normalize_level(level: i32) -> i32 {
    if level == LEVEL_MULTIPATH {
        1
    } else {
        level
    }
}
