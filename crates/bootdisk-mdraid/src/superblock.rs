//! On-disk MD superblock layouts.
//!
//! All fields are little-endian and read at explicit byte offsets.

use bootdisk_storage::util::{le_u32, le_u64};

use crate::{normalize_level, ArrayDescriptor, FormatVersion, MD_MAGIC};

/// Bytes of the v1.x superblock header inspected during detection.
pub const V1_HEADER_SIZE: usize = 256;

/// Size of the v0.90 superblock.
pub const V090_SIZE: usize = 4096;

/// The v0.90 superblock sits in a reserved 64 KiB block at the end of the device.
pub const V090_RESERVED_SECTORS: u64 = 64 * 1024 / 512;

mod v1 {
    pub const MAGIC: usize = 0;
    pub const MAJOR_VERSION: usize = 4;
    pub const FEATURE_MAP: usize = 8;
    pub const SET_UUID: usize = 16;
    pub const SET_NAME: usize = 32;
    pub const CTIME: usize = 64;
    pub const LEVEL: usize = 72;
    pub const LAYOUT: usize = 76;
    pub const SIZE: usize = 80;
    pub const CHUNK_SIZE: usize = 88;
    pub const RAID_DISKS: usize = 92;
    pub const DATA_OFFSET: usize = 128;
    pub const DATA_SIZE: usize = 136;
    pub const SUPER_OFFSET: usize = 144;
    pub const DEV_NUMBER: usize = 160;
}

mod v090 {
    pub const MAGIC: usize = 0;
    pub const MAJOR_VERSION: usize = 4;
    pub const MINOR_VERSION: usize = 8;
    pub const SET_UUID0: usize = 20;
    pub const LEVEL: usize = 28;
    pub const SIZE: usize = 32;
    pub const RAID_DISKS: usize = 40;
    pub const MD_MINOR: usize = 44;
    pub const SET_UUID1: usize = 52;
    pub const SET_UUID2: usize = 56;
    pub const SET_UUID3: usize = 60;
    // Personality section.
    pub const LAYOUT: usize = 256;
    pub const CHUNK_SIZE: usize = 260;
    // Descriptor of the disk holding this copy.
    pub const THIS_DISK_NUMBER: usize = 3968;
}

/// Leading fields of a v1.x superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockV1 {
    pub magic: u32,
    pub major_version: u32,
    pub feature_map: u32,
    pub set_uuid: [u8; 16],
    pub set_name: [u8; 32],
    /// Low 40 bits are seconds, the top 24 bits microseconds (or zero).
    pub ctime: u64,
    pub level: i32,
    pub layout: u32,
    pub size: u64,
    /// Chunk size in sectors.
    pub chunk_size: u32,
    pub raid_disks: u32,
    pub data_offset: u64,
    pub data_size: u64,
    pub super_offset: u64,
    pub dev_number: u32,
}

impl SuperblockV1 {
    /// Returns `None` when `raw` is shorter than [`V1_HEADER_SIZE`].
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < V1_HEADER_SIZE {
            return None;
        }
        let mut set_uuid = [0u8; 16];
        set_uuid.copy_from_slice(&raw[v1::SET_UUID..v1::SET_UUID + 16]);
        let mut set_name = [0u8; 32];
        set_name.copy_from_slice(&raw[v1::SET_NAME..v1::SET_NAME + 32]);
        Some(Self {
            magic: le_u32(raw, v1::MAGIC),
            major_version: le_u32(raw, v1::MAJOR_VERSION),
            feature_map: le_u32(raw, v1::FEATURE_MAP),
            set_uuid,
            set_name,
            ctime: le_u64(raw, v1::CTIME),
            level: le_u32(raw, v1::LEVEL) as i32,
            layout: le_u32(raw, v1::LAYOUT),
            size: le_u64(raw, v1::SIZE),
            chunk_size: le_u32(raw, v1::CHUNK_SIZE),
            raid_disks: le_u32(raw, v1::RAID_DISKS),
            data_offset: le_u64(raw, v1::DATA_OFFSET),
            data_size: le_u64(raw, v1::DATA_SIZE),
            super_offset: le_u64(raw, v1::SUPER_OFFSET),
            dev_number: le_u32(raw, v1::DEV_NUMBER),
        })
    }

    /// Whether this copy is a v1.x superblock that belongs at `sector`.
    ///
    /// A copy whose `super_offset` disagrees with where it was found is stale and rejected.
    pub fn is_valid_at(&self, sector: u64) -> bool {
        self.magic == MD_MAGIC && self.major_version == 1 && self.super_offset == sector
    }

    pub fn ctime_seconds(&self) -> u64 {
        self.ctime & ((1 << 40) - 1)
    }

    /// Set name up to the first NUL, or `None` when empty.
    pub fn set_name(&self) -> Option<String> {
        let end = self
            .set_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.set_name.len());
        (end > 0).then(|| String::from_utf8_lossy(&self.set_name[..end]).into_owned())
    }

    pub fn descriptor(&self) -> ArrayDescriptor {
        ArrayDescriptor {
            format_version: FormatVersion::V1,
            array_number: 0,
            raid_level: normalize_level(self.level),
            raid_layout: self.layout,
            total_member_disks: self.raid_disks,
            member_index: self.dev_number,
            per_member_size: self.data_size,
            data_offset: self.data_offset,
            chunk_size: self.chunk_size,
            array_uuid: self.set_uuid,
            array_name: self.set_name(),
        }
    }
}

/// Fields of a v0.90 superblock used for detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockV090 {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub set_uuid: [u32; 4],
    pub level: i32,
    /// Per-member size in KiB, or 0 when unset.
    pub size: u32,
    pub raid_disks: u32,
    pub md_minor: u32,
    pub layout: u32,
    /// Chunk size in bytes.
    pub chunk_size: u32,
    pub this_disk_number: u32,
}

impl SuperblockV090 {
    /// Returns `None` when `raw` is shorter than [`V090_SIZE`].
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < V090_SIZE {
            return None;
        }
        Some(Self {
            magic: le_u32(raw, v090::MAGIC),
            major_version: le_u32(raw, v090::MAJOR_VERSION),
            minor_version: le_u32(raw, v090::MINOR_VERSION),
            set_uuid: [
                le_u32(raw, v090::SET_UUID0),
                le_u32(raw, v090::SET_UUID1),
                le_u32(raw, v090::SET_UUID2),
                le_u32(raw, v090::SET_UUID3),
            ],
            level: le_u32(raw, v090::LEVEL) as i32,
            size: le_u32(raw, v090::SIZE),
            raid_disks: le_u32(raw, v090::RAID_DISKS),
            md_minor: le_u32(raw, v090::MD_MINOR),
            layout: le_u32(raw, v090::LAYOUT),
            chunk_size: le_u32(raw, v090::CHUNK_SIZE),
            this_disk_number: le_u32(raw, v090::THIS_DISK_NUMBER),
        })
    }

    /// The four UUID words laid out as they are on disk.
    pub fn uuid_bytes(&self) -> [u8; 16] {
        let mut uuid = [0u8; 16];
        for (chunk, word) in uuid.chunks_exact_mut(4).zip(self.set_uuid) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        uuid
    }

    /// Builds the descriptor for a copy read from `sector`. The level must already be
    /// normalized and validated.
    pub fn descriptor(&self, sector: u64, level: i32) -> ArrayDescriptor {
        let per_member_size = if self.size != 0 {
            u64::from(self.size) * 2
        } else {
            sector
        };
        ArrayDescriptor {
            format_version: FormatVersion::V0_90,
            array_number: self.md_minor,
            raid_level: level,
            raid_layout: self.layout,
            total_member_disks: self.raid_disks,
            member_index: self.this_disk_number,
            per_member_size,
            data_offset: 0,
            chunk_size: self.chunk_size >> 9,
            array_uuid: self.uuid_bytes(),
            array_name: None,
        }
    }
}
