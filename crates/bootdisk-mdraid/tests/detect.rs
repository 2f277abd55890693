#![cfg(not(target_arch = "wasm32"))]

use bootdisk_mdraid::{
    detect, ArrayDescriptor, FormatVersion, MdRaid, RaidDetector, RaidError, MD_MAGIC,
};
use bootdisk_storage::util::{put_le_u32, put_le_u64};
use bootdisk_storage::{BlockDevice, DiskError, MemDisk, Result, SECTOR_SIZE};
use proptest::prelude::*;

const UUID: [u8; 16] = *b"0123456789abcdef";

fn v1_superblock(super_offset: u64, ctime: u64, dev_number: u32) -> [u8; SECTOR_SIZE] {
    let mut raw = [0u8; SECTOR_SIZE];
    put_le_u32(&mut raw, 0, MD_MAGIC);
    put_le_u32(&mut raw, 4, 1);
    raw[16..32].copy_from_slice(&UUID);
    raw[32..36].copy_from_slice(b"data");
    put_le_u64(&mut raw, 64, ctime);
    put_le_u32(&mut raw, 72, 1);
    put_le_u32(&mut raw, 92, 2);
    put_le_u32(&mut raw, 88, 128);
    put_le_u64(&mut raw, 128, 2048);
    put_le_u64(&mut raw, 136, 100_000);
    put_le_u64(&mut raw, 144, super_offset);
    put_le_u32(&mut raw, 160, dev_number);
    raw
}

struct V090 {
    major: u32,
    minor: u32,
    level: i32,
    size_kib: u32,
}

impl Default for V090 {
    fn default() -> Self {
        Self {
            major: 0,
            minor: 90,
            level: 5,
            size_kib: 4096,
        }
    }
}

fn v090_superblock(sb: V090) -> Vec<u8> {
    let mut raw = vec![0u8; 4096];
    put_le_u32(&mut raw, 0, MD_MAGIC);
    put_le_u32(&mut raw, 4, sb.major);
    put_le_u32(&mut raw, 8, sb.minor);
    put_le_u32(&mut raw, 20, 0x1111_1111);
    put_le_u32(&mut raw, 28, sb.level as u32);
    put_le_u32(&mut raw, 32, sb.size_kib);
    put_le_u32(&mut raw, 40, 3);
    put_le_u32(&mut raw, 44, 7);
    put_le_u32(&mut raw, 52, 0x2222_2222);
    put_le_u32(&mut raw, 56, 0x3333_3333);
    put_le_u32(&mut raw, 60, 0x4444_4444);
    put_le_u32(&mut raw, 256, 2);
    put_le_u32(&mut raw, 260, 64 * 1024);
    put_le_u32(&mut raw, 3968, 1);
    raw
}

fn disk_with(total: u64, blocks: &[(u64, &[u8])]) -> MemDisk {
    let mut disk = MemDisk::new(total);
    for (sector, data) in blocks {
        disk.write_sectors(*sector, data).unwrap();
    }
    disk
}

/// Fails every read touching `bad_sector`.
struct FlakyDisk {
    inner: MemDisk,
    bad_sector: u64,
}

impl BlockDevice for FlakyDisk {
    fn total_sectors(&self) -> u64 {
        self.inner.total_sectors()
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        let count = (buf.len() / SECTOR_SIZE) as u64;
        if (sector..sector + count).contains(&self.bad_sector) {
            return Err(DiskError::ReadError("flaky".into()));
        }
        self.inner.read_sectors(sector, buf)
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()> {
        self.inner.write_sectors(sector, buf)
    }
}

#[test]
fn v1_2_superblock_is_detected() {
    let mut disk = disk_with(4096, &[(8, &v1_superblock(8, 10, 1))]);
    let desc = detect(&mut disk).unwrap();

    assert_eq!(
        desc,
        ArrayDescriptor {
            format_version: FormatVersion::V1,
            array_number: 0,
            raid_level: 1,
            raid_layout: 0,
            total_member_disks: 2,
            member_index: 1,
            per_member_size: 100_000,
            data_offset: 2048,
            chunk_size: 128,
            array_uuid: UUID,
            array_name: Some("data".into()),
        }
    );
}

#[test]
fn v1_copy_at_the_wrong_offset_is_rejected() {
    // Claims to live at sector 0 but sits at sector 8.
    let mut disk = disk_with(4096, &[(8, &v1_superblock(0, 10, 1))]);
    assert_eq!(detect(&mut disk).unwrap_err(), RaidError::NotRaid);
}

#[test]
fn newest_v1_copy_wins() {
    let end = (4096 - 16) & !7;
    let mut disk = disk_with(
        4096,
        &[
            (end, &v1_superblock(end, 10, 0)),
            (0, &v1_superblock(0, 30, 1)),
            (8, &v1_superblock(8, 20, 2)),
        ],
    );
    assert_eq!(detect(&mut disk).unwrap().member_index, 1);
}

#[test]
fn equal_creation_times_prefer_the_end_copy() {
    let end = (4096 - 16) & !7;
    let mut disk = disk_with(
        4096,
        &[
            (end, &v1_superblock(end, 10, 0)),
            (8, &v1_superblock(8, 10, 2)),
        ],
    );
    assert_eq!(detect(&mut disk).unwrap().member_index, 0);
}

#[test]
fn v1_takes_priority_over_v090() {
    let size = 20_000;
    let v090_sector = (size & !127) - 128;
    let mut disk = disk_with(
        size,
        &[
            (0, &v1_superblock(0, 10, 1)),
            (v090_sector, &v090_superblock(V090::default())),
        ],
    );
    assert_eq!(detect(&mut disk).unwrap().format_version, FormatVersion::V1);
}

#[test]
fn v090_superblock_is_detected_at_the_reserved_tail() {
    let size = 20_000;
    let sector = (size & !127) - 128;
    assert_eq!(sector, 19_840);
    let mut disk = disk_with(size, &[(sector, &v090_superblock(V090::default()))]);

    let desc = detect(&mut disk).unwrap();
    assert_eq!(desc.format_version, FormatVersion::V0_90);
    assert_eq!(desc.array_number, 7);
    assert_eq!(desc.raid_level, 5);
    assert_eq!(desc.raid_layout, 2);
    assert_eq!(desc.total_member_disks, 3);
    assert_eq!(desc.member_index, 1);
    assert_eq!(desc.per_member_size, 8192);
    assert_eq!(desc.data_offset, 0);
    assert_eq!(desc.chunk_size, 128);
    assert_eq!(&desc.array_uuid[..4], &[0x11; 4]);
    assert_eq!(&desc.array_uuid[12..], &[0x44; 4]);
}

#[test]
fn v090_zero_size_falls_back_to_superblock_sector() {
    let size = 20_000;
    let sector = (size & !127) - 128;
    let raw = v090_superblock(V090 {
        size_kib: 0,
        ..V090::default()
    });
    let mut disk = disk_with(size, &[(sector, &raw)]);

    assert_eq!(detect(&mut disk).unwrap().per_member_size, sector);
}

#[test]
fn v090_multipath_level_normalizes_to_raid1() {
    let size = 20_000;
    let sector = (size & !127) - 128;
    let mut disk = disk_with(
        size,
        &[(
            sector,
            &v090_superblock(V090 {
                level: -4,
                ..V090::default()
            }),
        )],
    );
    assert_eq!(detect(&mut disk).unwrap().raid_level, 1);
}

#[test]
fn v090_rejects_unsupported_level_and_version() {
    let size = 20_000;
    let sector = (size & !127) - 128;

    let mut disk = disk_with(
        size,
        &[(
            sector,
            &v090_superblock(V090 {
                level: 7,
                ..V090::default()
            }),
        )],
    );
    assert_eq!(detect(&mut disk).unwrap_err(), RaidError::UnsupportedLevel(7));

    let mut disk = disk_with(
        size,
        &[(
            sector,
            &v090_superblock(V090 {
                minor: 91,
                ..V090::default()
            }),
        )],
    );
    assert_eq!(
        detect(&mut disk).unwrap_err(),
        RaidError::UnsupportedVersion {
            major: 0,
            minor: 91
        }
    );
}

#[test]
fn blank_and_tiny_devices_are_not_raid() {
    assert_eq!(detect(&mut MemDisk::new(20_000)).unwrap_err(), RaidError::NotRaid);
    assert_eq!(detect(&mut MemDisk::new(20)).unwrap_err(), RaidError::NotRaid);
    assert_eq!(detect(&mut MemDisk::new(0)).unwrap_err(), RaidError::NotRaid);
}

#[test]
fn read_errors_abort_detection() {
    let end = (4096 - 16) & !7;
    let mut disk = FlakyDisk {
        inner: disk_with(4096, &[(8, &v1_superblock(8, 10, 1))]),
        bad_sector: end,
    };
    assert_eq!(
        detect(&mut disk).unwrap_err(),
        RaidError::Disk(DiskError::ReadError("flaky".into()))
    );
}

#[test]
fn mdraid_detector_works_through_trait_objects() {
    let detectors: Vec<Box<dyn RaidDetector>> = vec![Box::new(MdRaid)];
    let mut disk = disk_with(4096, &[(0, &v1_superblock(0, 1, 0))]);

    assert_eq!(detectors[0].name(), "mdraid");
    let desc = detectors[0].detect(&mut disk).unwrap();
    assert_eq!(desc.array_uuid, UUID);
}

proptest! {
    #[test]
    fn prop_v1_copy_is_only_accepted_where_it_claims_to_be(
        // Large enough that the v0.90 slot never overlaps a v1.x candidate.
        size in 256u64..4096,
        claimed in 0u64..4096,
        pick in 0usize..3,
    ) {
        let end = (size - 16) & !7;
        let placed = [end, 0, 8][pick];
        let mut disk = disk_with(size, &[(placed, &v1_superblock(claimed, 1, 0))]);

        let result = detect(&mut disk);
        if claimed == placed {
            prop_assert_eq!(result.map(|d| d.format_version), Ok(FormatVersion::V1));
        } else {
            prop_assert_eq!(result.unwrap_err(), RaidError::NotRaid);
        }
    }
}
