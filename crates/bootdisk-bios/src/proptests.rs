use crate::emulated::{EmulatedDrive, EmulatedFirmware, FirmwareCall};
use crate::{BiosDisk, BiosDiskConfig, Direction};
use bootdisk_storage::MemDisk;
use proptest::prelude::*;

const DISK_SECTORS: u64 = 1_000_000;

fn disk_with(drive: EmulatedDrive) -> BiosDisk<EmulatedFirmware> {
    let mut fw = EmulatedFirmware::new();
    fw.attach(0x80, drive);
    let mut disk = BiosDisk::new(fw, BiosDiskConfig::default()).unwrap();
    disk.resolve(0x80).unwrap();
    disk.firmware_mut().clear_calls();
    disk
}

/// `(is_extended, sectors)` for every transfer attempt in the call log.
fn attempts(fw: &EmulatedFirmware) -> Vec<(bool, u64)> {
    fw.calls()
        .iter()
        .filter_map(|call| match *call {
            FirmwareCall::Legacy { count, .. } => Some((false, u64::from(count))),
            FirmwareCall::Extended { blocks, .. } => Some((true, u64::from(blocks))),
            FirmwareCall::Reset { .. } => None,
        })
        .collect()
}

fn fixed_drive_strategy() -> impl Strategy<Value = EmulatedDrive> {
    (1u64..=127, any::<bool>(), any::<bool>()).prop_map(|(ceiling, extensions, broken)| {
        let mut drive = EmulatedDrive::fixed(MemDisk::new(DISK_SECTORS)).with_max_transfer(ceiling);
        if !extensions {
            drive = drive.without_extensions();
        } else if broken {
            drive = drive.with_broken_extensions();
        }
        drive
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_chs_attempts_never_cross_a_track(
        heads in 1u32..=16,
        spt in 1u32..=63,
        sector_seed in any::<u64>(),
        count in 1u64..=200,
    ) {
        let cylinders = 64u32;
        let total = u64::from(cylinders * heads * spt);
        let sector = sector_seed % total;
        let drive = EmulatedDrive::fixed(MemDisk::new(total))
            .with_geometry(cylinders, heads, spt)
            .without_extensions();
        let mut disk = disk_with(drive);

        let moved = disk.transfer(0x80, Direction::Read, sector, count).unwrap();
        prop_assert!(moved >= 1);
        prop_assert!(sector % u64::from(spt) + moved <= u64::from(spt));

        for call in disk.firmware().calls() {
            if let FirmwareCall::Legacy { chs, count, .. } = *call {
                prop_assert!(u32::from(chs.sector) - 1 + u32::from(count) <= spt);
            }
        }
    }

    #[test]
    fn prop_single_call_degrades_monotonically(
        drive in fixed_drive_strategy(),
        sector in 0u64..DISK_SECTORS - 256,
        count in 1u64..=256,
    ) {
        let mut disk = disk_with(drive);
        let _ = disk.transfer(0x80, Direction::Read, sector, count);

        let seen = attempts(disk.firmware());
        prop_assert!(!seen.is_empty());
        for pair in seen.windows(2) {
            prop_assert!(pair[1].1 <= pair[0].1, "attempt grew: {:?}", seen);
            // Extended -> legacy is the only permitted switch.
            prop_assert!(pair[0].0 || !pair[1].0, "switched back to LBA: {:?}", seen);
        }
        let flips = seen.windows(2).filter(|pair| pair[0].0 != pair[1].0).count();
        prop_assert!(flips <= 1);
    }

    #[test]
    fn prop_learned_cap_sticks_across_calls(
        ceiling in 1u64..=126,
        // Large enough that the first attempt always trips the ceiling.
        first in 127u64..=256,
        second in 1u64..=256,
        sector in 0u64..DISK_SECTORS / 2,
    ) {
        let drive = EmulatedDrive::fixed(MemDisk::new(DISK_SECTORS)).with_max_transfer(ceiling);
        let mut disk = disk_with(drive);

        disk.transfer(0x80, Direction::Read, sector, first).unwrap();
        disk.firmware_mut().clear_calls();
        disk.transfer(0x80, Direction::Read, sector + 256, second).unwrap();

        let seen = attempts(disk.firmware());
        prop_assert_eq!(seen.len(), 1, "second call needed retries: {:?}", seen);
        prop_assert!(seen[0].1 <= ceiling);
    }
}
