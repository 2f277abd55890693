//! Safe transfer engine: one sector range per call, with the retry/degradation ladder.
//!
//! A call starts from the drive's learned transfer cap. Whenever the firmware refuses a request
//! the drive is reset and the cap steps down (`> 63` to 63, `> 7` to 7, `> 1` to 1). When even
//! single-sector extended transfers fail, the drive falls back to CHS addressing. Every step is
//! written into the [`GeometryRecord`] so later calls start from what was learned.
//!
//! The data always lives at offset 0 of the [`ScratchBuffer`]: callers stage writes there before
//! the call and copy reads out afterwards.

use bootdisk_storage::{DiskError, Result, SECTOR_SIZE};
use tracing::{debug, trace, warn};

use crate::firmware::{Chs, Direction, DiskAddressPacket, DiskFirmware, Int13Status};
use crate::geometry::{AddressingMode, GeometryFlags, GeometryRecord};
use crate::{drive_name, BiosDiskConfig, ScratchBuffer, CHS_SECTOR_LIMIT, DEFAULT_MAX_SECTORS};

/// Largest cylinder number the CHS services can encode.
const CHS_MAX_CYLINDERS: u64 = 1024;

/// Outcome of a single firmware attempt.
#[derive(Debug)]
enum Failure {
    /// The firmware refused the request; a smaller or differently addressed attempt may work.
    Retryable(Int13Status),
    /// Retrying cannot help (out-of-range address, exhausted optical retries).
    Fatal(DiskError),
}

/// Transfers up to `count` native sectors starting at `sector`, returning how many were moved.
///
/// The returned count is at least 1 when `count` is non-zero. Callers loop, feeding the count back
/// in, until their request is satisfied. An `Err` means the whole ladder was exhausted or the
/// address is unreachable; the record keeps whatever degradation was learned on the way.
pub fn transfer<F: DiskFirmware + ?Sized>(
    fw: &mut F,
    config: &BiosDiskConfig,
    record: &mut GeometryRecord,
    scratch: &mut ScratchBuffer,
    direction: Direction,
    sector: u64,
    count: u64,
) -> Result<u64> {
    if count == 0 {
        return Ok(0);
    }
    if record.is_optical() && direction == Direction::Write {
        return Err(DiskError::ReadOnly(drive_name(record.drive)));
    }

    let mut len = count;
    let mut max = u64::from(record.max_sectors.max(1));

    loop {
        if record.addressing_mode() == AddressingMode::LegacyChs {
            len = len.min(remaining_in_track(record, sector));
        }
        len = len.min(max);

        let status = match attempt(fw, config, record, scratch, direction, sector, len) {
            Ok(()) => {
                record.max_sectors = max as u32;
                return Ok(len);
            }
            Err(Failure::Fatal(err)) => return Err(err),
            Err(Failure::Retryable(status)) => status,
        };

        let default_max = u64::from(DEFAULT_MAX_SECTORS);
        if len > default_max {
            max = default_max;
        } else if len > 7 {
            max = 7;
        } else if len > 1 {
            max = 1;
        } else if record.flags.contains(GeometryFlags::LBA) {
            record.flags.remove(GeometryFlags::LBA);
            max = u64::from(record.chs_max_sectors.max(1));
            warn!(
                drive = %drive_name(record.drive),
                %status,
                "extended transfers keep failing; falling back to CHS addressing"
            );
        } else {
            debug!(drive = %drive_name(record.drive), sector, %status, "transfer ladder exhausted");
            return Err(match direction {
                Direction::Read => DiskError::ReadError(drive_name(record.drive)),
                Direction::Write => DiskError::WriteError(drive_name(record.drive)),
            });
        }

        if max < u64::from(record.max_sectors) {
            warn!(
                drive = %drive_name(record.drive),
                %status,
                from = record.max_sectors,
                to = max,
                "lowering transfer cap"
            );
        }
        record.max_sectors = max as u32;
        fw.reset(record.drive);
    }
}

/// Sectors left in the track containing `sector`.
pub fn remaining_in_track(record: &GeometryRecord, sector: u64) -> u64 {
    let spt = u64::from(record.sectors.max(1));
    spt - sector % spt
}

/// Translates a logical sector into CHS coordinates for `record`'s geometry.
pub fn chs_for(record: &GeometryRecord, sector: u64) -> Result<Chs> {
    let device = || DiskError::OutOfRange {
        device: drive_name(record.drive),
        sector,
    };
    if sector > CHS_SECTOR_LIMIT {
        return Err(device());
    }
    let spt = u64::from(record.sectors.max(1));
    let heads = u64::from(record.heads.max(1));
    let track = sector / spt;
    let cylinder = track / heads;
    if cylinder >= CHS_MAX_CYLINDERS {
        return Err(device());
    }
    Ok(Chs::new(
        cylinder as u16,
        (track % heads) as u8,
        (sector % spt + 1) as u8,
    ))
}

fn attempt<F: DiskFirmware + ?Sized>(
    fw: &mut F,
    config: &BiosDiskConfig,
    record: &GeometryRecord,
    scratch: &mut ScratchBuffer,
    direction: Direction,
    sector: u64,
    len: u64,
) -> std::result::Result<(), Failure> {
    let drive = record.drive;

    if record.is_optical() {
        let shift = config.optical_sector_shift;
        let ratio = config.optical_ratio();
        let blocks = len.div_ceil(ratio);
        let packet = DiskAddressPacket {
            blocks: blocks as u16,
            buffer: scratch.far_ptr(0),
            block: sector >> shift,
        }
        .encode();
        let buf = scratch
            .region_mut(0, (blocks * ratio) as usize * SECTOR_SIZE)
            .map_err(Failure::Fatal)?;

        let mut last = None;
        for _ in 0..config.cdrom_retry_count {
            trace!(drive, block = sector >> shift, blocks, "optical extended read");
            match fw.extended_transfer(Direction::Read, drive, &packet, buf) {
                Ok(()) => return Ok(()),
                Err(status) => last = Some(status),
            }
        }
        debug!(drive = %drive_name(drive), status = ?last, "optical read retries exhausted");
        return Err(Failure::Fatal(DiskError::ReadError(drive_name(drive))));
    }

    let buffer = scratch.far_ptr(0);
    let buf = scratch
        .region_mut(0, len as usize * SECTOR_SIZE)
        .map_err(Failure::Fatal)?;

    match record.addressing_mode() {
        AddressingMode::ExtendedLba => {
            let packet = DiskAddressPacket {
                blocks: len as u16,
                buffer,
                block: sector,
            }
            .encode();
            trace!(drive, sector, len, ?direction, "extended transfer");
            fw.extended_transfer(direction, drive, &packet, buf)
                .map_err(Failure::Retryable)
        }
        AddressingMode::LegacyChs => {
            let chs = chs_for(record, sector).map_err(Failure::Fatal)?;
            trace!(drive, ?chs, len, ?direction, "legacy transfer");
            fw.legacy_transfer(direction, drive, chs, len as u8, buf)
                .map_err(Failure::Retryable)
        }
    }
}
