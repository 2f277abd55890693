//! Host-side [`DiskFirmware`] backed by [`BlockDevice`] images.
//!
//! Each drive number maps to an [`EmulatedDrive`] describing its media and how the firmware should
//! misbehave. Fault injection covers the failure shapes seen on real machines: a per-call transfer
//! ceiling, extensions that are advertised but do not work, drives that never answer, and a number
//! of transient failures before a drive starts responding. Every transfer and reset is recorded in
//! a call log.

use std::collections::BTreeMap;

use bootdisk_storage::{BlockDevice, DiskError, SECTOR_SIZE};
use tracing::trace;

use crate::firmware::{
    CdSpecPacket, Chs, Direction, DiskAddressPacket, DiskFirmware, DriveParameters, Int13Status,
    LegacyGeometry, CD_MEDIA_NO_EMULATION, CD_SPEC_PACKET_SIZE, DAP_SIZE, DRP_SIZE,
};

/// Version reported by AH=41h (EDD 3.0).
pub const EXTENSIONS_VERSION: u8 = 0x30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Fixed,
    Floppy,
    /// No-emulation optical media addressed in 2048-byte blocks.
    Optical,
}

/// One firmware call that touched a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareCall {
    Legacy {
        direction: Direction,
        drive: u8,
        chs: Chs,
        count: u8,
    },
    Extended {
        direction: Direction,
        drive: u8,
        block: u64,
        blocks: u16,
    },
    Reset {
        drive: u8,
    },
}

pub struct EmulatedDrive {
    kind: MediaKind,
    media: Box<dyn BlockDevice>,
    legacy: LegacyGeometry,
    extensions: bool,
    broken_extensions: bool,
    drive_parameters: Option<DriveParameters>,
    max_transfer: Option<u64>,
    unreachable: bool,
    transient_failures: u32,
}

impl std::fmt::Debug for EmulatedDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedDrive")
            .field("kind", &self.kind)
            .field("legacy", &self.legacy)
            .field("extensions", &self.extensions)
            .field("broken_extensions", &self.broken_extensions)
            .field("drive_parameters", &self.drive_parameters)
            .field("max_transfer", &self.max_transfer)
            .field("unreachable", &self.unreachable)
            .field("transient_failures", &self.transient_failures)
            .finish_non_exhaustive()
    }
}

impl EmulatedDrive {
    const OPTICAL_BLOCK_SECTORS: u64 = 4;

    /// A hard disk with extensions and a `255 x 63` translated legacy geometry.
    pub fn fixed(media: impl BlockDevice + 'static) -> Self {
        let cylinders = (media.total_sectors() / (255 * 63)).clamp(1, 1024) as u32;
        Self::new(
            MediaKind::Fixed,
            Box::new(media),
            LegacyGeometry {
                cylinders,
                heads: 255,
                sectors: 63,
            },
            true,
        )
    }

    /// A 1.44 MiB-style floppy drive without extensions.
    pub fn floppy(media: impl BlockDevice + 'static) -> Self {
        Self::new(
            MediaKind::Floppy,
            Box::new(media),
            LegacyGeometry {
                cylinders: 80,
                heads: 2,
                sectors: 18,
            },
            false,
        )
    }

    /// A no-emulation optical drive. Only extended reads are served.
    pub fn optical(media: impl BlockDevice + 'static) -> Self {
        Self::new(
            MediaKind::Optical,
            Box::new(media),
            LegacyGeometry {
                cylinders: 0,
                heads: 0,
                sectors: 0,
            },
            true,
        )
    }

    fn new(
        kind: MediaKind,
        media: Box<dyn BlockDevice>,
        legacy: LegacyGeometry,
        extensions: bool,
    ) -> Self {
        Self {
            kind,
            media,
            legacy,
            extensions,
            broken_extensions: false,
            drive_parameters: None,
            max_transfer: None,
            unreachable: false,
            transient_failures: 0,
        }
    }

    /// Geometry reported by AH=08h and used to translate CHS requests.
    pub fn with_geometry(mut self, cylinders: u32, heads: u32, sectors: u32) -> Self {
        self.legacy = LegacyGeometry {
            cylinders,
            heads,
            sectors,
        };
        self
    }

    pub fn without_extensions(mut self) -> Self {
        self.extensions = false;
        self
    }

    /// Overrides the block returned by AH=48h.
    pub fn with_drive_parameters(mut self, params: DriveParameters) -> Self {
        self.drive_parameters = Some(params);
        self
    }

    /// Rejects any single transfer of more than `sectors` blocks.
    pub fn with_max_transfer(mut self, sectors: u64) -> Self {
        self.max_transfer = Some(sectors);
        self
    }

    /// Advertises extensions but fails every extended transfer.
    pub fn with_broken_extensions(mut self) -> Self {
        self.broken_extensions = true;
        self
    }

    /// Fails every call, including the initial probe.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Fails the next `count` transfers before serving requests normally.
    pub fn with_transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Makes the next `count` transfers fail on an already attached drive.
    pub fn inject_transient_failures(&mut self, count: u32) {
        self.transient_failures = count;
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    fn take_transient_failure(&mut self) -> bool {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            true
        } else {
            false
        }
    }

    fn check_ceiling(&self, blocks: u64) -> Result<(), Int13Status> {
        match self.max_transfer {
            Some(max) if blocks > max => Err(Int13Status::DMA_BOUNDARY),
            _ => Ok(()),
        }
    }

    fn move_sectors(
        &mut self,
        direction: Direction,
        sector: u64,
        buf: &mut [u8],
    ) -> Result<(), Int13Status> {
        let res = match direction {
            Direction::Read => self.media.read_sectors(sector, buf),
            Direction::Write => self.media.write_sectors(sector, buf),
        };
        res.map_err(|err| match err {
            DiskError::ReadOnly(_) => Int13Status::WRITE_PROTECTED,
            _ => Int13Status::SECTOR_NOT_FOUND,
        })
    }
}

/// Emulated INT 13h firmware.
#[derive(Default)]
pub struct EmulatedFirmware {
    drives: BTreeMap<u8, EmulatedDrive>,
    boot_drive: u8,
    floppy_count: Option<u8>,
    calls: Vec<FirmwareCall>,
}

impl EmulatedFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `drive` under BIOS drive number `number`, replacing any previous drive.
    pub fn attach(&mut self, number: u8, drive: EmulatedDrive) -> &mut Self {
        self.drives.insert(number, drive);
        self
    }

    pub fn detach(&mut self, number: u8) -> Option<EmulatedDrive> {
        self.drives.remove(&number)
    }

    /// Drive number passed in `DL` at boot; the optical status call only answers for it.
    pub fn set_boot_drive(&mut self, number: u8) {
        self.boot_drive = number;
    }

    pub fn boot_drive(&self) -> u8 {
        self.boot_drive
    }

    /// Overrides the floppy count from the equipment word. By default the attached floppies
    /// are counted.
    pub fn set_floppy_count(&mut self, count: u8) {
        self.floppy_count = Some(count);
    }

    pub fn drive(&self, number: u8) -> Option<&EmulatedDrive> {
        self.drives.get(&number)
    }

    pub fn drive_mut(&mut self, number: u8) -> Option<&mut EmulatedDrive> {
        self.drives.get_mut(&number)
    }

    pub fn media_mut(&mut self, number: u8) -> Option<&mut (dyn BlockDevice + 'static)> {
        self.drives.get_mut(&number).map(|d| d.media.as_mut())
    }

    pub fn calls(&self) -> &[FirmwareCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn reachable(&mut self, number: u8) -> Result<&mut EmulatedDrive, Int13Status> {
        match self.drives.get_mut(&number) {
            Some(drive) if !drive.unreachable => Ok(drive),
            _ => Err(Int13Status::TIMEOUT),
        }
    }
}

impl DiskFirmware for EmulatedFirmware {
    fn legacy_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        chs: Chs,
        count: u8,
        buf: &mut [u8],
    ) -> Result<(), Int13Status> {
        self.calls.push(FirmwareCall::Legacy {
            direction,
            drive,
            chs,
            count,
        });
        trace!(drive, ah = direction.legacy_function(), ?chs, count, "emulated legacy transfer");

        let disk = self.reachable(drive)?;
        if disk.kind == MediaKind::Optical {
            return Err(Int13Status::INVALID_COMMAND);
        }
        if disk.take_transient_failure() {
            return Err(Int13Status::TIMEOUT);
        }
        disk.check_ceiling(u64::from(count))?;

        let geom = disk.legacy;
        if count == 0
            || chs.sector == 0
            || u32::from(chs.sector) + u32::from(count) - 1 > geom.sectors
            || u32::from(chs.head) >= geom.heads
            || u32::from(chs.cylinder) >= geom.cylinders
            || buf.len() != usize::from(count) * SECTOR_SIZE
        {
            return Err(Int13Status::SECTOR_NOT_FOUND);
        }
        let lba = chs
            .to_lba(geom.heads, geom.sectors)
            .ok_or(Int13Status::SECTOR_NOT_FOUND)?;
        disk.move_sectors(direction, lba, buf)
    }

    fn extended_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        packet: &[u8; DAP_SIZE],
        buf: &mut [u8],
    ) -> Result<(), Int13Status> {
        let dap = DiskAddressPacket::decode(packet).ok_or(Int13Status::INVALID_COMMAND)?;
        self.calls.push(FirmwareCall::Extended {
            direction,
            drive,
            block: dap.block,
            blocks: dap.blocks,
        });
        trace!(
            drive,
            ah = direction.extended_function(),
            block = dap.block,
            blocks = dap.blocks,
            "emulated extended transfer"
        );

        let disk = self.reachable(drive)?;
        if !disk.extensions || disk.broken_extensions {
            return Err(Int13Status::INVALID_COMMAND);
        }
        if disk.take_transient_failure() {
            return Err(Int13Status::TIMEOUT);
        }
        disk.check_ceiling(u64::from(dap.blocks))?;

        let block_sectors = match disk.kind {
            MediaKind::Optical => {
                if direction == Direction::Write {
                    return Err(Int13Status::WRITE_PROTECTED);
                }
                EmulatedDrive::OPTICAL_BLOCK_SECTORS
            }
            _ => 1,
        };
        let sectors = u64::from(dap.blocks) * block_sectors;
        if dap.blocks == 0 || buf.len() as u64 != sectors * SECTOR_SIZE as u64 {
            return Err(Int13Status::INVALID_COMMAND);
        }
        let start = dap
            .block
            .checked_mul(block_sectors)
            .ok_or(Int13Status::SECTOR_NOT_FOUND)?;
        disk.move_sectors(direction, start, buf)
    }

    fn check_extensions(&mut self, drive: u8) -> Option<u8> {
        let disk = self.reachable(drive).ok()?;
        disk.extensions.then_some(EXTENSIONS_VERSION)
    }

    fn get_extended_params(
        &mut self,
        drive: u8,
        block: &mut [u8; DRP_SIZE],
    ) -> Result<(), Int13Status> {
        let disk = self.reachable(drive)?;
        if !disk.extensions {
            return Err(Int13Status::INVALID_COMMAND);
        }
        let params = disk.drive_parameters.unwrap_or(DriveParameters {
            flags: 0,
            cylinders: disk.legacy.cylinders,
            heads: disk.legacy.heads,
            sectors: disk.legacy.sectors,
            total_sectors: disk.media.total_sectors(),
            bytes_per_sector: SECTOR_SIZE as u16,
        });
        params.write_to(block);
        Ok(())
    }

    fn get_legacy_params(&mut self, drive: u8) -> Result<LegacyGeometry, Int13Status> {
        let disk = self.reachable(drive)?;
        match disk.kind {
            MediaKind::Optical => Err(Int13Status::INVALID_COMMAND),
            _ => Ok(disk.legacy),
        }
    }

    fn get_cdrom_status(
        &mut self,
        drive: u8,
        packet: &mut [u8; CD_SPEC_PACKET_SIZE],
    ) -> Result<(), Int13Status> {
        if drive != self.boot_drive {
            return Err(Int13Status::INVALID_COMMAND);
        }
        let disk = self.reachable(drive)?;
        if disk.kind != MediaKind::Optical {
            return Err(Int13Status::INVALID_COMMAND);
        }
        CdSpecPacket {
            media_type: CD_MEDIA_NO_EMULATION,
            drive_no: drive,
            controller_no: 0,
            image_lba: 0,
        }
        .write_to(packet);
        Ok(())
    }

    fn floppy_count(&mut self) -> u8 {
        self.floppy_count.unwrap_or_else(|| {
            self.drives
                .values()
                .filter(|d| d.kind == MediaKind::Floppy)
                .count() as u8
        })
    }

    fn reset(&mut self, drive: u8) {
        self.calls.push(FirmwareCall::Reset { drive });
        trace!(drive, "emulated reset");
    }
}
