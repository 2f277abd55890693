//! Drive geometry probing and the per-session geometry cache.

use bitflags::bitflags;
use bootdisk_storage::util::{le_u16, le_u32, put_le_u16};
use bootdisk_storage::{DiskError, Result, SECTOR_SIZE, UNKNOWN_TOTAL_SECTORS};
use tracing::{debug, warn};

use crate::firmware::{
    Chs, Direction, DiskFirmware, DriveParameters, DRP_CYLINDERS_OVERFLOW, DRP_SIZE,
};
use crate::{drive_name, ScratchBuffer, DEFAULT_MAX_SECTORS, MAX_SECTORS, OPTICAL_MAX_SECTORS};

/// "FBBF" read as a little-endian dword.
pub const FB_MAGIC: u32 = 0x4642_4246;

/// Boot signature stored in the last word of a boot sector.
pub const BOOT_SIGNATURE: u16 = 0xaa55;

const FB_MAX_SEC_OFFSET: usize = 0x1ad;
const FB_LBA_OFFSET: usize = 0x1ae;
const FB_SPT_OFFSET: usize = 0x1b0;
const FB_HEADS_OFFSET: usize = 0x1b1;
const FB_BOOT_BASE_OFFSET: usize = 0x1b2;
const FB_MAGIC_OFFSET: usize = 0x1b4;
const END_MAGIC_OFFSET: usize = 0x1fe;

// Floppy BPB fields.
const BPB_SECTORS_PER_TRACK_OFFSET: usize = 0x18;
const BPB_HEADS_OFFSET: usize = 0x1a;

const DEFAULT_FIXED_HEADS: u32 = 255;
const DEFAULT_FIXED_SECTORS: u32 = 63;
const DEFAULT_FLOPPY_HEADS: u32 = 2;
const DEFAULT_FLOPPY_SECTORS: u32 = 18;
const FLOPPY_CYLINDERS: u32 = 1024;

// Set in the FB `max_sec` byte to force CHS addressing.
const FB_CHS_ONLY: u8 = 0x80;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GeometryFlags: u8 {
        /// The drive is addressed through the extended (LBA) services.
        const LBA = 1 << 0;
        /// The drive is the no-emulation optical boot device.
        const CDROM = 1 << 1;
        /// The drive carries an FB override descriptor that was applied.
        const FB = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    LegacyChs,
    ExtendedLba,
}

/// Everything the transfer engine needs to know about one drive.
///
/// `max_sectors` and the `LBA` flag are tuned downward by the transfer engine when the firmware
/// rejects requests; the rest is fixed after probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryRecord {
    pub drive: u8,
    pub flags: GeometryFlags,
    pub sectors: u32,
    pub heads: u32,
    pub cylinders: u32,
    pub max_sectors: u32,
    /// Cap restored when a transfer falls back from LBA to CHS.
    pub chs_max_sectors: u32,
    pub total_sectors: u64,
}

impl GeometryRecord {
    fn optical(drive: u8) -> Self {
        Self {
            drive,
            flags: GeometryFlags::LBA | GeometryFlags::CDROM,
            sectors: OPTICAL_MAX_SECTORS,
            heads: 0,
            cylinders: 0,
            max_sectors: OPTICAL_MAX_SECTORS,
            chs_max_sectors: OPTICAL_MAX_SECTORS,
            total_sectors: UNKNOWN_TOTAL_SECTORS,
        }
    }

    pub fn addressing_mode(&self) -> AddressingMode {
        if self.flags.contains(GeometryFlags::LBA) {
            AddressingMode::ExtendedLba
        } else {
            AddressingMode::LegacyChs
        }
    }

    pub fn is_optical(&self) -> bool {
        self.flags.contains(GeometryFlags::CDROM)
    }

    pub fn has_fb_override(&self) -> bool {
        self.flags.contains(GeometryFlags::FB)
    }

    /// Sectors reachable with the recorded CHS geometry.
    pub fn chs_capacity(&self) -> u64 {
        u64::from(self.cylinders)
            .saturating_mul(u64::from(self.heads))
            .saturating_mul(u64::from(self.sectors))
    }
}

/// Geometry records for every drive probed in this session, keyed by drive number.
///
/// A handful of drives at most, so lookups are a linear scan.
#[derive(Debug, Default)]
pub struct GeometryTable {
    records: Vec<GeometryRecord>,
}

impl GeometryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, drive: u8) -> Option<&GeometryRecord> {
        self.records.iter().find(|r| r.drive == drive)
    }

    pub fn get_mut(&mut self, drive: u8) -> Option<&mut GeometryRecord> {
        self.records.iter_mut().find(|r| r.drive == drive)
    }

    /// Inserts `record`, replacing any previous record for the same drive.
    pub fn insert(&mut self, record: GeometryRecord) -> &mut GeometryRecord {
        let idx = match self.records.iter().position(|r| r.drive == record.drive) {
            Some(idx) => {
                self.records[idx] = record;
                idx
            }
            None => {
                self.records.push(record);
                self.records.len() - 1
            }
        };
        &mut self.records[idx]
    }

    /// Drops the cached record so the next lookup probes the drive again.
    pub fn invalidate(&mut self, drive: u8) -> Option<GeometryRecord> {
        let idx = self.records.iter().position(|r| r.drive == drive)?;
        Some(self.records.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeometryRecord> {
        self.records.iter()
    }
}

/// FB override descriptor embedded in sector 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbDescriptor {
    pub max_sec: u8,
    pub lba: u16,
    pub spt: u8,
    pub heads: u8,
    pub boot_base: u16,
}

impl FbDescriptor {
    /// Returns the descriptor if both the FB magic and the boot signature are present.
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if !has_fb_magic(sector) || end_word(sector) != BOOT_SIGNATURE {
            return None;
        }
        Some(Self {
            max_sec: sector[FB_MAX_SEC_OFFSET],
            lba: le_u16(sector, FB_LBA_OFFSET),
            spt: sector[FB_SPT_OFFSET],
            heads: sector[FB_HEADS_OFFSET],
            boot_base: le_u16(sector, FB_BOOT_BASE_OFFSET),
        })
    }

    /// Stamps the descriptor into a boot sector, including magic and signature.
    pub fn write_to(&self, sector: &mut [u8]) {
        sector[FB_MAX_SEC_OFFSET] = self.max_sec;
        put_le_u16(sector, FB_LBA_OFFSET, self.lba);
        sector[FB_SPT_OFFSET] = self.spt;
        sector[FB_HEADS_OFFSET] = self.heads;
        put_le_u16(sector, FB_BOOT_BASE_OFFSET, self.boot_base);
        sector[FB_MAGIC_OFFSET..FB_MAGIC_OFFSET + 4].copy_from_slice(&FB_MAGIC.to_le_bytes());
        put_le_u16(sector, END_MAGIC_OFFSET, BOOT_SIGNATURE);
    }
}

fn has_fb_magic(sector: &[u8]) -> bool {
    le_u32(sector, FB_MAGIC_OFFSET) == FB_MAGIC
}

fn end_word(sector: &[u8]) -> u16 {
    le_u16(sector, END_MAGIC_OFFSET)
}

fn in_range_or(value: u32, max: u32, default: u32) -> u32 {
    if (1..=max).contains(&value) {
        value
    } else {
        default
    }
}

pub(crate) fn is_fixed_disk(drive: u8) -> bool {
    drive & 0x80 != 0
}

/// Probes `drive` and builds its geometry record.
///
/// Only a failed read of sector 0 is an error. Missing extensions, zeroed fields and a failed FB
/// refinement are absorbed into defaults.
pub(crate) fn probe_drive<F: DiskFirmware + ?Sized>(
    fw: &mut F,
    scratch: &mut ScratchBuffer,
    drive: u8,
    cd_drive: Option<u8>,
) -> Result<GeometryRecord> {
    if cd_drive == Some(drive) {
        let record = GeometryRecord::optical(drive);
        debug!(drive = %drive_name(drive), "using synthetic optical geometry");
        return Ok(record);
    }

    let mut boot = [0u8; SECTOR_SIZE];
    {
        let buf = scratch.region_mut(0, SECTOR_SIZE)?;
        if let Err(status) = fw.legacy_transfer(Direction::Read, drive, Chs::new(0, 0, 1), 1, buf)
        {
            debug!(drive = %drive_name(drive), %status, "initial probe failed");
            return Err(DiskError::DeviceUnreachable(drive_name(drive)));
        }
        boot.copy_from_slice(buf);
    }
    let fb = FbDescriptor::parse(&boot);

    let mut flags = GeometryFlags::empty();
    let mut total_sectors = 0u64;
    let mut sectors;
    let mut heads;
    let cylinders;

    if is_fixed_disk(drive) {
        if fw.check_extensions(drive).is_some() {
            let mut block = [0u8; DRP_SIZE];
            put_le_u16(&mut block, 0, DRP_SIZE as u16);
            if fw.get_extended_params(drive, &mut block).is_ok() {
                let drp = DriveParameters::parse(&block);
                flags |= GeometryFlags::LBA;
                total_sectors = if drp.cylinders == DRP_CYLINDERS_OVERFLOW {
                    UNKNOWN_TOTAL_SECTORS
                } else if drp.total_sectors != 0 {
                    drp.total_sectors
                } else {
                    // Some firmware zeroes the total; rebuild it from the same block.
                    // A product that does not fit is as good as no size at all.
                    u64::from(drp.cylinders)
                        .checked_mul(u64::from(drp.heads))
                        .and_then(|n| n.checked_mul(u64::from(drp.sectors)))
                        .unwrap_or(UNKNOWN_TOTAL_SECTORS)
                };
            }
        }

        match fw.get_legacy_params(drive) {
            Ok(legacy) => {
                cylinders = legacy.cylinders;
                heads = in_range_or(legacy.heads, 255, DEFAULT_FIXED_HEADS);
                sectors = in_range_or(legacy.sectors, 63, DEFAULT_FIXED_SECTORS);
            }
            Err(status) => {
                debug!(drive = %drive_name(drive), %status, "no legacy geometry; using defaults");
                cylinders = 0;
                heads = DEFAULT_FIXED_HEADS;
                sectors = DEFAULT_FIXED_SECTORS;
            }
        }
    } else {
        sectors = in_range_or(
            u32::from(le_u16(&boot, BPB_SECTORS_PER_TRACK_OFFSET)),
            63,
            DEFAULT_FLOPPY_SECTORS,
        );
        heads = in_range_or(
            u32::from(le_u16(&boot, BPB_HEADS_OFFSET)),
            255,
            DEFAULT_FLOPPY_HEADS,
        );
        cylinders = FLOPPY_CYLINDERS;
    }

    let mut max_sectors = DEFAULT_MAX_SECTORS;
    let mut refined = true;
    if let Some(fb) = fb {
        max_sectors = u32::from(fb.max_sec);
        if fb.max_sec & FB_CHS_ONLY != 0 {
            max_sectors &= 0x7f;
            flags.remove(GeometryFlags::LBA);
        }

        if !flags.contains(GeometryFlags::LBA) {
            match refine_chs(fw, scratch, drive, &fb) {
                Some((spt, nheads)) => {
                    sectors = spt;
                    heads = nheads;
                }
                None => {
                    warn!(
                        drive = %drive_name(drive),
                        "FB geometry refinement failed; keeping CHS baseline"
                    );
                    refined = false;
                }
            }
        }

        if refined {
            flags |= GeometryFlags::FB;
        }
    }
    let max_sectors = max_sectors.max(1);
    let chs_max_sectors = max_sectors;

    let raise = refined && flags.contains(GeometryFlags::LBA) && max_sectors == DEFAULT_MAX_SECTORS;
    let max_sectors = if raise { MAX_SECTORS } else { max_sectors };

    let chs_total = u64::from(cylinders) * u64::from(heads) * u64::from(sectors);
    let total_sectors = total_sectors.max(chs_total);

    let record = GeometryRecord {
        drive,
        flags,
        sectors,
        heads,
        cylinders,
        max_sectors,
        chs_max_sectors,
        total_sectors,
    };
    debug!(
        drive = %drive_name(drive),
        mode = ?record.addressing_mode(),
        sectors,
        heads,
        cylinders,
        max_sectors,
        total_sectors,
        "resolved drive geometry"
    );
    Ok(record)
}

/// Derives sectors-per-track and heads from an FB-formatted drive.
///
/// FB drives store each sector's own LBA in its trailing word. Reading the first sector of the
/// second track gives the track length, and the first sector of the second cylinder gives the
/// cylinder length. Returns `None` on any read failure or inconsistent value.
fn refine_chs<F: DiskFirmware + ?Sized>(
    fw: &mut F,
    scratch: &mut ScratchBuffer,
    drive: u8,
    fb: &FbDescriptor,
) -> Option<(u32, u32)> {
    let ofs = u32::from(fb.lba);

    let buf = scratch.region_mut(0, SECTOR_SIZE).ok()?;
    fw.legacy_transfer(Direction::Read, drive, Chs::new(0, 1, 1), 1, buf)
        .ok()?;
    let mut lba = end_word(buf);
    if lba == BOOT_SIGNATURE {
        if !has_fb_magic(buf) {
            return None;
        }
        lba = le_u16(buf, FB_LBA_OFFSET);
    }
    let sectors = u32::from(lba).checked_sub(ofs)?;
    if !(1..=63).contains(&sectors) {
        return None;
    }

    let buf = scratch.region_mut(0, SECTOR_SIZE).ok()?;
    fw.legacy_transfer(Direction::Read, drive, Chs::new(1, 0, 1), 1, buf)
        .ok()?;
    let lba = end_word(buf);
    if lba == BOOT_SIGNATURE {
        return None;
    }
    let cylinder_len = u32::from(lba).checked_sub(ofs)?;
    if cylinder_len % sectors != 0 {
        return None;
    }
    let heads = cylinder_len / sectors;
    if !(1..=255).contains(&heads) {
        return None;
    }

    Some((sectors, heads))
}
