use bootdisk_storage::util::sector_count;
use bootdisk_storage::{
    Disk, DiskBackend, DiskError, Result, SECTOR_SIZE, UNKNOWN_TOTAL_SECTORS,
};
use tracing::debug;

use crate::firmware::{CdSpecPacket, Direction, DiskFirmware};
use crate::geometry::{self, GeometryRecord, GeometryTable};
use crate::{transfer, BiosDiskConfig, ScratchBuffer, FIXED_DISK_BASE, MAX_SECTORS};

pub const BIOSDISK_BACKEND_NAME: &str = "biosdisk";

/// Alias that always names the drive the system booted from.
const BOOT_ALIAS: &str = "boot";

/// `hdN` for fixed disks (and the optical drive), `fdN` for floppies.
pub fn drive_name(drive: u8) -> String {
    if geometry::is_fixed_disk(drive) {
        format!("hd{}", drive & !FIXED_DISK_BASE)
    } else {
        format!("fd{drive}")
    }
}

/// Parses `hdN` / `fdN` into a BIOS drive number.
///
/// `N` must be plain decimal digits and the resulting number must stay within its drive class.
pub fn parse_drive_name(name: &str) -> Result<u8> {
    let unknown = || DiskError::UnknownDevice(name.to_string());

    let (base, digits) = if let Some(digits) = name.strip_prefix("hd") {
        (FIXED_DISK_BASE, digits)
    } else if let Some(digits) = name.strip_prefix("fd") {
        (0, digits)
    } else {
        return Err(unknown());
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unknown());
    }
    let index: u8 = digits.parse().map_err(|_| unknown())?;
    if index >= 0x80 {
        return Err(unknown());
    }
    Ok(base | index)
}

/// The `biosdisk` backend: enumerates, opens and moves data on BIOS drives.
pub struct BiosDisk<F> {
    firmware: F,
    config: BiosDiskConfig,
    table: GeometryTable,
    scratch: ScratchBuffer,
    cd_drive: Option<u8>,
}

impl<F: DiskFirmware> BiosDisk<F> {
    /// Validates `config` and asks the firmware whether the boot drive is a no-emulation CD.
    pub fn new(mut firmware: F, config: BiosDiskConfig) -> Result<Self> {
        config.validate()?;
        let cd_drive = detect_optical_drive(&mut firmware, config.boot_drive);
        if let Some(drive) = cd_drive {
            debug!(drive = %drive_name(drive), "booted from a no-emulation optical drive");
        }
        Ok(Self {
            scratch: ScratchBuffer::new(config.scratch_segment),
            firmware,
            config,
            table: GeometryTable::new(),
            cd_drive,
        })
    }

    pub fn config(&self) -> &BiosDiskConfig {
        &self.config
    }

    pub fn cd_drive(&self) -> Option<u8> {
        self.cd_drive
    }

    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    pub fn firmware_mut(&mut self) -> &mut F {
        &mut self.firmware
    }

    pub fn geometry_table(&self) -> &GeometryTable {
        &self.table
    }

    /// Returns the geometry of `drive`, probing the firmware only on first use.
    pub fn resolve(&mut self, drive: u8) -> Result<&GeometryRecord> {
        self.ensure_resolved(drive)?;
        self.table
            .get(drive)
            .ok_or_else(|| DiskError::BadDevice(drive_name(drive)))
    }

    /// Forgets the cached geometry so the next access probes `drive` again.
    pub fn invalidate(&mut self, drive: u8) -> Option<GeometryRecord> {
        self.table.invalidate(drive)
    }

    /// Runs one engine call for `drive`; the data lives at the start of the scratch buffer.
    pub fn transfer(
        &mut self,
        drive: u8,
        direction: Direction,
        sector: u64,
        count: u64,
    ) -> Result<u64> {
        self.ensure_resolved(drive)?;
        let Self {
            firmware,
            config,
            table,
            scratch,
            ..
        } = self;
        let record = table
            .get_mut(drive)
            .ok_or_else(|| DiskError::BadDevice(drive_name(drive)))?;
        transfer::transfer(firmware, config, record, scratch, direction, sector, count)
    }

    fn ensure_resolved(&mut self, drive: u8) -> Result<()> {
        if self.table.get(drive).is_some() {
            return Ok(());
        }
        let record = geometry::probe_drive(
            &mut self.firmware,
            &mut self.scratch,
            drive,
            self.cd_drive,
        )?;
        self.table.insert(record);
        Ok(())
    }

    /// Calls `hook` with the drive's name, and again with `boot` for the boot drive.
    /// Drives that cannot be probed are skipped silently.
    fn visit(&mut self, drive: u8, hook: &mut dyn FnMut(&str) -> bool) -> bool {
        if let Err(err) = self.ensure_resolved(drive) {
            debug!(drive = %drive_name(drive), %err, "skipping drive");
            return false;
        }
        if hook(&drive_name(drive)) {
            return true;
        }
        drive == self.config.boot_drive && hook(BOOT_ALIAS)
    }

    fn drive_of(disk: &Disk) -> Result<u8> {
        u8::try_from(disk.id).map_err(|_| DiskError::BadDevice(disk.name.clone()))
    }

    fn check_range(disk: &Disk, sector: u64, count: u64) -> Result<()> {
        if disk.total_sectors == UNKNOWN_TOTAL_SECTORS {
            return Ok(());
        }
        let out_of_range = || DiskError::OutOfRange {
            device: disk.name.clone(),
            sector,
        };
        let end = sector.checked_add(count).ok_or_else(out_of_range)?;
        if end > disk.total_sectors {
            return Err(out_of_range());
        }
        Ok(())
    }
}

impl<F: DiskFirmware> DiskBackend for BiosDisk<F> {
    fn name(&self) -> &'static str {
        BIOSDISK_BACKEND_NAME
    }

    fn iterate(&mut self, hook: &mut dyn FnMut(&str) -> bool) -> bool {
        let fixed_end = self.config.fixed_disk_end();
        for drive in u16::from(FIXED_DISK_BASE)..fixed_end {
            if self.visit(drive as u8, hook) {
                return true;
            }
        }

        if let Some(cd) = self.cd_drive {
            // An optical drive inside the fixed-disk range was already visited above.
            if u16::from(cd) >= fixed_end && self.visit(cd, hook) {
                return true;
            }
        }

        let mut floppies = self.firmware.floppy_count();
        if self.config.boot_drive == 0 && floppies == 0 {
            floppies = 1;
        }
        for drive in 0..floppies.min(FIXED_DISK_BASE) {
            if self.visit(drive, hook) {
                return true;
            }
        }

        false
    }

    fn open(&mut self, name: &str) -> Result<Disk> {
        let drive = if name == BOOT_ALIAS {
            self.config.boot_drive
        } else {
            parse_drive_name(name)?
        };
        let total_sectors = self.resolve(drive)?.total_sectors;
        debug!(name, drive = %drive_name(drive), total_sectors, "opened BIOS drive");
        Ok(Disk {
            name: name.to_string(),
            backend: BIOSDISK_BACKEND_NAME,
            id: u32::from(drive),
            total_sectors,
            has_partitions: self.cd_drive != Some(drive),
        })
    }

    fn read(&mut self, disk: &Disk, sector: u64, buf: &mut [u8]) -> Result<()> {
        let drive = Self::drive_of(disk)?;
        let count = sector_count(buf.len())?;
        Self::check_range(disk, sector, count)?;

        let optical = self.resolve(drive)?.is_optical();
        let ratio = self.config.optical_ratio();

        let mut sector = sector;
        let mut done = 0usize;
        let mut remaining = count;
        while remaining > 0 {
            // Optical media is read in whole optical sectors; `skip` leading native sectors of
            // the first one belong to the previous request.
            let (start, skip, want) = if optical {
                let skip = sector % ratio;
                let want = (skip + remaining).div_ceil(ratio) * ratio;
                (sector - skip, skip, want)
            } else {
                (sector, 0, remaining)
            };

            let got = self.transfer(drive, Direction::Read, start, want)?;
            let avail = got.saturating_sub(skip);
            if avail == 0 {
                return Err(DiskError::ReadError(disk.name.clone()));
            }
            let len = avail.min(remaining);

            let bytes = len as usize * SECTOR_SIZE;
            let from = skip as usize * SECTOR_SIZE;
            buf[done..done + bytes].copy_from_slice(&self.scratch.as_slice()[from..from + bytes]);

            done += bytes;
            sector += len;
            remaining -= len;
        }
        Ok(())
    }

    fn write(&mut self, disk: &Disk, sector: u64, buf: &[u8]) -> Result<()> {
        let drive = Self::drive_of(disk)?;
        let count = sector_count(buf.len())?;
        if self.resolve(drive)?.is_optical() {
            return Err(DiskError::ReadOnly(disk.name.clone()));
        }
        Self::check_range(disk, sector, count)?;

        let mut sector = sector;
        for chunk in buf.chunks(MAX_SECTORS as usize * SECTOR_SIZE) {
            self.scratch.region_mut(0, chunk.len())?.copy_from_slice(chunk);

            let mut len = (chunk.len() / SECTOR_SIZE) as u64;
            while len > 0 {
                let ret = self.transfer(drive, Direction::Write, sector, len)?;
                len -= ret;
                sector += ret;
                // The next engine call expects its data at the start of the scratch buffer.
                let from = ret as usize * SECTOR_SIZE;
                self.scratch
                    .as_mut_slice()
                    .copy_within(from..from + len as usize * SECTOR_SIZE, 0);
            }
        }
        Ok(())
    }
}

fn detect_optical_drive<F: DiskFirmware + ?Sized>(firmware: &mut F, boot_drive: u8) -> Option<u8> {
    let mut packet = CdSpecPacket::request();
    firmware.get_cdrom_status(boot_drive, &mut packet).ok()?;
    let spec = CdSpecPacket::parse(&packet);
    spec.is_no_emulation_cd().then_some(spec.drive_no)
}
