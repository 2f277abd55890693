use bootdisk_storage::{DiskError, Result};

/// Runtime knobs for [`crate::BiosDisk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiosDiskConfig {
    /// Drive number the system booted from (`DL` at boot). Exposed under the alias `boot`.
    pub boot_drive: u8,
    /// Number of fixed-disk drive numbers probed during enumeration, starting at `0x80`.
    pub fixed_disk_count: u8,
    /// Attempts per optical transfer before giving up.
    pub cdrom_retry_count: u32,
    /// `log2(optical sector size / 512)`. The usual 2048-byte optical sector gives `2`.
    pub optical_sector_shift: u32,
    /// Real-mode segment of the scratch buffer, used for far pointers handed to the firmware.
    pub scratch_segment: u16,
}

impl Default for BiosDiskConfig {
    fn default() -> Self {
        Self {
            boot_drive: 0x80,
            fixed_disk_count: 16,
            cdrom_retry_count: 3,
            optical_sector_shift: 2,
            scratch_segment: 0x6800,
        }
    }
}

impl BiosDiskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fixed_disk_count == 0 || self.fixed_disk_count > 0x80 {
            return Err(DiskError::InvalidConfig(
                "fixed_disk_count must be within 1..=128",
            ));
        }
        if self.cdrom_retry_count == 0 {
            return Err(DiskError::InvalidConfig("cdrom_retry_count must be > 0"));
        }
        if self.optical_sector_shift > 3 {
            return Err(DiskError::InvalidConfig(
                "optical_sector_shift must be within 0..=3",
            ));
        }
        Ok(())
    }

    /// Native sectors per optical sector.
    pub fn optical_ratio(&self) -> u64 {
        1 << self.optical_sector_shift
    }

    /// One past the last fixed-disk drive number probed during enumeration.
    pub(crate) fn fixed_disk_end(&self) -> u16 {
        u16::from(crate::FIXED_DISK_BASE) + u16::from(self.fixed_disk_count)
    }
}
