//! Raw INT 13h service surface and the binary packets exchanged with it.
//!
//! Packet layouts are encoded and decoded with explicit little-endian offsets; nothing here is
//! overlaid on raw memory.

use bootdisk_storage::util::{le_u16, le_u32, le_u64, put_le_u16, put_le_u32, put_le_u64};
use thiserror::Error;

/// Size of the extended-transfer disk address packet.
pub const DAP_SIZE: usize = 0x10;

/// Size of the EDD 3.0 drive parameter block returned by AH=48h.
pub const DRP_SIZE: usize = 0x42;

/// Size of the El Torito specification packet returned by AX=4B01h.
pub const CD_SPEC_PACKET_SIZE: usize = 0x13;

/// Media-type nibble of the specification packet.
pub const CD_MEDIA_TYPE_MASK: u8 = 0x0f;

/// El Torito "no emulation" media type.
pub const CD_MEDIA_NO_EMULATION: u8 = 0x00;

/// Cylinder count reported by AH=48h when the drive is too large for CHS.
pub const DRP_CYLINDERS_OVERFLOW: u32 = 65535;

/// INT 13h status code (the `AH` value returned with `CF` set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("int 13h status {0:#04x}")]
pub struct Int13Status(pub u8);

impl Int13Status {
    pub const INVALID_COMMAND: Self = Self(0x01);
    pub const WRITE_PROTECTED: Self = Self(0x03);
    pub const SECTOR_NOT_FOUND: Self = Self(0x04);
    pub const DMA_BOUNDARY: Self = Self(0x09);
    pub const TIMEOUT: Self = Self(0x80);
    pub const NOT_READY: Self = Self(0xaa);
}

/// Transfer direction. Selects between the read and write service of each addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// AH value of the CHS service (02h read, 03h write).
    pub fn legacy_function(self) -> u8 {
        match self {
            Self::Read => 0x02,
            Self::Write => 0x03,
        }
    }

    /// AH value of the extended service (42h read, 43h write).
    pub fn extended_function(self) -> u8 {
        match self {
            Self::Read => 0x42,
            Self::Write => 0x43,
        }
    }
}

/// Cylinder/head/sector address. `sector` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chs {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

impl Chs {
    pub const fn new(cylinder: u16, head: u8, sector: u8) -> Self {
        Self {
            cylinder,
            head,
            sector,
        }
    }

    /// Translates a CHS address back to a linear sector under the given geometry.
    pub fn to_lba(self, heads: u32, sectors_per_track: u32) -> Option<u64> {
        if self.sector == 0 || u32::from(self.sector) > sectors_per_track {
            return None;
        }
        if u32::from(self.head) >= heads {
            return None;
        }
        let track = u64::from(self.cylinder) * u64::from(heads) + u64::from(self.head);
        Some(track * u64::from(sectors_per_track) + u64::from(self.sector) - 1)
    }
}

/// Real-mode `segment:offset` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    /// Normalizes a linear address below 1 MiB into a pointer with a 4-bit offset.
    pub fn from_linear(linear: u32) -> Self {
        Self {
            segment: (linear >> 4) as u16,
            offset: (linear & 0xf) as u16,
        }
    }

    pub fn linear(self) -> u32 {
        (u32::from(self.segment) << 4) + u32::from(self.offset)
    }

    /// The `SEGMENT:OFFSET` dword layout used in disk address packets.
    pub fn to_u32(self) -> u32 {
        (u32::from(self.segment) << 16) | u32::from(self.offset)
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            segment: (raw >> 16) as u16,
            offset: raw as u16,
        }
    }
}

/// Disk address packet consumed by AH=42h/43h.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskAddressPacket {
    pub blocks: u16,
    pub buffer: FarPtr,
    pub block: u64,
}

impl DiskAddressPacket {
    pub fn encode(&self) -> [u8; DAP_SIZE] {
        let mut raw = [0u8; DAP_SIZE];
        raw[0] = DAP_SIZE as u8;
        raw[1] = 0;
        put_le_u16(&mut raw, 2, self.blocks);
        put_le_u32(&mut raw, 4, self.buffer.to_u32());
        put_le_u64(&mut raw, 8, self.block);
        raw
    }

    /// Decodes a packet, rejecting one whose length byte is not 16.
    pub fn decode(raw: &[u8; DAP_SIZE]) -> Option<Self> {
        if usize::from(raw[0]) != DAP_SIZE {
            return None;
        }
        Some(Self {
            blocks: le_u16(raw, 2),
            buffer: FarPtr::from_u32(le_u32(raw, 4)),
            block: le_u64(raw, 8),
        })
    }
}

/// Leading fields of the drive parameter block returned by AH=48h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveParameters {
    pub flags: u16,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub total_sectors: u64,
    pub bytes_per_sector: u16,
}

impl DriveParameters {
    pub fn parse(raw: &[u8; DRP_SIZE]) -> Self {
        Self {
            flags: le_u16(raw, 2),
            cylinders: le_u32(raw, 4),
            heads: le_u32(raw, 8),
            sectors: le_u32(raw, 12),
            total_sectors: le_u64(raw, 16),
            bytes_per_sector: le_u16(raw, 24),
        }
    }

    /// Writes the fields into `raw`, leaving the caller-provided size word and the EDD tail intact.
    pub fn write_to(&self, raw: &mut [u8; DRP_SIZE]) {
        put_le_u16(raw, 2, self.flags);
        put_le_u32(raw, 4, self.cylinders);
        put_le_u32(raw, 8, self.heads);
        put_le_u32(raw, 12, self.sectors);
        put_le_u64(raw, 16, self.total_sectors);
        put_le_u16(raw, 24, self.bytes_per_sector);
    }
}

/// El Torito specification packet (AX=4B01h), leading fields only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdSpecPacket {
    pub media_type: u8,
    pub drive_no: u8,
    pub controller_no: u8,
    pub image_lba: u32,
}

impl CdSpecPacket {
    /// A zeroed request packet with the size byte set and the media type poisoned to `0xff`,
    /// so a firmware that returns success without filling it is not mistaken for a CD.
    pub fn request() -> [u8; CD_SPEC_PACKET_SIZE] {
        let mut raw = [0u8; CD_SPEC_PACKET_SIZE];
        raw[0] = CD_SPEC_PACKET_SIZE as u8;
        raw[1] = 0xff;
        raw
    }

    pub fn parse(raw: &[u8; CD_SPEC_PACKET_SIZE]) -> Self {
        Self {
            media_type: raw[1],
            drive_no: raw[2],
            controller_no: raw[3],
            image_lba: le_u32(raw, 4),
        }
    }

    pub fn write_to(&self, raw: &mut [u8; CD_SPEC_PACKET_SIZE]) {
        raw[1] = self.media_type;
        raw[2] = self.drive_no;
        raw[3] = self.controller_no;
        put_le_u32(raw, 4, self.image_lba);
    }

    /// Whether this packet describes a no-emulation CD that can be addressed directly.
    pub fn is_no_emulation_cd(&self) -> bool {
        self.media_type & CD_MEDIA_TYPE_MASK == CD_MEDIA_NO_EMULATION && self.drive_no >= 0x80
    }
}

/// Geometry reported by AH=08h, converted from maximum indices to counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyGeometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
}

/// One method per INT 13h (and INT 11h) service the disk backend relies on.
///
/// Every call blocks until the firmware returns. Transfer buffers are the slice of the scratch
/// area the request's far pointer refers to; implementations translate addressing however the
/// platform requires.
pub trait DiskFirmware {
    /// AH=02h/03h: transfer `count` sectors at `chs`.
    fn legacy_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        chs: Chs,
        count: u8,
        buf: &mut [u8],
    ) -> Result<(), Int13Status>;

    /// AH=42h/43h: transfer the range described by the encoded disk address packet.
    fn extended_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        packet: &[u8; DAP_SIZE],
        buf: &mut [u8],
    ) -> Result<(), Int13Status>;

    /// AH=41h: returns the extensions version if the drive supports LBA services.
    fn check_extensions(&mut self, drive: u8) -> Option<u8>;

    /// AH=48h: fills the caller-zeroed parameter block.
    fn get_extended_params(
        &mut self,
        drive: u8,
        block: &mut [u8; DRP_SIZE],
    ) -> Result<(), Int13Status>;

    /// AH=08h.
    fn get_legacy_params(&mut self, drive: u8) -> Result<LegacyGeometry, Int13Status>;

    /// AX=4B01h: El Torito emulation status for `drive`.
    fn get_cdrom_status(
        &mut self,
        drive: u8,
        packet: &mut [u8; CD_SPEC_PACKET_SIZE],
    ) -> Result<(), Int13Status>;

    /// Number of floppy drives from the equipment word.
    fn floppy_count(&mut self) -> u8;

    /// AH=00h.
    fn reset(&mut self, drive: u8);
}

impl<T: DiskFirmware + ?Sized> DiskFirmware for &mut T {
    fn legacy_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        chs: Chs,
        count: u8,
        buf: &mut [u8],
    ) -> Result<(), Int13Status> {
        (**self).legacy_transfer(direction, drive, chs, count, buf)
    }

    fn extended_transfer(
        &mut self,
        direction: Direction,
        drive: u8,
        packet: &[u8; DAP_SIZE],
        buf: &mut [u8],
    ) -> Result<(), Int13Status> {
        (**self).extended_transfer(direction, drive, packet, buf)
    }

    fn check_extensions(&mut self, drive: u8) -> Option<u8> {
        (**self).check_extensions(drive)
    }

    fn get_extended_params(
        &mut self,
        drive: u8,
        block: &mut [u8; DRP_SIZE],
    ) -> Result<(), Int13Status> {
        (**self).get_extended_params(drive, block)
    }

    fn get_legacy_params(&mut self, drive: u8) -> Result<LegacyGeometry, Int13Status> {
        (**self).get_legacy_params(drive)
    }

    fn get_cdrom_status(
        &mut self,
        drive: u8,
        packet: &mut [u8; CD_SPEC_PACKET_SIZE],
    ) -> Result<(), Int13Status> {
        (**self).get_cdrom_status(drive, packet)
    }

    fn floppy_count(&mut self) -> u8 {
        (**self).floppy_count()
    }

    fn reset(&mut self, drive: u8) {
        (**self).reset(drive)
    }
}
