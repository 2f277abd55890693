use tracing::debug;

use crate::util::sector_count;
use crate::{BlockDevice, DiskError, Result};

/// Handle returned by [`DiskBackend::open`].
///
/// The handle is plain data; every I/O call goes back through the backend that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Name the disk was opened under (`hd0`, `boot`, ...).
    pub name: String,
    /// Name of the backend that owns this disk.
    pub backend: &'static str,
    /// Backend-specific device id (e.g. a BIOS drive number).
    pub id: u32,
    /// Size in 512-byte sectors, or [`crate::UNKNOWN_TOTAL_SECTORS`].
    pub total_sectors: u64,
    /// Whether partition tables should be probed on this disk.
    pub has_partitions: bool,
}

/// A disk driver that can be registered with a [`DiskRegistry`].
pub trait DiskBackend {
    fn name(&self) -> &'static str;

    /// Calls `hook` once per device name. Returns `true` as soon as `hook` returns `true`.
    fn iterate(&mut self, hook: &mut dyn FnMut(&str) -> bool) -> bool;

    /// Opens a device by name. Backends must return [`DiskError::UnknownDevice`] for names they
    /// do not own so the registry can try the next backend.
    fn open(&mut self, name: &str) -> Result<Disk>;

    /// Reads `buf.len() / 512` sectors starting at `sector`.
    fn read(&mut self, disk: &Disk, sector: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf.len() / 512` sectors starting at `sector`.
    fn write(&mut self, disk: &Disk, sector: u64, buf: &[u8]) -> Result<()>;

    fn close(&mut self, _disk: &Disk) {}
}

/// Ordered set of disk backends.
#[derive(Default)]
pub struct DiskRegistry {
    backends: Vec<Box<dyn DiskBackend>>,
}

impl DiskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Box<dyn DiskBackend>) {
        debug!(backend = backend.name(), "registering disk backend");
        self.backends.push(backend);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn DiskBackend>> {
        let idx = self.backends.iter().position(|b| b.name() == name)?;
        Some(self.backends.remove(idx))
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn iterate(&mut self, hook: &mut dyn FnMut(&str) -> bool) -> bool {
        self.backends
            .iter_mut()
            .any(|backend| backend.iterate(&mut *hook))
    }

    pub fn open(&mut self, name: &str) -> Result<Disk> {
        for backend in &mut self.backends {
            match backend.open(name) {
                Err(DiskError::UnknownDevice(_)) => continue,
                other => return other,
            }
        }
        Err(DiskError::UnknownDevice(name.to_string()))
    }

    pub fn read(&mut self, disk: &Disk, sector: u64, buf: &mut [u8]) -> Result<()> {
        self.backend_for(disk)?.read(disk, sector, buf)
    }

    pub fn write(&mut self, disk: &Disk, sector: u64, buf: &[u8]) -> Result<()> {
        self.backend_for(disk)?.write(disk, sector, buf)
    }

    pub fn close(&mut self, disk: &Disk) {
        if let Ok(backend) = self.backend_for(disk) {
            backend.close(disk);
        }
    }

    /// Borrows an opened disk as a [`BlockDevice`].
    pub fn reader(&mut self, disk: Disk) -> Result<DiskReader<'_>> {
        let backend = self.backend_for(&disk)?;
        Ok(DiskReader::new(backend, disk))
    }

    fn backend_for(&mut self, disk: &Disk) -> Result<&mut dyn DiskBackend> {
        self.backends
            .iter_mut()
            .find(|b| b.name() == disk.backend)
            .map(|b| &mut **b as &mut dyn DiskBackend)
            .ok_or_else(|| DiskError::BadDevice(disk.name.clone()))
    }
}

/// [`BlockDevice`] view of a disk opened through a [`DiskBackend`].
pub struct DiskReader<'a> {
    backend: &'a mut dyn DiskBackend,
    disk: Disk,
}

impl<'a> DiskReader<'a> {
    pub fn new(backend: &'a mut dyn DiskBackend, disk: Disk) -> Self {
        Self { backend, disk }
    }

    pub fn disk(&self) -> &Disk {
        &self.disk
    }

    pub fn into_disk(self) -> Disk {
        self.disk
    }
}

impl BlockDevice for DiskReader<'_> {
    fn total_sectors(&self) -> u64 {
        self.disk.total_sectors
    }

    fn read_sectors(&mut self, sector: u64, buf: &mut [u8]) -> Result<()> {
        sector_count(buf.len())?;
        self.backend.read(&self.disk, sector, buf)
    }

    fn write_sectors(&mut self, sector: u64, buf: &[u8]) -> Result<()> {
        sector_count(buf.len())?;
        self.backend.write(&self.disk, sector, buf)
    }
}
