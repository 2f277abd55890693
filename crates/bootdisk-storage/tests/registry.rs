#![cfg(not(target_arch = "wasm32"))]

use bootdisk_storage::{
    BlockDevice, Disk, DiskBackend, DiskError, DiskRegistry, MemDisk, Result, SECTOR_SIZE,
};

/// Backend exposing a fixed list of in-memory disks as `<prefix>0`, `<prefix>1`, ...
struct MemBackend {
    name: &'static str,
    prefix: &'static str,
    disks: Vec<MemDisk>,
}

impl MemBackend {
    fn new(name: &'static str, prefix: &'static str, disks: Vec<MemDisk>) -> Self {
        Self {
            name,
            prefix,
            disks,
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        let idx: usize = name.strip_prefix(self.prefix)?.parse().ok()?;
        (idx < self.disks.len()).then_some(idx)
    }
}

impl DiskBackend for MemBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn iterate(&mut self, hook: &mut dyn FnMut(&str) -> bool) -> bool {
        (0..self.disks.len()).any(|i| hook(&format!("{}{i}", self.prefix)))
    }

    fn open(&mut self, name: &str) -> Result<Disk> {
        let idx = self
            .index(name)
            .ok_or_else(|| DiskError::UnknownDevice(name.to_string()))?;
        Ok(Disk {
            name: name.to_string(),
            backend: self.name,
            id: idx as u32,
            total_sectors: self.disks[idx].total_sectors(),
            has_partitions: true,
        })
    }

    fn read(&mut self, disk: &Disk, sector: u64, buf: &mut [u8]) -> Result<()> {
        self.disks[disk.id as usize].read_sectors(sector, buf)
    }

    fn write(&mut self, disk: &Disk, sector: u64, buf: &[u8]) -> Result<()> {
        self.disks[disk.id as usize].write_sectors(sector, buf)
    }
}

fn registry() -> DiskRegistry {
    let mut registry = DiskRegistry::new();
    registry.register(Box::new(MemBackend::new(
        "first",
        "md",
        vec![MemDisk::new(16), MemDisk::new(32)],
    )));
    registry.register(Box::new(MemBackend::new(
        "second",
        "rd",
        vec![MemDisk::new(8)],
    )));
    registry
}

#[test]
fn iterate_visits_backends_in_registration_order() {
    let mut registry = registry();
    let mut seen = Vec::new();
    let stopped = registry.iterate(&mut |name: &str| {
        seen.push(name.to_string());
        false
    });
    assert!(!stopped);
    assert_eq!(seen, ["md0", "md1", "rd0"]);
}

#[test]
fn iterate_stops_on_first_hook_request() {
    let mut registry = registry();
    let mut seen = Vec::new();
    let stopped = registry.iterate(&mut |name: &str| {
        seen.push(name.to_string());
        name == "md1"
    });
    assert!(stopped);
    assert_eq!(seen, ["md0", "md1"]);
}

#[test]
fn open_falls_through_to_the_backend_that_owns_the_name() {
    let mut registry = registry();
    let disk = registry.open("rd0").unwrap();
    assert_eq!(disk.backend, "second");
    assert_eq!(disk.total_sectors, 8);

    assert_eq!(
        registry.open("xd0"),
        Err(DiskError::UnknownDevice("xd0".to_string()))
    );
}

#[test]
fn reads_and_writes_route_to_the_owning_backend() {
    let mut registry = registry();
    let disk = registry.open("md1").unwrap();

    let data = [0x5au8; SECTOR_SIZE * 2];
    registry.write(&disk, 30, &data).unwrap();

    let mut out = [0u8; SECTOR_SIZE * 2];
    registry.read(&disk, 30, &mut out).unwrap();
    assert_eq!(out, data);

    let other = registry.open("md0").unwrap();
    registry.read(&other, 0, &mut out[..SECTOR_SIZE]).unwrap();
    assert!(out[..SECTOR_SIZE].iter().all(|&b| b == 0));
}

#[test]
fn disk_reader_exposes_an_opened_disk_as_a_block_device() {
    let mut registry = registry();
    let disk = registry.open("md0").unwrap();
    registry.write(&disk, 3, &[0x11u8; SECTOR_SIZE]).unwrap();

    let mut reader = registry.reader(disk).unwrap();
    assert_eq!(reader.total_sectors(), 16);

    let mut word = [0u8; 4];
    reader.read_at(3, 100, &mut word).unwrap();
    assert_eq!(word, [0x11; 4]);

    let mut odd = [0u8; 7];
    assert!(matches!(
        reader.read_sectors(0, &mut odd),
        Err(DiskError::UnalignedLength { .. })
    ));
}

#[test]
fn unregistered_backends_no_longer_route() {
    let mut registry = registry();
    let disk = registry.open("rd0").unwrap();
    assert!(registry.unregister("second").is_some());
    assert_eq!(registry.backend_names(), ["first"]);

    let mut buf = [0u8; SECTOR_SIZE];
    assert_eq!(
        registry.read(&disk, 0, &mut buf),
        Err(DiskError::BadDevice("rd0".to_string()))
    );
}
