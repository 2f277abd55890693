mod file_disk;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use bootdisk_bios::emulated::{EmulatedDrive, EmulatedFirmware};
use bootdisk_bios::{
    parse_drive_name, AddressingMode, BiosDisk, BiosDiskConfig, GeometryRecord, FIXED_DISK_BASE,
};
use bootdisk_mdraid::{ArrayDescriptor, FormatVersion, MdRaid, RaidDetector, RaidError};
use bootdisk_storage::{Disk, DiskBackend, DiskReader, UNKNOWN_TOTAL_SECTORS};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::file_disk::FileDisk;

/// Drive number the optical image is attached under.
const CDROM_DRIVE: u8 = 0xe0;

/// `--boot` value selecting the optical image.
const CDROM_BOOT_NAME: &str = "cd";

#[derive(Parser, Debug)]
#[command(
    name = "bootdisk-probe",
    about = "Attach raw disk images to an emulated BIOS and report what the bootdisk layer sees."
)]
struct Args {
    /// Hard disk images, attached as hd0, hd1, ... in order
    images: Vec<PathBuf>,

    /// Floppy images, attached as fd0, fd1, ... in order
    #[arg(long, value_name = "PATH")]
    floppy: Vec<PathBuf>,

    /// No-emulation optical image (2048-byte sectors)
    #[arg(long, value_name = "PATH")]
    cdrom: Option<PathBuf>,

    /// Boot drive: hdN, fdN or "cd" (defaults to the first attached device)
    #[arg(long, value_name = "NAME")]
    boot: Option<String>,

    /// Number of fixed-disk drive numbers probed during enumeration
    #[arg(long, value_name = "N", default_value_t = 16)]
    fixed_disk_count: u8,

    /// Hide INT 13h extensions on hard disks (forces CHS addressing)
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_extensions: bool,

    /// Make every drive reject transfers larger than N sectors
    #[arg(long, value_name = "N")]
    max_transfer: Option<u64>,

    /// Print the report as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Log geometry decisions and transfer retries to stderr
    #[arg(long, short, action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeReport {
    devices: Vec<DeviceReport>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceReport {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    drive: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geometry: Option<GeometryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raid: Option<RaidReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeometryReport {
    addressing: &'static str,
    optical: bool,
    fb_override: bool,
    cylinders: u32,
    heads: u32,
    sectors: u32,
    max_sectors: u32,
    /// `None` when the size cannot be queried.
    total_sectors: Option<u64>,
    has_partitions: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RaidReport {
    metadata: &'static str,
    level: i32,
    layout: u32,
    members: u32,
    index: u32,
    array_number: u32,
    per_member_size: u64,
    data_offset: u64,
    chunk_size: u32,
    uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    run(args)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.images.is_empty() && args.floppy.is_empty() && args.cdrom.is_none() {
        bail!("no disk images given");
    }
    if args.images.len() > usize::from(args.fixed_disk_count) {
        bail!(
            "{} hard disk images given but only {} fixed-disk drive numbers are probed",
            args.images.len(),
            args.fixed_disk_count
        );
    }
    if args.floppy.len() > usize::from(FIXED_DISK_BASE) {
        bail!("too many floppy images ({})", args.floppy.len());
    }

    let firmware = build_firmware(&args)?;
    let config = BiosDiskConfig {
        boot_drive: firmware.boot_drive(),
        fixed_disk_count: args.fixed_disk_count,
        ..BiosDiskConfig::default()
    };
    let mut bios = BiosDisk::new(firmware, config).context("failed to initialize BIOS disks")?;

    let mut names = Vec::new();
    bios.iterate(&mut |name| {
        names.push(name.to_string());
        false
    });
    tracing::debug!(?names, "enumerated devices");

    let mut report = ProbeReport {
        devices: Vec::with_capacity(names.len()),
    };
    for name in names {
        report.devices.push(probe_device(&mut bios, &name));
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        print_text(&report);
    }

    if !report.devices.iter().any(|d| d.geometry.is_some()) {
        bail!("no device could be opened");
    }
    Ok(())
}

fn build_firmware(args: &Args) -> anyhow::Result<EmulatedFirmware> {
    let mut firmware = EmulatedFirmware::new();

    for (i, path) in args.images.iter().enumerate() {
        let mut drive = EmulatedDrive::fixed(open_image(path)?);
        if args.no_extensions {
            drive = drive.without_extensions();
        }
        firmware.attach(FIXED_DISK_BASE + i as u8, limit(drive, args.max_transfer));
    }
    for (i, path) in args.floppy.iter().enumerate() {
        let drive = EmulatedDrive::floppy(open_image(path)?);
        firmware.attach(i as u8, limit(drive, args.max_transfer));
    }
    if let Some(path) = &args.cdrom {
        let drive = EmulatedDrive::optical(open_image(path)?);
        firmware.attach(CDROM_DRIVE, limit(drive, args.max_transfer));
    }

    let boot = match args.boot.as_deref() {
        Some(CDROM_BOOT_NAME) => {
            if args.cdrom.is_none() {
                bail!("--boot {CDROM_BOOT_NAME} requires --cdrom");
            }
            CDROM_DRIVE
        }
        Some(name) => {
            let drive =
                parse_drive_name(name).with_context(|| format!("invalid boot drive {name:?}"))?;
            if firmware.drive(drive).is_none() {
                bail!("boot drive {name} is not attached");
            }
            drive
        }
        None if !args.images.is_empty() => FIXED_DISK_BASE,
        None if !args.floppy.is_empty() => 0,
        None => CDROM_DRIVE,
    };
    firmware.set_boot_drive(boot);
    Ok(firmware)
}

fn open_image(path: &Path) -> anyhow::Result<FileDisk> {
    FileDisk::open(path).with_context(|| format!("failed to open {}", path.display()))
}

fn limit(drive: EmulatedDrive, max_transfer: Option<u64>) -> EmulatedDrive {
    match max_transfer {
        Some(sectors) => drive.with_max_transfer(sectors),
        None => drive,
    }
}

fn probe_device(bios: &mut BiosDisk<EmulatedFirmware>, name: &str) -> DeviceReport {
    let disk = match bios.open(name) {
        Ok(disk) => disk,
        Err(err) => {
            return DeviceReport {
                name: name.to_string(),
                drive: None,
                geometry: None,
                raid: None,
                error: Some(err.to_string()),
            }
        }
    };
    let (raid, error) = match MdRaid.detect(&mut DiskReader::new(&mut *bios, disk.clone())) {
        Ok(array) => (Some(raid_report(&array)), None),
        Err(RaidError::NotRaid) => (None, None),
        Err(err) => (None, Some(format!("{}: {err}", MdRaid.name()))),
    };
    bios.close(&disk);

    // Reported after detection so transfer limits learned while reading are visible.
    let drive = u8::try_from(disk.id).ok();
    let table = bios.geometry_table();
    let geometry = drive
        .and_then(|drive| table.get(drive))
        .map(|record| geometry_report(record, &disk));

    DeviceReport {
        name: disk.name,
        drive,
        geometry,
        raid,
        error,
    }
}

fn geometry_report(record: &GeometryRecord, disk: &Disk) -> GeometryReport {
    GeometryReport {
        addressing: match record.addressing_mode() {
            AddressingMode::LegacyChs => "chs",
            AddressingMode::ExtendedLba => "lba",
        },
        optical: record.is_optical(),
        fb_override: record.has_fb_override(),
        cylinders: record.cylinders,
        heads: record.heads,
        sectors: record.sectors,
        max_sectors: record.max_sectors,
        total_sectors: (record.total_sectors != UNKNOWN_TOTAL_SECTORS)
            .then_some(record.total_sectors),
        has_partitions: disk.has_partitions,
    }
}

fn raid_report(array: &ArrayDescriptor) -> RaidReport {
    RaidReport {
        metadata: match array.format_version {
            FormatVersion::V0_90 => "0.90",
            FormatVersion::V1 => "1.x",
        },
        level: array.raid_level,
        layout: array.raid_layout,
        members: array.total_member_disks,
        index: array.member_index,
        array_number: array.array_number,
        per_member_size: array.per_member_size,
        data_offset: array.data_offset,
        chunk_size: array.chunk_size,
        uuid: array.array_uuid.iter().map(|b| format!("{b:02x}")).collect(),
        name: array.array_name.clone(),
    }
}

fn print_text(report: &ProbeReport) {
    for device in &report.devices {
        match &device.geometry {
            Some(g) => {
                let total = match g.total_sectors {
                    Some(total) => total.to_string(),
                    None => "unknown".to_string(),
                };
                println!(
                    "{}: drive=0x{:02x} mode={}{}{} chs={}/{}/{} max={} sectors={} partitions={}",
                    device.name,
                    device.drive.unwrap_or_default(),
                    g.addressing,
                    if g.optical { " optical" } else { "" },
                    if g.fb_override { " fb" } else { "" },
                    g.cylinders,
                    g.heads,
                    g.sectors,
                    g.max_sectors,
                    total,
                    if g.has_partitions { "yes" } else { "no" },
                );
            }
            None => println!("{}: unavailable", device.name),
        }
        if let Some(raid) = &device.raid {
            println!(
                "  mdraid {}: level={} members={} index={} size={} offset={} uuid={}{}",
                raid.metadata,
                raid.level,
                raid.members,
                raid.index,
                raid.per_member_size,
                raid.data_offset,
                raid.uuid,
                raid.name
                    .as_deref()
                    .map(|n| format!(" name={n}"))
                    .unwrap_or_default(),
            );
        }
        if let Some(err) = &device.error {
            println!("  error: {err}");
        }
    }
}
