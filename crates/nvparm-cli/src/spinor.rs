//! SPI-NOR dispatcher: GPT lookup, filesystem mount and NVP file
//! operations. The device is closed and the filesystem unmounted on
//! every exit path by drop order alone.

use std::fs::File;
use std::io::{self, Write};

use anyhow::{bail, Context};
use nvparm_common::Guid;
use nvparm_gpt::GptDisk;
use nvparm_mtd::MtdDevice;
use nvparm_record::{NvpRecord, NvpStore};
use nvparm_spinorfs::{FsFile, OpenFlags, SpinorFs};

use crate::{discover, operate, Args};

/// Chunk size for dump and upload transfers.
const TRANSFER_CHUNK: usize = 4096;

/// Adapts an open NVP file to the record engine; the partial reads and
/// writes littlefs may return are treated as failures, field I/O is
/// all-or-nothing.
struct FileStore<'a, 'fs, 'd> {
    file: &'a mut FsFile<'fs, 'd>,
}

impl NvpStore for FileStore<'_, '_, '_> {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        let n = self.file.read(offset, buf).map_err(io::Error::other)?;
        if n != buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short NVP read"));
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        let n = self.file.write(offset, data).map_err(io::Error::other)?;
        if n != data.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short NVP write"));
        }
        Ok(())
    }
}

pub fn run(args: &Args) -> anyhow::Result<()> {
    let path = match &args.device {
        Some(device) => device.clone(),
        None => discover::host_mtd_device()?,
    };
    let mut dev = MtdDevice::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let disk = GptDisk::scan(&mut dev).context("GPT parsing failed")?;
    if args.print_gpt {
        for part in disk.entries() {
            println!("[GPT Partition #{}]", part.slot);
            println!("  Name: {}", part.entry.name());
            println!("  GUID: {}", part.entry.unique_partition_guid);
            println!("--------------------------------------------");
        }
        return Ok(());
    }

    let span = if let Some(name) = &args.partition {
        disk.by_name(name)?
    } else if let Some(guid) = &args.guid {
        let guid: Guid = guid.parse().context("invalid GUID")?;
        disk.by_guid(&guid)?
    } else {
        bail!("a partition name or GUID is required");
    };

    let mut fs = SpinorFs::mount(&mut dev, span.offset, span.size)?;
    let nvp_file = args.file.as_deref().context("option -f must be specified")?;

    if let Some(dump) = &args.dump {
        return dump_nvp(&mut fs, nvp_file, dump);
    }
    if let Some(upload) = &args.upload {
        return upload_nvp(&mut fs, nvp_file, upload);
    }

    let index = args.index.context("option -i must be specified")?;
    let mut file = fs
        .open(nvp_file, OpenFlags::RDWR)
        .with_context(|| format!("failed to open NVP file {nvp_file}"))?;
    let mut store = FileStore { file: &mut file };
    let mut record = NvpRecord::open(&mut store, None)?;
    operate(&mut record, args, index)
}

/// Copies the NVP file into `dump`, reading until end of file.
fn dump_nvp(fs: &mut SpinorFs, nvp_file: &str, dump: &std::path::Path) -> anyhow::Result<()> {
    let mut file = fs
        .open(nvp_file, OpenFlags::RDONLY)
        .with_context(|| format!("failed to open NVP file {nvp_file}"))?;
    let mut out = File::create(dump)
        .with_context(|| format!("cannot open file {}", dump.display()))?;

    let mut buf = [0u8; TRANSFER_CHUNK];
    let mut offset = 0u32;
    loop {
        let n = file.read(offset, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .with_context(|| format!("error writing to {}", dump.display()))?;
        offset += n as u32;
    }
    log::debug!("dumped {offset} bytes of {nvp_file}");
    Ok(())
}

/// Replaces the NVP file's content with `upload`.
fn upload_nvp(fs: &mut SpinorFs, nvp_file: &str, upload: &std::path::Path) -> anyhow::Result<()> {
    let data = std::fs::read(upload)
        .with_context(|| format!("cannot open file {}", upload.display()))?;
    log::debug!("new NVP file {} is {} bytes", upload.display(), data.len());

    let mut file = fs
        .open(nvp_file, OpenFlags::WRONLY | OpenFlags::TRUNC)
        .with_context(|| format!("failed to open NVP file {nvp_file}"))?;
    let mut offset = 0u32;
    for chunk in data.chunks(TRANSFER_CHUNK) {
        let n = file.write(offset, chunk)?;
        if n != chunk.len() {
            bail!("short write to NVP file");
        }
        offset += n as u32;
    }
    log::debug!("done writing NVP file: {offset} bytes");
    Ok(())
}
