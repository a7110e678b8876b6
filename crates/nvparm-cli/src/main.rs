//! nvparm is an engineering tool for the BMC Linux console. It edits
//! NVPARAM fields of the Validation and Dynamic NVPARAM partitions on
//! the host SPI-NOR flash and of the Boot-Strap Data EEPROM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::bail;
use clap::Parser;
use nvparm_record::{NvpRecord, NvpStore, ValidBit};

mod bsd;
mod discover;
mod spinor;

#[derive(Debug, Parser)]
#[command(name = "nvparm", disable_version_flag = true)]
struct Args {
    /// Partition name of Dynamic NVPARAM or Validation NVPARAM or Static NVPARAM
    #[arg(short = 't', value_name = "nvp_part")]
    partition: Option<String>,

    /// Partition's GUID from the GPT header; 0 is fixed for the Boot-Strap Data partition
    #[arg(short = 'u', value_name = "nvp_guid")]
    guid: Option<String>,

    /// Name of the NVP file; NVPBERLY is fixed for the Boot-Strap Data partition
    #[arg(short = 'f', value_name = "nvp_file")]
    file: Option<String>,

    /// Index of the target field in the NVP file, starting from 0
    #[arg(short = 'i', value_name = "field_index")]
    index: Option<u64>,

    /// Read a field and its associated valid bit
    #[arg(short = 'r')]
    read: bool,

    /// Write data (hex) to a field and its associated valid bit
    #[arg(short = 'w', value_name = "nvp_data", value_parser = parse_hex_u64)]
    write: Option<u64>,

    /// Enable (1) or disable (0) the valid bit
    #[arg(short = 'v', value_name = "valid_bit", value_parser = parse_hex_u8)]
    valid: Option<u8>,

    /// Erase the field at field_index
    #[arg(short = 'e')]
    erase: bool,

    /// Dump the NVP file into a raw file
    #[arg(short = 'd', value_name = "raw_file")]
    dump: Option<PathBuf>,

    /// New NVP file to upload over the existing one
    #[arg(short = 'o', value_name = "new_nvp_file")]
    upload: Option<PathBuf>,

    /// I2C bus number (default 1)
    #[arg(short = 'b', value_name = "i2c_bus")]
    bus: Option<u8>,

    /// Target address of the EEPROM in hex (default 0x50)
    #[arg(short = 's', value_name = "target_addr", value_parser = parse_hex_u8)]
    slave: Option<u8>,

    /// Print the GPT header: NVP partition names and GUIDs
    #[arg(short = 'p')]
    print_gpt: bool,

    /// MTD partition path, bypassing /proc/mtd discovery
    #[arg(short = 'D', value_name = "device")]
    device: Option<PathBuf>,

    /// Show version information
    #[arg(short = 'V')]
    version: bool,
}

fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|err| err.to_string())
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|err| err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Spinor,
    Eeprom,
}

fn target_of(args: &Args) -> Target {
    if args.partition.as_deref() == Some(bsd::BSD_PARTITION_NAME)
        || args.guid.as_deref() == Some("0")
    {
        Target::Eeprom
    } else {
        Target::Spinor
    }
}

/// Enforces the option-combination rules before any device is touched.
fn verify(args: &Args, target: Target) -> anyhow::Result<()> {
    let has_target = args.partition.is_some() || args.guid.is_some();
    let has_other = has_target
        || args.file.is_some()
        || args.index.is_some()
        || args.read
        || args.erase
        || args.write.is_some()
        || args.valid.is_some()
        || args.bus.is_some()
        || args.slave.is_some()
        || args.dump.is_some()
        || args.upload.is_some();

    if args.print_gpt || args.version {
        if has_other {
            bail!("option -p or -V can't be mixed with others");
        }
        if args.print_gpt && args.version {
            bail!("options -p and -V can't be mixed together");
        }
        if args.version && args.device.is_some() {
            bail!("option -V can't be mixed with -D");
        }
        return Ok(());
    }

    if !has_target {
        bail!("option -t or -u must be specified");
    }
    if args.partition.is_some() && args.guid.is_some() {
        bail!("options -t and -u can't be mixed together");
    }

    // One action, with -w and -v as the only combinable pair.
    let groups = [
        args.read,
        args.erase,
        args.write.is_some() || args.valid.is_some(),
        args.dump.is_some(),
        args.upload.is_some(),
    ];
    let selected = groups.iter().filter(|&&g| g).count();
    if selected == 0 {
        bail!("must select one of the options: -r, -e, -w, -v, -d, -o");
    }
    if selected > 1 {
        bail!("options -r, -e, -w/-v, -d, -o can't be mixed together (only -w and -v combine)");
    }

    match target {
        Target::Spinor => {
            if args.file.is_none() && args.index.is_none() {
                bail!("options -f and -i must be specified");
            }
        }
        Target::Eeprom => {
            if args.device.is_some() {
                bail!("option -D can't be used with the Boot-Strap Data EEPROM");
            }
            if args.dump.is_none() && args.upload.is_none() && args.index.is_none() {
                bail!("option -i must be specified");
            }
        }
    }
    Ok(())
}

/// Runs the requested field operation on an opened record.
fn operate<S: NvpStore>(
    record: &mut NvpRecord<'_, S>,
    args: &Args,
    index: u64,
) -> anyhow::Result<()> {
    if args.read {
        let field = record.read_field(index)?;
        println!("{field}");
    } else if let Some(value) = args.write {
        let valid = args.valid.map(ValidBit::try_from).transpose()?;
        record.write_field(index, value, valid)?;
    } else if let Some(valid) = args.valid {
        record.set_valid(index, ValidBit::try_from(valid)?)?;
    } else if args.erase {
        record.erase_field(index)?;
    }
    Ok(())
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.version {
        println!("nvparm version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    match target_of(args) {
        Target::Eeprom => bsd::run(args),
        Target::Spinor => spinor::run(args),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .expect("no logger installed yet");

    if let Err(err) = verify(&args, target_of(&args)).and_then(|()| run(&args)) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
