use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use etp_core::device::{firmware_version_if_ready, hardware_id, module_id};
use etp_core::eeprom::{eeprom_checksum, eeprom_version};
use etp_core::{
    DeviceChannel, EepromOutcome, EepromSession, FirmwareImage, IapEvent, IapObserver,
    IapTransport, TracingObserver, UpdateConfig, UpdateOutcome, UpdateSession, UpdateTarget,
    discover, open_hidraw, open_i2c,
};
use tracing::{error, info, warn};

const DEFAULT_FIRMWARE: &str = "elan_i2c.bin";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Firmware updater for ELAN touchpads",
    long_about = None,
    disable_version_flag = true
)]
struct Args {
    /// Firmware binary (default elan_i2c.bin)
    #[arg(short, long)]
    bin: Option<PathBuf>,

    /// Vendor ID, hex (default 04f3)
    #[arg(short, long, value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// Product ID, hex (default 30c5)
    #[arg(short, long, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// /dev/hidraw number
    #[arg(short = 'H', long)]
    hidraw: Option<u32>,

    /// /dev/i2c- number
    #[arg(short, long = "i2cnum")]
    i2cnum: Option<u32>,

    /// I2C address, hex (default 15)
    #[arg(short = 'a', long = "i2caddr", value_parser = parse_hex_u16)]
    i2caddr: Option<u16>,

    /// Print the firmware version
    #[arg(short = 'g', long)]
    get_current_version: bool,

    /// Print the module ID
    #[arg(short = 'm', long)]
    get_module_id: bool,

    /// Print the hardware ID
    #[arg(long)]
    get_hardware_id: bool,

    /// Print the persisted EEPROM checksum
    #[arg(long)]
    get_eeprom_checksum: bool,

    /// Print the EEPROM firmware version
    #[arg(long)]
    get_eeprom_version: bool,

    /// Update the EEPROM instead of the main flash
    #[arg(long)]
    eeprom: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Configuration file (TOML); flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print version
    #[arg(short = 'z', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value \"{s}\": {e}"))
}

/// Prints one line per written block; everything else goes to tracing.
struct ConsoleObserver {
    tracing: TracingObserver,
}

impl IapObserver for ConsoleObserver {
    fn on_event(&self, event: &IapEvent) {
        match event {
            IapEvent::BlockWritten {
                page,
                checksum,
                section,
            } => println!("{}", block_line(*page, *checksum, *section)),
            other => self.tracing.on_event(other),
        }
    }
}

fn block_line(page: usize, checksum: u16, section: usize) -> String {
    format!("Page {page:3} is updated, checksum: {checksum}, section: {section}")
}

fn build_config(args: &Args) -> Result<UpdateConfig> {
    let mut config = match &args.config {
        Some(path) => UpdateConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => UpdateConfig::default(),
    };

    if let Some(bin) = &args.bin {
        config.firmware = Some(bin.clone());
    }
    if let Some(vid) = args.vid {
        config.vid = vid;
    }
    if let Some(pid) = args.pid {
        config.pid = pid;
    }
    if let Some(address) = args.i2caddr {
        config.i2c_address = address;
    }
    if args.hidraw.is_some() {
        config.hidraw = args.hidraw;
    }
    if args.i2cnum.is_some() {
        config.i2c_bus = args.i2cnum;
    }
    if args.eeprom {
        config.target = UpdateTarget::Eeprom;
    }
    Ok(config)
}

fn open_channel(config: &UpdateConfig) -> Result<DeviceChannel> {
    let channel = match (config.hidraw, config.i2c_bus) {
        (Some(index), _) => open_hidraw(index)?,
        (None, Some(bus)) => open_i2c(bus, config.i2c_address)?,
        (None, None) => discover(config.vid, config.pid, config.i2c_address)?,
    };
    info!("{} interface", channel.interface());
    Ok(channel)
}

/// Print a queried value; `None` means the device could not answer.
fn report(value: Option<String>) -> i32 {
    match value {
        Some(v) => {
            println!("{v}");
            0
        }
        None => {
            println!("-1");
            1
        }
    }
}

fn is_query(args: &Args) -> bool {
    args.get_current_version
        || args.get_module_id
        || args.get_hardware_id
        || args.get_eeprom_checksum
        || args.get_eeprom_version
}

fn run_query(args: &Args, channel: DeviceChannel) -> Result<i32> {
    if args.get_current_version {
        let version = firmware_version_if_ready(&channel)?;
        return Ok(report(version.map(|v| format!("{v:x}"))));
    }
    if args.get_module_id {
        return Ok(report(Some(format!("{:x}", module_id(&channel)?))));
    }
    if args.get_hardware_id {
        return Ok(report(Some(format!("{:x}", hardware_id(&channel)?))));
    }
    if args.get_eeprom_checksum {
        let channel = channel.promote_for_eeprom();
        return Ok(report(Some(format!("{:x}", eeprom_checksum(&channel)?))));
    }
    let channel = channel.promote_for_eeprom();
    Ok(report(Some(format!("{:x}", eeprom_version(&channel)?))))
}

fn run(args: &Args) -> Result<i32> {
    let config = build_config(args)?;
    if is_query(args) {
        return run_query(args, open_channel(&config)?);
    }

    let path = config
        .firmware
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FIRMWARE));
    let image = FirmwareImage::load(&path)
        .with_context(|| format!("Cannot load binary: {}", path.display()))?;
    let channel = open_channel(&config)?;

    let observer = Arc::new(ConsoleObserver {
        tracing: TracingObserver,
    });

    match config.target {
        UpdateTarget::Main => {
            let mut session =
                UpdateSession::with_observer(channel, observer).with_timing(config.timing);
            match session.run(&image)? {
                UpdateOutcome::Completed => info!("Firmware update completed"),
                UpdateOutcome::CompletedWithChecksumWarning { local, remote } => {
                    warn!("checksum diff local=[{local:04X}], remote=[{remote:04X}]")
                }
            }
            Ok(0)
        }
        UpdateTarget::Eeprom => {
            let channel = channel.promote_for_eeprom();
            let mut session =
                EepromSession::with_observer(channel, observer).with_timing(config.timing);
            match session.run(&image)? {
                EepromOutcome::Completed { checksum } => {
                    info!("EEPROM update completed, checksum {checksum:04X}");
                    Ok(0)
                }
                EepromOutcome::ChecksumMismatch { local, remote } => {
                    error!("EEPROM checksum diff local=[{local:04X}], remote=[{remote:04X}]");
                    Ok(1)
                }
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.debug {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u16("04f3").unwrap(), 0x04F3);
        assert_eq!(parse_hex_u16("0x30C5").unwrap(), 0x30C5);
        assert!(parse_hex_u16("xyz").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from(["etp-updater", "-i", "3", "-a", "2c", "--eeprom", "-b", "fw.bin"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.i2c_bus, Some(3));
        assert_eq!(config.i2c_address, 0x2C);
        assert_eq!(config.target, UpdateTarget::Eeprom);
        assert_eq!(config.firmware, Some(PathBuf::from("fw.bin")));
        assert_eq!(config.vid, 0x04F3);
    }

    #[test]
    fn test_image_loaded_before_device_opened() {
        let args = Args::parse_from(["etp-updater", "-H", "250", "-b", "/nonexistent/fw.bin"]);
        assert!(!is_query(&args));
        let err = run(&args).unwrap_err();
        assert!(format!("{err:#}").starts_with("Cannot load binary"));
    }

    #[test]
    fn test_block_line_format() {
        assert_eq!(
            block_line(7, 1234, 8),
            "Page   7 is updated, checksum: 1234, section: 8"
        );
    }

    #[test]
    fn test_hidraw_short_flag() {
        let args = Args::parse_from(["etp-updater", "-H", "2", "-g"]);
        assert_eq!(args.hidraw, Some(2));
        assert!(args.get_current_version);
    }
}
