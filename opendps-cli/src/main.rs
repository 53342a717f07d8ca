//! dpsctl - Command-line tool for controlling OpenDPS power supplies.
//!
//! ## Features
//!
//! - Set output voltage and current limit
//! - Enable/disable the output and lock the front panel
//! - Query live measurements (plain text or JSON)
//! - Firmware upgrades with a progress bar
//! - Shell completion generation
//! - Environment variable support

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use log::debug;
use opendps::{
    Device, NativePortEnumerator, PortEnumerator, PortInfo, QueryStatus, Screen, VersionInfo,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::io;
use std::path::PathBuf;

/// dpsctl - control and upgrade OpenDPS power supplies over serial.
///
/// Environment variables:
///   DPSCTL_PORT  - Default serial port
///   DPSCTL_BAUD  - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "dpsctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-selected if exactly one port exists).
    #[arg(short, long, global = true, env = "DPSCTL_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "DPSCTL_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Screens selectable on the device display.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScreenArg {
    /// Main voltage/current screen.
    Main,
    /// Settings screen.
    Settings,
}

impl From<ScreenArg> for Screen {
    fn from(screen: ScreenArg) -> Self {
        match screen {
            ScreenArg::Main => Screen::Main,
            ScreenArg::Settings => Screen::Settings,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Check that the device responds.
    Ping,

    /// Enable the power output.
    On,

    /// Disable the power output.
    Off,

    /// Lock the front panel buttons.
    Lock,

    /// Unlock the front panel buttons.
    Unlock,

    /// Set the output voltage in millivolts.
    Voltage {
        /// Target voltage in millivolts.
        millivolts: u32,
    },

    /// Set the output current limit in milliamps.
    Current {
        /// Current limit in milliamps.
        milliamps: u32,
    },

    /// Set the display brightness.
    Brightness {
        /// Brightness percentage (0-100).
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// Switch the active screen.
    Screen {
        /// Screen to show.
        #[arg(value_enum)]
        screen: ScreenArg,
    },

    /// Read voltages, current, output state and temperatures.
    Query {
        /// Output measurements as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read bootloader and firmware versions.
    Version {
        /// Output versions as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Upgrade the device firmware from a binary image.
    Upgrade {
        /// Path to the firmware image.
        firmware: PathBuf,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!(
        "dpsctl v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Ping => {
            let mut device = open_device(&cli)?;
            device.ping()?;
            status_line(&cli, &style("✓").green().to_string(), "device is alive");
        },
        Commands::On => {
            open_device(&cli)?.set_output(true)?;
            status_line(&cli, &style("✓").green().to_string(), "output enabled");
        },
        Commands::Off => {
            open_device(&cli)?.set_output(false)?;
            status_line(&cli, &style("✓").green().to_string(), "output disabled");
        },
        Commands::Lock => {
            open_device(&cli)?.set_lock(true)?;
            status_line(&cli, &style("✓").green().to_string(), "panel locked");
        },
        Commands::Unlock => {
            open_device(&cli)?.set_lock(false)?;
            status_line(&cli, &style("✓").green().to_string(), "panel unlocked");
        },
        Commands::Voltage { millivolts } => {
            open_device(&cli)?.set_voltage_mv(*millivolts)?;
            status_line(
                &cli,
                &style("✓").green().to_string(),
                &format!("voltage set to {millivolts} mV"),
            );
        },
        Commands::Current { milliamps } => {
            open_device(&cli)?.set_current_ma(*milliamps)?;
            status_line(
                &cli,
                &style("✓").green().to_string(),
                &format!("current limit set to {milliamps} mA"),
            );
        },
        Commands::Brightness { percent } => {
            open_device(&cli)?.set_brightness(*percent)?;
            status_line(
                &cli,
                &style("✓").green().to_string(),
                &format!("brightness set to {percent}%"),
            );
        },
        Commands::Screen { screen } => {
            open_device(&cli)?.change_screen((*screen).into())?;
            status_line(&cli, &style("✓").green().to_string(), "screen changed");
        },
        Commands::Query { json } => {
            let status = open_device(&cli)?.query()?;
            print_query(&status, *json);
        },
        Commands::Version { json } => {
            let version = open_device(&cli)?.version()?;
            print_version(&version, *json);
        },
        Commands::Upgrade { firmware } => {
            cmd_upgrade(&cli, firmware)?;
        },
        Commands::ListPorts { json } => {
            cmd_list_ports(*json)?;
        },
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
        },
    }

    Ok(())
}

/// Print a glyph-prefixed status line unless quiet.
fn status_line(cli: &Cli, glyph: &str, message: &str) {
    if !cli.quiet {
        eprintln!("{glyph} {message}");
    }
}

/// Resolve the serial port from `--port` or auto-selection.
///
/// With no `--port` and exactly one port on the system, that port is
/// used; with zero or several ports the choice is ambiguous and the user
/// must pick one.
fn resolve_port(cli: &Cli) -> Result<String> {
    if let Some(ref port) = cli.port {
        return Ok(port.clone());
    }

    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;
    match ports.as_slice() {
        [only] => {
            if !cli.quiet {
                eprintln!(
                    "{} using the only serial port: {}",
                    style("→").green(),
                    style(&only.name).cyan()
                );
            }
            Ok(only.name.clone())
        },
        [] => anyhow::bail!("No serial ports found. Specify one with --port."),
        many => anyhow::bail!(
            "Multiple serial ports found ({}). Specify one with --port.",
            many.iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Open the device on the resolved port.
fn open_device(cli: &Cli) -> Result<Device<opendps::NativePort>> {
    let port = resolve_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} connecting to {} at {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            cli.baud
        );
    }
    Device::open(&port, cli.baud).with_context(|| format!("Failed to open port {port}"))
}

/// Query output: human-readable to stderr or JSON to stdout.
fn print_query(status: &QueryStatus, json: bool) {
    if json {
        let value = serde_json::json!({
            "v_in_mv": status.v_in,
            "v_out_mv": status.v_out,
            "i_out_ma": status.i_out,
            "output_enabled": status.output_enabled,
            "temp1_c": status.temp1,
            "temp2_c": status.temp2,
            "temp_shutdown": status.temp_shutdown,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return;
    }

    eprintln!("{}", style("Device status").bold().underlined());
    eprintln!("  V_in:   {} mV", status.v_in);
    eprintln!("  V_out:  {} mV", status.v_out);
    eprintln!("  I_out:  {} mA", status.i_out);
    eprintln!(
        "  Output: {}",
        if status.output_enabled {
            style("on").green().to_string()
        } else {
            style("off").red().to_string()
        }
    );
    if let Some(t) = status.temp1 {
        eprintln!("  Temp 1: {t:.1} °C");
    }
    if let Some(t) = status.temp2 {
        eprintln!("  Temp 2: {t:.1} °C");
    }
    if status.temp_shutdown {
        eprintln!("  {} output shut down due to temperature", style("⚠").yellow());
    }
}

/// Version output: human-readable to stderr or JSON to stdout.
fn print_version(version: &VersionInfo, json: bool) {
    if json {
        let value = serde_json::json!({
            "bootloader": version.bootloader,
            "firmware": version.firmware,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return;
    }

    eprintln!("Bootloader: {}", version.bootloader);
    eprintln!("Firmware:   {}", version.firmware);
}

/// Upgrade command implementation.
fn cmd_upgrade(cli: &Cli, firmware: &PathBuf) -> Result<()> {
    let image = std::fs::read(firmware)
        .with_context(|| format!("Failed to read firmware image {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} loaded {} ({} bytes)",
            style("📦").cyan(),
            firmware.display(),
            image.len()
        );
    }

    let mut device = open_device(cli)?;

    let pb = if cli.quiet || !console::Term::stderr().is_term() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };
    pb.set_message("flashing");

    device.upgrade_from_slice(&image, &mut |percent| {
        pb.set_position(u64::from(percent));
    })?;

    pb.finish_with_message("complete");

    if !cli.quiet {
        eprintln!("\n{} firmware upgrade complete", style("🎉").green().bold());
    }

    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")?;

    if json {
        let values: Vec<serde_json::Value> = ports.iter().map(port_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&values).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("none found").dim());
        return Ok(());
    }
    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial_number,
    })
}
