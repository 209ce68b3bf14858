// spacefn CLI
// Grabs one keyboard and turns the modifier key into a tap-or-layer key

use std::io;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use evdev::Device;

use spacefn_core::input::{capabilities_of, device_info, scan_keyboards, EvdevSource};
use spacefn_core::output::UInputSink;
use spacefn_core::{
    is_keyboard, run, Config, ConfigError, DisambiguationEngine, EventLoopError, LoopExit,
    OutputError,
};

/// Space as a layer key for any evdev keyboard
#[derive(Parser, Debug)]
#[command(name = "spacefn")]
#[command(version)]
#[command(about = "Tap Space for space, hold it for a navigation layer", long_about = None)]
struct Args {
    /// List keyboard devices and exit
    #[arg(long)]
    scan: bool,

    /// TOML configuration file (default: ~/.config/spacefn/config.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Keyboard device to grab, e.g. /dev/input/event3
    #[arg(value_name = "DEVICE")]
    device: Option<PathBuf>,
}

/// Everything that can stop the daemon before or while it runs
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("No input device given (try --scan to list keyboards)")]
    MissingDevice,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} does not look like a keyboard", .0.display())]
    NotKeyboard(PathBuf),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Failed to grab {}: {source}", path.display())]
    Grab {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to install signal handler: {0}")]
    Signal(io::Error),

    #[error(transparent)]
    Loop(#[from] EventLoopError),
}

impl StartupError {
    fn exit_code(&self) -> u8 {
        match self {
            StartupError::MissingDevice | StartupError::Config(_) => 1,
            StartupError::Open { .. } => 2,
            StartupError::NotKeyboard(_) => 4,
            StartupError::Output(OutputError::Unavailable(_)) => 5,
            StartupError::Output(OutputError::DeviceCreation(_)) => 6,
            StartupError::Grab { .. } => 7,
            StartupError::Output(OutputError::Write(_))
            | StartupError::Signal(_)
            | StartupError::Loop(_) => 99,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

/// Route SIGINT and SIGTERM to a shutdown flag plus a self-pipe.
///
/// The flag is set before the pipe is written, so a wait woken by the pipe
/// always observes it.
fn install_signal_handlers() -> io::Result<(Arc<AtomicBool>, UnixStream)> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let (wake_read, wake_write) = UnixStream::pair()?;
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))?;
        signal_hook::low_level::pipe::register(signal, wake_write.try_clone()?)?;
    }
    Ok((shutdown, wake_read))
}

/// Print every keyboard-shaped device
fn scan() -> anyhow::Result<()> {
    std::fs::read_dir("/dev/input").context("Cannot read /dev/input")?;

    let keyboards = scan_keyboards();
    if keyboards.is_empty() {
        println!("No keyboards found (is this user allowed to read /dev/input?)");
        return Ok(());
    }

    println!("Found {} keyboard device(s):", keyboards.len());
    for keyboard in &keyboards {
        println!("{}", keyboard);
    }
    Ok(())
}

fn open_keyboard(path: &Path) -> Result<Device, StartupError> {
    let device = Device::open(path).map_err(|source| StartupError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    if !is_keyboard(&capabilities_of(&device)) {
        return Err(StartupError::NotKeyboard(path.to_path_buf()));
    }

    log::info!("Using {}", device_info(path, &device).name);
    Ok(device)
}

/// Grab the device and remap until a signal, the eject key, or a fatal error
fn operate(args: &Args) -> Result<LoopExit, StartupError> {
    let path = args.device.as_deref().ok_or(StartupError::MissingDevice)?;

    let config = Config::load(args.config.as_deref())?;
    match &config.source_path {
        Some(source) => log::info!("Loaded config from {}", source.display()),
        None => log::debug!("No config file, using built-in layer"),
    }

    let device = open_keyboard(path)?;

    let engine_config = config.engine;
    let extra_keys = engine_config
        .keymap
        .output_keys()
        .chain([engine_config.shift_key, engine_config.modifier])
        .collect::<Vec<_>>();
    let mut sink = UInputSink::mirror(&device, extra_keys)?;
    if let Ok(Some(node)) = sink.dev_node() {
        log::debug!("Virtual keyboard at {}", node.display());
    }

    let (shutdown, wake) = install_signal_handlers().map_err(StartupError::Signal)?;

    // Let the key release that launched us reach the desktop before grabbing
    std::thread::sleep(config.startup_delay);

    let mut source = EvdevSource::new(device)
        .with_wakeup(wake)
        .map_err(StartupError::Signal)?;
    source.grab().map_err(|e| StartupError::Grab {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut engine = DisambiguationEngine::new(engine_config, sink);
    let exit = run(&mut source, &mut engine, &shutdown)?;

    source.ungrab();
    Ok(exit)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_logging(args.verbose);

    if args.scan {
        return match scan() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{:#}", e);
                ExitCode::from(2)
            }
        };
    }

    match operate(&args) {
        Ok(LoopExit::Signal) => {
            log::info!("Received signal, exiting");
            ExitCode::SUCCESS
        }
        Ok(LoopExit::Eject) => {
            log::info!("Eject key pressed, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["spacefn", "/dev/input/event3"]);
        assert_eq!(args.device, Some(PathBuf::from("/dev/input/event3")));
        assert!(args.config.is_none());
        assert!(!args.scan);
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_with_options() {
        let args = Args::parse_from([
            "spacefn",
            "--config",
            "/tmp/spacefn.toml",
            "--verbose",
            "/dev/input/event0",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/spacefn.toml")));
        assert!(args.verbose);
        assert_eq!(args.device, Some(PathBuf::from("/dev/input/event0")));
    }

    #[test]
    fn test_scan_needs_no_device() {
        let args = Args::parse_from(["spacefn", "--scan"]);
        assert!(args.scan);
        assert!(args.device.is_none());
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let err = Args::try_parse_from(["spacefn", "--bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_signal_sets_flag_and_wakes_poll() {
        use std::io::Read;
        use std::sync::atomic::Ordering;

        let (shutdown, mut wake) = install_signal_handlers().unwrap();
        assert!(!shutdown.load(Ordering::SeqCst));

        signal_hook::low_level::raise(signal_hook::consts::SIGTERM).unwrap();

        assert!(shutdown.load(Ordering::SeqCst));
        let mut byte = [0u8; 1];
        wake.read_exact(&mut byte).unwrap();
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(StartupError::MissingDevice.exit_code(), 1);
        assert_eq!(
            StartupError::NotKeyboard(PathBuf::from("/dev/input/event9")).exit_code(),
            4
        );
        let denied = || io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(
            StartupError::Open {
                path: PathBuf::from("/dev/input/event9"),
                source: denied(),
            }
            .exit_code(),
            2
        );
        assert_eq!(StartupError::Output(OutputError::Unavailable(denied())).exit_code(), 5);
        assert_eq!(StartupError::Output(OutputError::DeviceCreation(denied())).exit_code(), 6);
        assert_eq!(
            StartupError::Grab {
                path: PathBuf::from("/dev/input/event9"),
                source: denied(),
            }
            .exit_code(),
            7
        );
    }
}
