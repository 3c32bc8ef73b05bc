use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stepper_link::config::{Config, ConfigLoader};
use stepper_link::console::{self, Console, ConsoleEvents, PromptChooser};
use stepper_link::{
    DeviceChooser, FixedPortChooser, LinkSession, NativeSerialDevice, StepperController,
};
use tokio::signal;
use tracing::{info, warn};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Operator console for a serial stepper-motor tester.",
    long_about = "Connects to a stepper tester over a USB serial port, sends motion and limit commands, and shows every line exchanged with the device."
)]
struct Args {
    /// Serial port to connect to at startup (name or configured alias).
    #[arg(short, long)]
    port: Option<String>,

    /// Configuration file; defaults to the standard search path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit.
    #[arg(short, long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Print events and replies as JSON lines.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref());
    let config = match &loaded {
        Ok(loader) => loader.config().clone(),
        Err(_) => ConfigLoader::with_defaults().into_config(),
    };
    stepper_link::logging::init(&config.logging, args.log_level.as_deref())?;
    match &loaded {
        Ok(ConfigLoader {
            config_path: Some(path),
            ..
        }) => info!("Loaded configuration from {}", path.display()),
        Ok(_) => info!("No configuration file found, using defaults"),
        Err(e) => warn!("Using default configuration: {e}"),
    }

    if args.list {
        return list_ports();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(args, config));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_millis(250));
    result
}

fn load_config(path: Option<&std::path::Path>) -> stepper_link::ConfigResult<ConfigLoader> {
    match path {
        Some(path) => ConfigLoader::load_from(path),
        None => ConfigLoader::load(),
    }
}

fn list_ports() -> Result<(), Box<dyn std::error::Error>> {
    let devices = NativeSerialDevice::available()?;
    if devices.is_empty() {
        println!("No serial ports found");
    }
    for device in devices {
        println!("{}", device.describe());
    }
    Ok(())
}

async fn run(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let input = console::stdin_lines();
    let port = args.port.or_else(|| config.serial.port.clone());

    let chooser: Arc<dyn DeviceChooser> = match &port {
        Some(name) => Arc::new(FixedPortChooser::new(config.serial.resolve_port(name))),
        None => Arc::new(PromptChooser::new(input.clone())),
    };

    let session = LinkSession::new(
        chooser,
        config.serial.port_configuration(),
        Arc::new(ConsoleEvents::new(args.json)),
    );
    let controller = Arc::new(StepperController::new(
        session.link(),
        config.motion.clone(),
    ));
    session.set_dispatcher(controller.clone());

    if port.is_some() {
        // Failures are reported by the session; the console still starts.
        let _ = session.select_device().await;
    }

    let console = Console::new(session.clone(), controller, args.json);
    let outcome = tokio::select! {
        result = console.run(input) => result,
        _ = shutdown_signal() => {
            info!("Interrupted");
            Ok(())
        }
    };

    session.close().await;
    outcome.map_err(Into::into)
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
