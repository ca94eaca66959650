use clap::Parser;
use hrm_listener::HeartRateClient;
use hrm_listener::adapter::bluer::BluerAdapter;
use hrm_listener::adapter::event_channel;
use hrm_listener::app::{Options, RunError, run_with_io};
use log::{debug, warn};
use std::panic::{self, PanicHookInfo};
use std::time::Duration;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// How long to wait for BlueZ to confirm the disconnect before exiting
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Log warnings by default, handshake steps with `--verbose`.
/// `RUST_LOG` takes precedence over both.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();
}

/// Bring up the BlueZ adapter, then scan, connect and print measurements
/// to stdout until the count is reached or the sensor goes away.
async fn run(options: Options) -> Result<(), RunError> {
    let (events_tx, events_rx) = event_channel();
    let adapter = BluerAdapter::new(events_tx).await?;
    let mut client = HeartRateClient::new(adapter, events_rx);

    let mut stdout = std::io::stdout();
    run_with_io(&options, &mut client, &mut stdout).await?;

    if client.disconnect() {
        match tokio::time::timeout(DISCONNECT_GRACE, client.wait_released()).await {
            Ok(true) => debug!("Sensor released"),
            Ok(false) => warn!("Bluetooth adapter stopped before the sensor was released"),
            Err(_) => warn!("Sensor did not confirm disconnect within {DISCONNECT_GRACE:?}"),
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
