#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! # rbui
//!
//! Command-line interface to a RockBLOCK Iridium SBD modem.
//!
//! ## Subcommands
//!
//! - `rbui send <msg>` — write one message and run satellite sessions until
//!   the gateway accepts it
//! - `rbui recv` — poll for incoming messages until interrupted
//! - `rbui status` — one-shot signal strength and mailbox check
//!
//! Every message sent or received is appended to a durable message log; all
//! wire traffic goes to a debug log. Paths and the serial device come from
//! `rbui.toml` or the `RBUI_PORT` / `RBUI_LOG_DEBUG` / `RBUI_LOG_MSG`
//! environment variables.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use rbui::{Config, Error, MessageLog, RockBlock};

/// Command-line interface to a RockBLOCK Iridium SBD modem.
#[derive(Parser)]
#[command(name = "rbui", version)]
struct Cli {
    /// Show wire-level traffic on the console as well as in the debug log.
    #[arg(long, global = true)]
    debug: bool,

    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message, reporting anything received along the way.
    Send { msg: String },
    /// Poll for incoming messages until interrupted.
    Recv,
    /// Query signal strength and whether messages are waiting.
    Status,
}

/// Poll-loop stop flag, set by the SIGINT handler installed for `recv`.
/// Owned by this shell; the driver never sees it.
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn stop_on_sigint(_signal: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());
    let _guard = init_tracing(&config.log.debug, cli.debug);

    info!("rbui v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(cli.command, &config) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(command: Commands, config: &Config) -> rbui::Result<()> {
    info!("connecting to serial device {}", config.serial.port);
    let log = MessageLog::open(Path::new(&config.log.message)).map_err(Error::Log)?;
    let mut rb = RockBlock::open(&config.serial.port, Some(log))?;

    match command {
        Commands::Send { msg } => {
            // A half-sent session must not be abandoned mid-exchange.
            install_sigint(SigHandler::SigIgn);
            let incidental = rb.send_recv(&msg)?;
            info!("message sent");
            for msg in &incidental {
                info!("received while sending: {msg:?}");
            }
        }
        Commands::Recv => {
            let interval = Duration::from_secs(config.recv.poll_interval_secs);
            recv_loop(&mut rb, interval)?;
        }
        Commands::Status => {
            let strength = rb.check_sig_strength()?;
            let waiting = rb.msg_waiting()?;
            println!("signal strength: {strength}/5");
            println!("messages waiting: {}", if waiting { "yes" } else { "no" });
        }
    }

    rb.close()
}

/// Poll the mailbox until SIGINT. Interruption takes effect between polls,
/// never inside a session.
fn recv_loop(rb: &mut RockBlock, interval: Duration) -> rbui::Result<()> {
    install_sigint(SigHandler::Handler(stop_on_sigint));

    while !STOP.load(Ordering::SeqCst) {
        info!("checking for messages");
        match rb.recv_all() {
            Ok(messages) => {
                for msg in &messages {
                    info!("received {msg:?}");
                }
            }
            // A drained retry budget usually means the constellation is out
            // of view; try again next round.
            Err(Error::Timeout { query, attempts }) => {
                warn!("{query} timed out after {attempts} attempts, will poll again");
            }
            Err(err) => return Err(err),
        }
        info!("sleeping");
        interruptible_sleep(interval);
    }

    info!("stopped");
    Ok(())
}

/// Sleep for `total`, waking early if the stop flag is raised.
fn interruptible_sleep(total: Duration) {
    let deadline = Instant::now() + total;
    while !STOP.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        thread::sleep(remaining.min(Duration::from_secs(1)));
    }
}

fn install_sigint(handler: SigHandler) {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: the replacement handlers either ignore the signal or perform
    // a single atomic store, which is async-signal-safe.
    if let Err(e) = unsafe { signal::sigaction(Signal::SIGINT, &action) } {
        warn!("failed to install SIGINT handler: {e}");
    }
}

/// Console layer at `info` (or `debug` with `--debug`, or whatever
/// `RUST_LOG` says), plus an always-debug file layer on the debug log.
fn init_tracing(
    debug_log: &str,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| if verbose { "debug" } else { "info" }.to_string());
    let console = tracing_subscriber::fmt::layer().with_filter(EnvFilter::new(console_filter));

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(debug_log)
    {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            tracing_subscriber::registry()
                .with(console)
                .with(file_layer)
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(console).init();
            warn!("failed to open debug log {debug_log}: {e}");
            None
        }
    }
}
