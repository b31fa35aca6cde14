use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use systemd::daemon::notify;
use systemd::daemon::{STATE_READY, STATE_STOPPING};
use systemd::journal::JournalLog;

static DAEMON: AtomicBool = AtomicBool::new(true);

pub fn add_args(app_args: Command) -> Command {
    app_args.arg(
        Arg::new("no_systemd")
            .long("no_systemd")
            .help("Don't expect to be run from systemd"),
    )
}

pub fn start(args: &ArgMatches) {
    DAEMON.store(!args.is_present("no_systemd"), Ordering::Relaxed);
    if DAEMON.load(Ordering::Relaxed) {
        if let Err(e) = JournalLog::init() {
            eprintln!("Failed to start logging: {}", e);
        }
        info!("Console starting");
    } else {
        tracing_subscriber::fmt::init();
        info!("Console starting");
    }
}

pub fn ready() {
    if DAEMON.load(Ordering::Relaxed) {
        if let Err(e) = notify(false, [(STATE_READY, "1")].iter()) {
            warn!("Failed to notify systemd of ready state: {}", e);
        }
    } else {
        info!("Console ready");
    }
}

pub fn exiting() {
    if DAEMON.load(Ordering::Relaxed) {
        if let Err(e) = notify(false, [(STATE_STOPPING, "1")].iter()) {
            warn!("Failed to notify systemd of stopping: {}", e);
        }
    } else {
        info!("Console exiting");
    }
}
