use clap::{ArgMatches, Command};
use log::info;

pub fn add_args(app_args: Command) -> Command {
    app_args
}

pub fn start(_args: &ArgMatches) {
    tracing_subscriber::fmt::init();
    info!("Console starting");
}

pub fn ready() {
    info!("Console ready");
}

pub fn exiting() {
    info!("Console exiting");
}
