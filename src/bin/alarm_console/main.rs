use chrono::{DateTime, Utc};
use clap::{Arg, ArgMatches, Command};
use log::{error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tm_alarm_console::alarm_event::AlarmEvent;
use tm_alarm_console::alarm_filter::{self, BoolOp};
use tm_alarm_console::archive::{ArchiveClient, PatchAlarmOptions};
use tm_alarm_console::daemon;
use tm_alarm_console::read_config::{self, ConsoleConfig};
use tm_alarm_console::registry::{AlarmRegistry, ListenerFn};
use tm_alarm_console::subscriber::{AlarmSubscriber, SnapshotSource};
use tm_alarm_console::util::error::DynResult;
use tokio::signal;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_FILE: &str = "alarm_console.conf";

fn alarm_line(event: &AlarmEvent) -> String {
    format!(
        "{} {} seq {} at {}: severity {} (trigger {}, worst {})",
        event.transition.as_str(),
        event.parameter(),
        event.seq_num,
        event.key.trigger_time,
        event.current_level,
        event.trigger_level,
        event.most_severe_level
    )
}

fn build_filter(conf: &ConsoleConfig, args: &ArgMatches) -> DynResult<Option<BoolOp>> {
    let text = match args.value_of("filter").or(conf.filter.as_deref()) {
        Some(text) => text,
        None => return Ok(None),
    };
    match alarm_filter::parse_filter(text) {
        Ok(filter) => Ok(Some(filter)),
        Err(e) => Err(format!("Invalid filter expression '{}': {}", text, e).into()),
    }
}

async fn monitor(conf: ConsoleConfig, filter: Option<BoolOp>) {
    let registry = Arc::new(Mutex::new(AlarmRegistry::new()));
    let archive = Arc::new(ArchiveClient::new(&conf.archive_url));

    let printer: Arc<ListenerFn> = Arc::new(Mutex::new(move |event: &AlarmEvent| {
        if let Some(filter) = &filter {
            if !filter.evaluate(event) {
                return Ok(());
            }
        }
        info!("{}", alarm_line(event));
        Ok(())
    }));
    registry.lock().unwrap().add_listener(&printer);

    let shutdown = CancellationToken::new();
    let subscriber = AlarmSubscriber {
        address: conf.channel_address.clone(),
        registry: registry.clone(),
        snapshot: Some(SnapshotSource {
            client: archive,
            instance: conf.instance.clone(),
        }),
        reconnect_interval: Duration::from_secs_f64(conf.reconnect_interval),
    };
    let mut subscriber_task = tokio::spawn(subscriber.run(shutdown.clone()));

    daemon::ready();
    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to wait for ctrl-c: {}", e);
            }
            shutdown.cancel();
            if let Err(e) = (&mut subscriber_task).await {
                error!("Alarm subscriber failed: {}", e);
            }
        },
        res = &mut subscriber_task => {
            if let Err(e) = res {
                error!("Alarm subscriber failed: {}", e);
            }
        }
    }

    info!(
        "{} alarms still active at exit",
        registry.lock().unwrap().len()
    );
    daemon::exiting();
}

async fn acknowledge(conf: &ConsoleConfig, args: &ArgMatches) -> DynResult<()> {
    let parameter = args.value_of("PARAMETER").unwrap();
    let seq_num: u32 = args
        .value_of("SEQNUM")
        .unwrap()
        .parse()
        .map_err(|_| "Sequence number must be an unsigned integer")?;
    let client = ArchiveClient::new(&conf.archive_url);
    let options = PatchAlarmOptions {
        state: Some("acknowledged".to_string()),
        comment: args.value_of("comment").map(String::from),
    };
    let updated = client
        .patch_parameter_alarm(&conf.instance, &conf.processor, parameter, seq_num, &options)
        .await?;
    info!(
        "Acknowledged alarm {} seq {}, now {}",
        parameter,
        seq_num,
        updated.transition.as_str()
    );
    Ok(())
}

fn parse_time_arg(args: &ArgMatches, name: &str) -> DynResult<Option<DateTime<Utc>>> {
    match args.value_of(name) {
        None => Ok(None),
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(time) => Ok(Some(time.with_timezone(&Utc))),
            Err(e) => Err(format!("Invalid {} time '{}': {}", name, text, e).into()),
        },
    }
}

async fn list(conf: &ConsoleConfig, args: &ArgMatches) -> DynResult<()> {
    let start = parse_time_arg(args, "since")?;
    let stop = parse_time_arg(args, "until")?;
    let client = ArchiveClient::new(&conf.archive_url);
    let notices = client.list_alarms(&conf.instance, start, stop).await?;
    if notices.is_empty() {
        info!("No alarms recorded");
        return Ok(());
    }
    for notice in notices {
        match AlarmEvent::try_from(notice) {
            Ok(event) => info!("{}", alarm_line(&event)),
            Err(e) => warn!("Skipping alarm record: {}", e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let app_args = Command::new("Alarm console")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Terminal console for the active alarms of a telemetry server")
        .arg(
            Arg::new("CONF")
                .default_value(DEFAULT_CONFIG_FILE)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("filter")
                .long("filter")
                .takes_value(true)
                .help("Only show alarms matching this filter expression"),
        )
        .subcommand(
            Command::new("ack")
                .about("Acknowledge an active alarm")
                .arg(
                    Arg::new("PARAMETER")
                        .required(true)
                        .help("Qualified parameter name"),
                )
                .arg(
                    Arg::new("SEQNUM")
                        .required(true)
                        .help("Alarm sequence number"),
                )
                .arg(
                    Arg::new("comment")
                        .long("comment")
                        .takes_value(true)
                        .help("Acknowledgement comment"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List alarms recorded in the archive")
                .arg(
                    Arg::new("since")
                        .long("since")
                        .takes_value(true)
                        .help("Range start, RFC 3339"),
                )
                .arg(
                    Arg::new("until")
                        .long("until")
                        .takes_value(true)
                        .help("Range stop, RFC 3339"),
                ),
        );
    let app_args = daemon::add_args(app_args);
    let args = app_args.get_matches();

    daemon::start(&args);

    let conf_path = Path::new(args.value_of("CONF").unwrap());
    let conf = match read_config::read_config(conf_path) {
        Ok(conf) => conf,
        Err(e) => {
            error!(
                "Failed to read configuration file '{}': {}",
                conf_path.to_string_lossy(),
                e
            );
            return;
        }
    };

    match args.subcommand() {
        Some(("ack", ack_args)) => {
            if let Err(e) = acknowledge(&conf, ack_args).await {
                error!("{}", e);
            }
        }
        Some(("list", list_args)) => {
            if let Err(e) = list(&conf, list_args).await {
                error!("{}", e);
            }
        }
        _ => {
            let filter = match build_filter(&conf, &args) {
                Ok(filter) => filter,
                Err(e) => {
                    error!("{}", e);
                    return;
                }
            };
            monitor(conf, filter).await;
        }
    }
}
