use crate::util::error::DynResult;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

fn default_processor() -> String {
    "realtime".to_string()
}

fn default_reconnect_interval() -> f64 {
    10.0
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct ConsoleConfig {
    /// Deployment instance the console watches
    pub instance: String,
    /// host:port of the push channel endpoint
    pub channel_address: String,
    /// Base URL of the REST interface
    pub archive_url: String,
    #[serde(default = "default_processor")]
    pub processor: String,
    /// Filter expression limiting which alarms are shown
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: f64,
}

pub fn read_config(path: &Path) -> DynResult<ConsoleConfig> {
    let f = File::open(path)?;
    let conf: ConsoleConfig = serde_json::from_reader(f)?;
    Ok(conf)
}

#[test]
fn test_parse_config() {
    let conf: ConsoleConfig = serde_json::from_str(
        r#"{
            "instance": "simulator",
            "channel_address": "localhost:8090",
            "archive_url": "http://localhost:8090"
        }"#,
    )
    .unwrap();
    assert_eq!(conf.instance, "simulator");
    assert_eq!(conf.processor, "realtime");
    assert_eq!(conf.filter, None);
    assert_eq!(conf.reconnect_interval, 10.0);

    let res = serde_json::from_str::<ConsoleConfig>(
        r#"{
            "instance": "simulator",
            "channel_address": "localhost:8090",
            "archive_url": "http://localhost:8090",
            "colour": "mauve"
        }"#,
    );
    assert!(res.is_err());
}
