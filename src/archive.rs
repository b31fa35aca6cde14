use crate::channel::connection::AlarmNotice;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Debug)]
pub enum RequestError {
    Transport(reqwest::Error),
    Status(u16, String),
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::Transport(e) => Some(e),
            RequestError::Status(_, _) => None,
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Transport(e) => Display::fmt(e, f),
            RequestError::Status(code, body) => {
                write!(f, "Server returned status {}: {}", code, body)
            }
        }
    }
}

#[derive(Debug)]
pub enum Error {
    FetchFailed(RequestError),
    PatchFailed(RequestError),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FetchFailed(e) => Some(e),
            Error::PatchFailed(e) => Some(e),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::FetchFailed(e) => write!(f, "Alarm list fetch failed: {}", e),
            Error::PatchFailed(e) => write!(f, "Alarm patch failed: {}", e),
        }
    }
}

/// Body of an alarm PATCH, used for acknowledgement and shelving.
#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PatchAlarmOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ListAlarmsResponse {
    #[serde(default)]
    alarm: Vec<AlarmNotice>,
}

/// REST client for the archive and processor alarm endpoints.
pub struct ArchiveClient {
    base_url: String,
    http: reqwest::Client,
}

impl ArchiveClient {
    pub fn new(base_url: &str) -> ArchiveClient {
        ArchiveClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Alarms the server currently considers open, optionally restricted to
    /// a generation-time range. An absent `alarm` collection in the
    /// response means none.
    pub async fn list_alarms(
        &self,
        instance: &str,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Result<Vec<AlarmNotice>, Error> {
        let url = format!("{}/api/archive/{}/alarms", self.base_url, instance);
        debug!("Fetching alarm list from {}", url);
        let mut request = self.http.get(&url);
        if let Some(start) = start {
            request = request.query(&[("start", start.to_rfc3339())]);
        }
        if let Some(stop) = stop {
            request = request.query(&[("stop", stop.to_rfc3339())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::FetchFailed(RequestError::Transport(e)))?;
        let response = check_status(response).await.map_err(Error::FetchFailed)?;
        let listing: ListAlarmsResponse = response
            .json()
            .await
            .map_err(|e| Error::FetchFailed(RequestError::Transport(e)))?;
        Ok(listing.alarm)
    }

    /// Updates one alarm on a processor, acknowledging or shelving it.
    /// Qualified parameter names start with '/', so the name is appended to
    /// the path as is. Returns the server's updated representation.
    pub async fn patch_parameter_alarm(
        &self,
        instance: &str,
        processor: &str,
        parameter: &str,
        seq_num: u32,
        options: &PatchAlarmOptions,
    ) -> Result<AlarmNotice, Error> {
        let url = format!(
            "{}/api/processors/{}/{}/parameters{}/alarms/{}",
            self.base_url, instance, processor, parameter, seq_num
        );
        debug!("Patching alarm at {}", url);
        let response = self
            .http
            .patch(&url)
            .json(options)
            .send()
            .await
            .map_err(|e| Error::PatchFailed(RequestError::Transport(e)))?;
        let response = check_status(response).await.map_err(Error::PatchFailed)?;
        response
            .json()
            .await
            .map_err(|e| Error::PatchFailed(RequestError::Transport(e)))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(RequestError::Status(status.as_u16(), body))
    }
}

#[test]
fn test_list_response_parsing() {
    let listing: ListAlarmsResponse = serde_json::from_str(
        r#"{
            "alarm": [
                {
                    "seqNum": 3,
                    "triggerValue": {
                        "id": {"name": "/P1"},
                        "generationTime": "2022-05-12T11:15:00Z",
                        "monitoringResult": "CRITICAL"
                    }
                }
            ]
        }"#,
    )
    .unwrap();
    assert_eq!(listing.alarm.len(), 1);
    assert_eq!(listing.alarm[0].seq_num, 3);

    // no alarms leaves the collection out entirely
    let listing: ListAlarmsResponse = serde_json::from_str("{}").unwrap();
    assert!(listing.alarm.is_empty());
}

#[test]
fn test_patch_options_body() {
    let options = PatchAlarmOptions {
        state: Some("acknowledged".to_string()),
        comment: None,
    };
    assert_eq!(
        serde_json::to_string(&options).unwrap(),
        r#"{"state":"acknowledged"}"#
    );
    let options = PatchAlarmOptions::default();
    assert_eq!(serde_json::to_string(&options).unwrap(), "{}");
}
