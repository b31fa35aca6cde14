use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::{tcp::OwnedWriteHalf, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc::{self, Receiver, Sender};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::process;

pub type Result<T> =
    std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Line-delimited JSON link to the server's push channel endpoint. One frame
/// per line in both directions.
pub struct Connection {
    stream: OwnedWriteHalf,
    request_prefix: String,
    request_count: u32,
    events: Receiver<EventMessage>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParameterId {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValue {
    pub id: ParameterId,
    pub generation_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eng_value: Option<serde_json::Value>,
}

/// Lifecycle transition reported with an alarm notice. Only `Cleared` ends
/// an alarm; every other kind carries the latest values for its key.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmTransition {
    Triggered,
    Updated,
    SeverityIncreased,
    Acknowledged,
    Cleared,
}

impl AlarmTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmTransition::Triggered => "TRIGGERED",
            AlarmTransition::Updated => "UPDATED",
            AlarmTransition::SeverityIncreased => "SEVERITY_INCREASED",
            AlarmTransition::Acknowledged => "ACKNOWLEDGED",
            AlarmTransition::Cleared => "CLEARED",
        }
    }
}

// Archive snapshot entries carry no transition kind
impl Default for AlarmTransition {
    fn default() -> AlarmTransition {
        AlarmTransition::Triggered
    }
}

/// One alarm as transmitted, on the push channel and in archive listings.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlarmNotice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_value: Option<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_severe_value: Option<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<ParameterValue>,
    pub seq_num: u32,
    #[serde(rename = "type", default)]
    pub transition: AlarmTransition,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub channel: String,
    pub operation: String,
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReplyInfo {
    pub request_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub exception_type: String,
    pub msg: String,
}

impl std::error::Error for ExceptionInfo {}

impl std::fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.msg, self.exception_type)
    }
}

/// Server-to-client frame, tagged by event name.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", content = "data")]
pub enum EventMessage {
    #[serde(rename = "REPLY")]
    Reply(ReplyInfo),
    #[serde(rename = "EXCEPTION")]
    Exception(ExceptionInfo),
    #[serde(rename = "ALARM_DATA")]
    AlarmData(AlarmNotice),
}

async fn read_connection<R>(r: R, send: Sender<EventMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut r = BufReader::new(r);
    loop {
        let mut line = String::new();
        match r.read_line(&mut line).await {
            Err(e) => {
                error!("Failed to read line from channel: {}", e);
                break;
            }
            Ok(l) => {
                if l == 0 {
                    break;
                }
                debug!("Got line: {}", line);
                match serde_json::from_str(&line) {
                    Err(e) => {
                        error!("Failed to parse channel frame: {}", e);
                    }
                    Ok(msg) => {
                        if send.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl Connection {
    pub async fn connect<A>(addr: A) -> std::io::Result<Connection>
    where
        A: ToSocketAddrs,
    {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> Connection {
        let (r, w) = stream.into_split();
        let (msg_in, msg_out) = mpsc::channel(10);
        tokio::spawn(read_connection(r, msg_in));
        Connection {
            stream: w,
            request_prefix: format!("req_{}_", process::id()),
            request_count: 0,
            events: msg_out,
        }
    }

    fn next_request_id(&mut self) -> String {
        self.request_count = self.request_count.wrapping_add(1);
        self.request_prefix.clone() + &self.request_count.to_string()
    }

    /// Next frame from the server. None means the connection is gone.
    pub async fn get_message(&mut self) -> Option<EventMessage> {
        self.events.recv().await
    }

    async fn send_request(&mut self, req: &Request) -> Result<()> {
        let mut req_bytes = serde_json::to_vec(req)?;
        req_bytes.push(b'\n');
        debug!("Request: {}", String::from_utf8_lossy(&req_bytes));
        self.stream.write_all(&req_bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Asks the server to start pushing alarm transitions on this
    /// connection. Returns the request id that the confirming reply will
    /// echo. Must be re-issued after every reconnect.
    pub async fn subscribe_alarms(&mut self) -> Result<String> {
        let req = Request {
            channel: "alarms".to_string(),
            operation: "subscribe".to_string(),
            request_id: self.next_request_id(),
        };
        self.send_request(&req).await?;
        Ok(req.request_id)
    }
}

#[test]
fn serialize_test() {
    let req = Request {
        channel: "alarms".to_string(),
        operation: "subscribe".to_string(),
        request_id: "req_1234_1".to_string(),
    };
    assert_eq!(
        serde_json::to_string(&req).unwrap(),
        r#"{"channel":"alarms","operation":"subscribe","requestId":"req_1234_1"}"#
    );
}

#[test]
fn deserialize_alarm_data_test() {
    let json = r#"{
        "event": "ALARM_DATA",
        "data": {
            "seqNum": 4,
            "type": "UPDATED",
            "triggerValue": {
                "id": {"name": "/YSS/SIMULATOR/BatteryVoltage1"},
                "generationTime": "2022-03-23T11:23:11Z",
                "monitoringResult": "WARNING_LOW"
            },
            "currentValue": {
                "id": {"name": "/YSS/SIMULATOR/BatteryVoltage1"},
                "generationTime": "2022-03-23T11:25:40Z",
                "monitoringResult": "CRITICAL_LOW",
                "engValue": {"type": "FLOAT", "floatValue": 6.1}
            }
        }
    }"#;
    let msg: EventMessage = serde_json::from_str(json).unwrap();
    match msg {
        EventMessage::AlarmData(notice) => {
            assert_eq!(notice.seq_num, 4);
            assert_eq!(notice.transition, AlarmTransition::Updated);
            let trigger = notice.trigger_value.unwrap();
            assert_eq!(trigger.id.name, "/YSS/SIMULATOR/BatteryVoltage1");
            assert_eq!(trigger.monitoring_result.as_deref(), Some("WARNING_LOW"));
            assert!(notice.most_severe_value.is_none());
            assert!(notice.current_value.unwrap().eng_value.is_some());
        }
        other => panic!("Unexpected frame: {:?}", other),
    }
}

#[test]
fn deserialize_reply_test() {
    let msg: EventMessage =
        serde_json::from_str(r#"{"event":"REPLY","data":{"requestId":"req_9_1"}}"#).unwrap();
    match msg {
        EventMessage::Reply(reply) => assert_eq!(reply.request_id, "req_9_1"),
        other => panic!("Unexpected frame: {:?}", other),
    }
}
