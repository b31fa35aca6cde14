use crate::archive::ArchiveClient;
use crate::channel::connection::{Connection, EventMessage};
use crate::registry::{fetch_and_reconcile, AlarmRegistry};
use crate::util::error::DynResult;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Where the subscriber fetches the open-alarm snapshot after each
/// successful subscribe.
pub struct SnapshotSource {
    pub client: Arc<ArchiveClient>,
    pub instance: String,
}

/// Long-lived consumer of the alarm push channel. Connects, subscribes and
/// feeds every alarm notice to the registry; on a lost connection it waits
/// `reconnect_interval` and subscribes again. With a snapshot source set,
/// each new subscription reconciles the registry against the archive, so
/// the active set survives reconnects and alarms raised before the first
/// subscribe are picked up.
pub struct AlarmSubscriber {
    pub address: String,
    pub registry: Arc<Mutex<AlarmRegistry>>,
    pub snapshot: Option<SnapshotSource>,
    pub reconnect_interval: Duration,
}

impl AlarmSubscriber {
    /// Runs until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.serve_connection() => {
                    match res {
                        Err(e) => warn!("Alarm channel lost: {}", e),
                        Ok(()) => warn!("Alarm channel closed by server"),
                    }
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.reconnect_interval) => {}
            }
            info!("Reconnecting to alarm channel at {}", self.address);
        }
    }

    async fn serve_connection(&self) -> DynResult<()> {
        let mut conn = Connection::connect(&self.address).await?;
        subscribe_alarms(&mut conn).await?;
        info!("Subscribed to alarm channel at {}", self.address);
        if let Some(source) = &self.snapshot {
            let res = fetch_and_reconcile(&self.registry, || async {
                source
                    .client
                    .list_alarms(&source.instance, None, None)
                    .await
                    .map_err(|e| e.into())
            })
            .await;
            match res {
                Ok(fresh) => {
                    if !fresh.is_empty() {
                        info!("Recovered {} open alarms from the archive", fresh.len());
                    }
                }
                Err(e) => warn!("Failed to reconcile alarms against the archive: {}", e),
            }
        }
        while let Some(msg) = conn.get_message().await {
            match msg {
                EventMessage::AlarmData(notice) => {
                    let res = self.registry.lock().unwrap().ingest(notice);
                    // a bad notice must not take the subscription down
                    if let Err(e) = res {
                        error!("Failed to process alarm event: {}", e);
                    }
                }
                other => debug!("Ignoring channel frame: {:?}", other),
            }
        }
        Ok(())
    }
}

async fn subscribe_alarms(conn: &mut Connection) -> DynResult<()> {
    debug!("Subscribing alarms");
    let request_id = conn.subscribe_alarms().await?;
    'next_event: loop {
        match timeout(Duration::from_secs(5), conn.get_message()).await {
            Err(_) => {
                return Err("No reply for alarm subscription".to_string().into());
            }
            Ok(res) => match res {
                Some(msg) => match msg {
                    EventMessage::Reply(reply) => {
                        if reply.request_id == request_id {
                            break 'next_event;
                        }
                    }
                    EventMessage::Exception(error) => return Err(error.into()),
                    _ => {}
                },
                None => {
                    error!("Message EOF");
                    return Err("Message EOF".to_string().into());
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
use crate::channel::connection::Request;
#[cfg(test)]
use test_log::test;

#[cfg(test)]
#[test(tokio::test)]
async fn test_subscribe_and_ingest() {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (stream, _addr) = listener.accept().await.unwrap();
        let (r, mut w) = stream.into_split();
        let mut lines = BufReader::new(r).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let req: Request = serde_json::from_str(&line).unwrap();
        assert_eq!(req.channel, "alarms");
        assert_eq!(req.operation, "subscribe");
        let reply = format!(
            "{{\"event\":\"REPLY\",\"data\":{{\"requestId\":\"{}\"}}}}\n",
            req.request_id
        );
        w.write_all(reply.as_bytes()).await.unwrap();
        let alarm = concat!(
            r#"{"event":"ALARM_DATA","data":{"seqNum":1,"type":"TRIGGERED","#,
            r#""triggerValue":{"id":{"name":"/P1"},"#,
            r#""generationTime":"2022-03-01T10:00:00Z","monitoringResult":"CRITICAL"}}}"#,
            "\n"
        );
        w.write_all(alarm.as_bytes()).await.unwrap();
        sleep(Duration::from_millis(500)).await;
    });

    let registry = Arc::new(Mutex::new(AlarmRegistry::new()));
    let shutdown = CancellationToken::new();
    let subscriber = AlarmSubscriber {
        address,
        registry: registry.clone(),
        snapshot: None,
        reconnect_interval: Duration::from_secs(1),
    };
    let task = tokio::spawn(subscriber.run(shutdown.clone()));

    let mut tracked = 0;
    for _ in 0..100 {
        tracked = registry.lock().unwrap().len();
        if tracked == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tracked, 1);
    assert_eq!(
        registry.lock().unwrap().active_alarms()[0].key.parameter,
        "/P1"
    );

    shutdown.cancel();
    task.await.unwrap();
    server.await.unwrap();
}
