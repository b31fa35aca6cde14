use crate::alarm_event::{AlarmEvent, AlarmKey, EventError};
use crate::channel::connection::{AlarmNotice, AlarmTransition};
use crate::util::error::DynResult;
use log::{debug, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

/// Callback slot for alarm listeners. Held weakly by the registry, so a
/// listener goes away when its owner drops the Arc.
pub type ListenerFn = Mutex<dyn FnMut(&AlarmEvent) -> DynResult<()> + Send>;

#[derive(Debug)]
pub enum Error {
    MalformedEvent(EventError),
    FetchFailed(Box<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MalformedEvent(e) => Some(e),
            Error::FetchFailed(e) => Some(e.as_ref()),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::MalformedEvent(e) => write!(f, "Malformed alarm event: {}", e),
            Error::FetchFailed(e) => write!(f, "Alarm snapshot fetch failed: {}", e),
        }
    }
}

impl From<EventError> for Error {
    fn from(e: EventError) -> Error {
        Error::MalformedEvent(e)
    }
}

/// Client-local view of the currently active alarms, ordered ascending by
/// key and holding at most one entry per key. Fed by the push channel
/// through `ingest` and by archive snapshots through `reconcile`; one
/// registry is constructed per session and shared by reference.
pub struct AlarmRegistry {
    active_alarms: Vec<AlarmEvent>,
    listeners: Vec<Weak<ListenerFn>>,
}

impl AlarmRegistry {
    pub fn new() -> AlarmRegistry {
        AlarmRegistry {
            active_alarms: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Registers a listener that is called once for every ingested event,
    /// after the set has been updated, in ingest order.
    pub fn add_listener(&mut self, listener: &Arc<ListenerFn>) {
        self.listeners.push(Arc::downgrade(listener));
    }

    /// The active alarms in ascending key order.
    pub fn active_alarms(&self) -> &[AlarmEvent] {
        &self.active_alarms
    }

    pub fn is_empty(&self) -> bool {
        self.active_alarms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active_alarms.len()
    }

    fn find(&self, key: &AlarmKey) -> Result<usize, usize> {
        self.active_alarms.binary_search_by(|e| e.key.cmp(key))
    }

    /// Applies one push-channel notice to the active set and notifies the
    /// listeners. A cleared key that is not tracked is a no-op, not an
    /// error. A malformed notice fails before the set is touched.
    pub fn ingest(&mut self, notice: AlarmNotice) -> Result<AlarmEvent, Error> {
        let event = AlarmEvent::try_from(notice)?;
        if event.transition == AlarmTransition::Cleared {
            if let Ok(index) = self.find(&event.key) {
                self.active_alarms.remove(index);
            }
        } else {
            match self.find(&event.key) {
                Ok(index) => self.active_alarms[index] = event.clone(),
                Err(index) => self.active_alarms.insert(index, event.clone()),
            }
        }
        self.notify(&event);
        Ok(event)
    }

    /// Merges a point-in-time snapshot of open alarms into the active set.
    /// Entries whose key is already tracked are discarded; the rest are
    /// inserted and returned as newly discovered. Listeners are not called
    /// for snapshot entries, the returned list takes that role. The whole
    /// snapshot is enriched before the first insertion, so a malformed
    /// entry rejects the call with the set unchanged.
    pub fn reconcile(&mut self, snapshot: Vec<AlarmNotice>) -> Result<Vec<AlarmEvent>, Error> {
        let mut incoming = Vec::with_capacity(snapshot.len());
        for notice in snapshot {
            incoming.push(AlarmEvent::try_from(notice)?);
        }
        let mut fresh = Vec::new();
        for event in incoming {
            match self.find(&event.key) {
                Ok(_) => {
                    debug!("Snapshot alarm {} already tracked", event.key);
                }
                Err(index) => {
                    self.active_alarms.insert(index, event.clone());
                    fresh.push(event);
                }
            }
        }
        Ok(fresh)
    }

    fn notify(&mut self, event: &AlarmEvent) {
        self.listeners.retain(|slot| {
            let listener = match Weak::upgrade(slot) {
                Some(listener) => listener,
                None => {
                    debug!("Dropped alarm listener");
                    return false;
                }
            };
            let mut call = listener.lock().unwrap();
            if let Err(e) = call(event) {
                warn!("Alarm listener failed: {}", e);
            }
            true
        });
    }
}

/// Fetches a snapshot of open alarms and merges it into the registry.
///
/// The fetch runs with no lock held; deduplication happens against the set
/// as it is when the fetch completes, so alarms that arrived over the push
/// channel in the meantime are not reported twice. A failed fetch leaves
/// the set untouched.
pub async fn fetch_and_reconcile<F, Fut>(
    registry: &Mutex<AlarmRegistry>,
    fetch: F,
) -> Result<Vec<AlarmEvent>, Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = DynResult<Vec<AlarmNotice>>>,
{
    let snapshot = fetch().await.map_err(Error::FetchFailed)?;
    let mut registry = registry.lock().unwrap();
    registry.reconcile(snapshot)
}

#[cfg(test)]
use crate::alarm_event::test_notice;
#[cfg(test)]
use crate::severity::Severity;
#[cfg(test)]
use test_log::test;

#[test]
fn test_triggered_inserts() {
    let mut registry = AlarmRegistry::new();
    let event = registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    assert_eq!(event.key.to_string(), "T1/P11");
    assert_eq!(event.trigger_level, Severity::Warning);
    assert_eq!(event.most_severe_level, Severity::Warning);
    assert_eq!(event.current_level, Severity::Warning);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.active_alarms()[0].key, event.key);
}

#[test]
fn test_update_replaces_in_place() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P1", 1, "CRITICAL", AlarmTransition::Updated))
        .unwrap();
    assert_eq!(registry.len(), 1);
    let tracked = &registry.active_alarms()[0];
    assert_eq!(tracked.current_level, Severity::Critical);
    assert_eq!(tracked.transition, AlarmTransition::Updated);
}

// Cleared alarms must actually leave the set
#[test]
fn test_cleared_removes_entry() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Cleared))
        .unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_cleared_unknown_key_is_noop() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T9", "/P9", 3, "WARNING", AlarmTransition::Cleared))
        .unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_active_alarms_sorted_by_key() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T2", "/P1", 1, "WATCH", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P2", 1, "WATCH", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P1", 2, "WATCH", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WATCH", AlarmTransition::Triggered))
        .unwrap();
    let keys: Vec<String> = registry
        .active_alarms()
        .iter()
        .map(|e| e.key.to_string())
        .collect();
    assert_eq!(keys, ["T1/P11", "T1/P12", "T1/P21", "T2/P11"]);
}

#[test]
fn test_same_item_distinct_seq_nums() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T1", "/P1", 2, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_malformed_event_leaves_set_unchanged() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    let mut notice = test_notice("T2", "/P2", 1, "WARNING", AlarmTransition::Triggered);
    notice.trigger_value = None;
    match registry.ingest(notice) {
        Err(Error::MalformedEvent(EventError::MissingTriggerValue)) => {}
        other => panic!("Unexpected result: {:?}", other.map(|e| e.key)),
    }
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_listener_fanout() {
    let mut registry = AlarmRegistry::new();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen_by_listener = seen.clone();
    let failing: Arc<ListenerFn> =
        Arc::new(Mutex::new(|_event: &AlarmEvent| Err("broken listener".into())));
    let recording: Arc<ListenerFn> = Arc::new(Mutex::new(move |event: &AlarmEvent| {
        seen_by_listener
            .lock()
            .unwrap()
            .push(event.key.to_string());
        Ok(())
    }));
    registry.add_listener(&failing);
    registry.add_listener(&recording);
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    registry
        .ingest(test_notice("T2", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    // the failing listener must not block the recording one
    assert_eq!(*seen.lock().unwrap(), ["T1/P11", "T2/P11"]);

    drop(recording);
    registry
        .ingest(test_notice("T3", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    // dropped listener is pruned, no further recording
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn test_listener_notified_on_cleared_noop() {
    let mut registry = AlarmRegistry::new();
    let count = Arc::new(Mutex::new(0u32));
    let count_by_listener = count.clone();
    let counting: Arc<ListenerFn> = Arc::new(Mutex::new(move |_event: &AlarmEvent| {
        *count_by_listener.lock().unwrap() += 1;
        Ok(())
    }));
    registry.add_listener(&counting);
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Cleared))
        .unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn test_reconcile_skips_tracked_inserts_fresh() {
    let mut registry = AlarmRegistry::new();
    registry
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    let snapshot = vec![
        test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered),
        test_notice("T0", "/P5", 2, "CRITICAL", AlarmTransition::Triggered),
    ];
    let fresh = registry.reconcile(snapshot).unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].key.to_string(), "T0/P52");
    assert_eq!(fresh[0].current_level, Severity::Critical);
    let keys: Vec<String> = registry
        .active_alarms()
        .iter()
        .map(|e| e.key.to_string())
        .collect();
    assert_eq!(keys, ["T0/P52", "T1/P11"]);
}

#[test]
fn test_reconcile_malformed_rejects_snapshot() {
    let mut registry = AlarmRegistry::new();
    let mut bad = test_notice("T2", "/P2", 1, "WARNING", AlarmTransition::Triggered);
    bad.trigger_value = None;
    let snapshot = vec![
        test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered),
        bad,
    ];
    assert!(registry.reconcile(snapshot).is_err());
    assert!(registry.is_empty());
}

#[cfg(test)]
#[test(tokio::test)]
async fn test_fetch_and_reconcile() {
    let registry = Mutex::new(AlarmRegistry::new());
    registry
        .lock()
        .unwrap()
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    let fresh = fetch_and_reconcile(&registry, || async {
        Ok(vec![
            test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered),
            test_notice("T2", "/P2", 1, "SEVERE", AlarmTransition::Triggered),
        ])
    })
    .await
    .unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].key.to_string(), "T2/P21");
    assert_eq!(registry.lock().unwrap().len(), 2);
}

#[cfg(test)]
#[test(tokio::test)]
async fn test_fetch_and_reconcile_failure_keeps_set() {
    let registry = Mutex::new(AlarmRegistry::new());
    registry
        .lock()
        .unwrap()
        .ingest(test_notice("T1", "/P1", 1, "WARNING", AlarmTransition::Triggered))
        .unwrap();
    let res = fetch_and_reconcile(&registry, || async {
        Err("connection refused".to_string().into())
    })
    .await;
    match res {
        Err(Error::FetchFailed(_)) => {}
        other => panic!("Unexpected result: {:?}", other.map(|v| v.len())),
    }
    assert_eq!(registry.lock().unwrap().len(), 1);
}
