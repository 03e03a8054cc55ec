use crate::task::{State, SubState};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use stratum_schema::PackageInfo;

/// What the daemon wants from the user before an upgrade proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Install,
    Upgrade,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Install => "install",
            InteractionKind::Upgrade => "upgrade",
        }
    }
}

/// Payload of a `RequestInteraction` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<String>,
    pub remote_ref: String,
}

/// Client answer forwarded into a parked task. Any `action` other than
/// `"yes"` cancels the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionReply {
    pub action: String,
}

/// Everything observable the daemon emits. The bus layer forwards these as
/// D-Bus signals; tests collect them directly.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    TaskAdded {
        object_path: String,
    },
    TaskChanged {
        object_path: String,
        state: State,
        sub_state: SubState,
        percentage: u32,
        message: String,
    },
    RequestInteraction {
        object_path: String,
        kind: InteractionKind,
        request: InteractionRequest,
    },
    SearchFinished {
        job_id: String,
        packages: Vec<PackageInfo>,
        code: i64,
        message: String,
    },
    PruneFinished {
        job_id: String,
        removed: Vec<PackageInfo>,
        code: i64,
        message: String,
    },
    GenerateCacheFinished {
        job_id: String,
        ok: bool,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that drops everything. Used by temporary rollback tasks.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Test sink that records every event and supports polling for one.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until an event matching `pred` shows up or the timeout elapses.
    pub fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&Event) -> bool,
    ) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.events.lock().unwrap().iter().find(|e| pred(e)) {
                return Some(event.clone());
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_in_order(){
        let sink = CollectingSink::new();
        sink.emit(Event::TaskAdded {
            object_path: "/t/1".to_owned(),
        });
        sink.emit(Event::GenerateCacheFinished {
            job_id: "j".to_owned(),
            ok: true,
        });
        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::TaskAdded { object_path } if object_path == "/t/1"));
    }

    #[test]
    fn wait_for_sees_existing_event() {
        let sink = CollectingSink::new();
        sink.emit(Event::TaskAdded {
            object_path: "/t/9".to_owned(),
        });
        let found = sink.wait_for(Duration::from_millis(50), |e| {
            matches!(e, Event::TaskAdded { .. })
        });
        assert!(found.is_some());
    }

    #[test]
    fn wait_for_times_out() {
        let sink = CollectingSink::new();
        let found = sink.wait_for(Duration::from_millis(30), |e| {
            matches!(e, Event::GenerateCacheFinished { .. })
        });
        assert!(found.is_none());
    }

    #[test]
    fn interaction_reply_deserializes() {
        let reply: InteractionReply = serde_json::from_str(r#"{"action":"yes"}"#).unwrap();
        assert_eq!(reply.action, "yes");
    }
}
