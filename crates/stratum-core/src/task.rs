use crate::events::{Event, EventSink, InteractionKind, InteractionReply, InteractionRequest, NullSink};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use stratum_store::PullProgress;
use tracing::warn;

/// Task states observable by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Queued,
    Processing,
    PartCompleted,
    Succeed,
    Failed,
    Canceled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Succeed | State::Failed | State::Canceled)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Queued => "queued",
            State::Processing => "processing",
            State::PartCompleted => "part-completed",
            State::Succeed => "succeed",
            State::Failed => "failed",
            State::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Fine-grained stage of a task's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubState {
    PreAction,
    InstallApplication,
    InstallBase,
    InstallRuntime,
    Uninstall,
    PostAction,
    PackageManagerDone,
    AllDone,
}

impl SubState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubState::AllDone | SubState::PackageManagerDone)
    }
}

impl std::fmt::Display for SubState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubState::PreAction => "pre-action",
            SubState::InstallApplication => "install-application",
            SubState::InstallBase => "install-base",
            SubState::InstallRuntime => "install-runtime",
            SubState::Uninstall => "uninstall",
            SubState::PostAction => "post-action",
            SubState::PackageManagerDone => "package-manager-done",
            SubState::AllDone => "all-done",
        };
        f.write_str(s)
    }
}

struct TaskState {
    state: State,
    sub_state: SubState,
    percentage: u32,
    message: String,
}

struct TaskInner {
    object_path: String,
    ref_specs: Vec<String>,
    state: Mutex<TaskState>,
    reply_tx: Mutex<Option<crossbeam_channel::Sender<InteractionReply>>>,
    events: Arc<dyn EventSink>,
}

/// A named, observable task record.
///
/// State transitions are serialized by the task's own execution: only the
/// worker running the plan mutates state, observers subscribe to events.
/// Once the sub-state is terminal every further `update_*` call is a no-op,
/// which lets deeply nested stages poll [`is_done`](Self::is_done) and abort
/// cleanly after cancellation or a fatal error recorded by a child step.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn new(
        object_path: String,
        ref_specs: Vec<String>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                object_path,
                ref_specs,
                state: Mutex::new(TaskState {
                    state: State::Queued,
                    sub_state: SubState::PreAction,
                    percentage: 0,
                    message: String::new(),
                }),
                reply_tx: Mutex::new(None),
                events,
            }),
        }
    }

    /// An unobservable task for rollback re-pulls.
    pub fn temporary() -> Self {
        Self::new("/temporary".to_owned(), Vec::new(), Arc::new(NullSink))
    }

    pub fn object_path(&self) -> &str {
        &self.inner.object_path
    }

    pub fn ref_specs(&self) -> &[String] {
        &self.inner.ref_specs
    }

    pub fn state(&self) -> State {
        self.inner.state.lock().unwrap().state
    }

    pub fn sub_state(&self) -> SubState {
        self.inner.state.lock().unwrap().sub_state
    }

    pub fn message(&self) -> String {
        self.inner.state.lock().unwrap().message.clone()
    }

    /// True once the sub-state is terminal; checked at every stage boundary.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().unwrap().sub_state.is_terminal()
    }

    fn emit_changed(&self, state: &TaskState) {
        self.inner.events.emit(Event::TaskChanged {
            object_path: self.inner.object_path.clone(),
            state: state.state,
            sub_state: state.sub_state,
            percentage: state.percentage,
            message: state.message.clone(),
        });
    }

    /// Transition the state, emitting an event. Terminal states also close
    /// the sub-state. No-op once the task is done.
    pub fn update_state(&self, state: State, message: impl Into<String>) {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.sub_state.is_terminal() {
            return;
        }
        guard.state = state;
        guard.message = message.into();
        if state.is_terminal() {
            guard.sub_state = SubState::AllDone;
            guard.percentage = 100;
        }
        self.emit_changed(&guard);
    }

    /// Transition the sub-state, emitting an event. No-op once the task is
    /// done.
    pub fn update_sub_state(&self, sub_state: SubState, message: impl Into<String>) {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.sub_state.is_terminal() {
            return;
        }
        guard.sub_state = sub_state;
        guard.message = message.into();
        self.emit_changed(&guard);
    }

    /// Set the state without emitting. Reserved for summarizing a task whose
    /// work is logically complete but which must convey a secondary message.
    pub fn set_state(&self, state: State) {
        self.inner.state.lock().unwrap().state = state;
    }

    pub fn set_sub_state(&self, sub_state: SubState) {
        self.inner.state.lock().unwrap().sub_state = sub_state;
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.inner.state.lock().unwrap().message = message.into();
    }

    pub fn report_error(&self, error: &Error) {
        self.update_state(State::Failed, error.to_string());
    }

    /// Emit a `RequestInteraction` event and park until the reply arrives
    /// through [`deliver_reply`](Self::deliver_reply). There is no timeout;
    /// cancellation is the sole way to unblock a never-answered prompt.
    pub fn request_interaction(
        &self,
        kind: InteractionKind,
        request: InteractionRequest,
    ) -> InteractionReply {
        let (tx, rx) = crossbeam_channel::bounded(1);
        *self.inner.reply_tx.lock().unwrap() = Some(tx);

        self.inner.events.emit(Event::RequestInteraction {
            object_path: self.inner.object_path.clone(),
            kind,
            request,
        });

        let reply = rx.recv().unwrap_or(InteractionReply {
            action: "no".to_owned(),
        });
        *self.inner.reply_tx.lock().unwrap() = None;
        reply
    }

    /// Deliver a client reply into the parked plan. Fails when no interaction
    /// is pending.
    pub fn deliver_reply(&self, reply: InteractionReply) -> Result<(), Error> {
        let tx = self.inner.reply_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    warn!("interaction reply for {} arrived too late", self.object_path());
                }
                Ok(())
            }
            None => Err(Error::InvalidArgument(format!(
                "task {} has no pending interaction",
                self.object_path()
            ))),
        }
    }
}

impl PullProgress for Task {
    fn progress(&self, percentage: u32, message: &str) {
        let mut guard = self.inner.state.lock().unwrap();
        if guard.sub_state.is_terminal() {
            return;
        }
        guard.percentage = percentage;
        guard.message = message.to_owned();
        self.emit_changed(&guard);
    }

    fn is_canceled(&self) -> bool {
        self.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use std::time::Duration;

    fn task_with_sink() -> (Task, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let task = Task::new("/org/test/Task/1".to_owned(), vec!["spec".to_owned()], sink.clone());
        (task, sink)
    }

    #[test]
    fn update_state_emits_events() {
        let (task, sink) = task_with_sink();
        task.update_state(State::Processing, "working");
        assert_eq!(task.state(), State::Processing);
        assert_eq!(task.message(), "working");
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[test]
    fn terminal_state_closes_sub_state() {
        let (task, _sink) = task_with_sink();
        task.update_state(State::Succeed, "done");
        assert!(task.is_done());
        assert_eq!(task.sub_state(), SubState::AllDone);
    }

    #[test]
    fn updates_after_terminal_are_noops() {
        let (task, sink) = task_with_sink();
        task.update_state(State::Failed, "broken");
        let events_before = sink.snapshot().len();

        task.update_state(State::Succeed, "nope");
        task.update_sub_state(SubState::PostAction, "nope");
        assert_eq!(task.state(), State::Failed);
        assert_eq!(sink.snapshot().len(), events_before);
    }

    #[test]
    fn silent_setters_do_not_emit() {
        let (task, sink) = task_with_sink();
        task.set_state(State::PartCompleted);
        task.set_sub_state(SubState::PackageManagerDone);
        task.set_message("restart the application");
        assert!(sink.snapshot().is_empty());
        assert_eq!(task.state(), State::PartCompleted);
        assert!(task.is_done());
    }

    #[test]
    fn interaction_roundtrip() {
        let (task, sink) = task_with_sink();
        let waiter = task.clone();
        let handle = std::thread::spawn(move || {
            waiter.request_interaction(
                InteractionKind::Upgrade,
                InteractionRequest {
                    local_ref: None,
                    remote_ref: "stable:a/1.0.0/x86_64".to_owned(),
                },
            )
        });

        sink.wait_for(Duration::from_secs(1), |e| {
            matches!(e, Event::RequestInteraction { .. })
        })
        .expect("interaction event");

        // The prompt is pending until a reply arrives.
        task.deliver_reply(InteractionReply {
            action: "yes".to_owned(),
        })
        .unwrap();
        let reply = handle.join().unwrap();
        assert_eq!(reply.action, "yes");

        // No pending interaction anymore.
        assert!(task
            .deliver_reply(InteractionReply {
                action: "yes".to_owned()
            })
            .is_err());
    }

    #[test]
    fn pull_progress_updates_and_cancels() {
        let (task, sink) = task_with_sink();
        PullProgress::progress(&task, 42, "pulling");
        assert!(sink
            .snapshot()
            .iter()
            .any(|e| matches!(e, Event::TaskChanged { percentage: 42, .. })));
        assert!(!PullProgress::is_canceled(&task));

        task.update_state(State::Canceled, "canceled");
        assert!(PullProgress::is_canceled(&task));
    }
}
