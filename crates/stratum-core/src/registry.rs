use crate::events::{Event, EventSink, InteractionReply};
use crate::task::Task;
use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send>;

/// A serial queue: one worker thread draining jobs in submission order. The
/// worker exits when the queue is dropped.
pub struct JobQueue {
    tx: crossbeam_channel::Sender<Job>,
}

impl JobQueue {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let thread_name = format!("stratum-{name}");
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
                debug!("{thread_name} queue drained, worker exiting");
            })
            .expect("failed to spawn queue worker");
        Self { tx }
    }

    pub fn run(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            warn!("job submitted to a stopped queue");
        }
    }
}

/// Owner of all task records and the serial mutation queue.
///
/// A mutation task may not begin until any prior mutation task has reached a
/// terminal state; the single worker enforces that. Tasks are observable
/// through the registry until they are reaped (terminal tasks are dropped
/// when the next task is added).
pub struct TaskRegistry {
    events: Arc<dyn EventSink>,
    tasks: Mutex<Vec<Task>>,
    counter: AtomicU64,
    queue: JobQueue,
}

const TASK_PATH_PREFIX: &str = "/org/stratum/PackageManager1/Task";

impl TaskRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            events,
            tasks: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
            queue: JobQueue::new("mutation"),
        }
    }

    /// Register a task and enqueue its plan on the mutation queue. Fails when
    /// a live task already covers one of the ref-specs.
    pub fn add_task(
        &self,
        ref_specs: Vec<String>,
        plan: impl FnOnce(&Task) + Send + 'static,
    ) -> Result<Task, Error> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|task| !task.state().is_terminal());

        for existing in tasks.iter() {
            if existing
                .ref_specs()
                .iter()
                .any(|spec| ref_specs.contains(spec))
            {
                return Err(Error::InvalidArgument(format!(
                    "a task for {} already exists",
                    existing.ref_specs().join(", ")
                )));
            }
        }

        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let object_path = format!("{TASK_PATH_PREFIX}/{index}");
        let task = Task::new(object_path.clone(), ref_specs, self.events.clone());
        tasks.push(task.clone());
        drop(tasks);

        self.events.emit(Event::TaskAdded { object_path });

        let worker_task = task.clone();
        self.queue.run(move || {
            plan(&worker_task);
            if !worker_task.is_done() {
                warn!(
                    "plan for {} ended without a terminal state",
                    worker_task.object_path()
                );
            }
        });

        Ok(task)
    }

    /// Run a non-task job on the mutation queue, serialized with task plans.
    /// Used by the deferred-uninstall tick.
    pub fn run_job(&self, job: impl FnOnce() + Send + 'static) {
        self.queue.run(job);
    }

    pub fn find(&self, object_path: &str) -> Option<Task> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|task| task.object_path() == object_path)
            .cloned()
    }

    /// Forward a client interaction reply into the parked task.
    pub fn reply_interaction(&self, object_path: &str, reply: InteractionReply) -> Result<(), Error> {
        let task = self.find(object_path).ok_or_else(|| {
            Error::InvalidArgument(format!("no task at {object_path}"))
        })?;
        task.deliver_reply(reply)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}
