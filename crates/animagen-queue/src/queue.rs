//! Bounded-concurrency task queue for one resource class.
//!
//! All scheduling state (pending heap, running set, attempt bookkeeping) is
//! owned by a single dispatch loop; callers talk to it over a command
//! channel and observe it through shared snapshots. Results are broadcast on
//! per-task watch channels so any number of waiters are released together.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use animagen_models::{ResourceClass, TaskError, TaskId, TaskPriority, TaskState};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::retry::Decision;
use crate::task::{SubmitOptions, TaskOperation, TaskSnapshot};

type Outcome<O> = Result<O, TaskError>;

struct TaskEntry<O> {
    snapshot: TaskSnapshot,
    done: watch::Sender<Option<Outcome<O>>>,
}

type Table<O> = Mutex<HashMap<TaskId, TaskEntry<O>>>;

enum Command<O> {
    Submit {
        id: TaskId,
        op: TaskOperation<O>,
        priority: TaskPriority,
        max_attempts: u32,
        timeout: Duration,
    },
    Cancel {
        id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Per-class pending/running/terminal counts for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Handle to one resource class queue. Cheap to clone; all clones drive the
/// same dispatch loop.
pub struct TaskQueue<O> {
    class: ResourceClass,
    cmd_tx: mpsc::UnboundedSender<Command<O>>,
    table: Arc<Table<O>>,
    default_max_attempts: u32,
    default_timeout: Duration,
}

impl<O> Clone for TaskQueue<O> {
    fn clone(&self) -> Self {
        Self {
            class: self.class,
            cmd_tx: self.cmd_tx.clone(),
            table: Arc::clone(&self.table),
            default_max_attempts: self.default_max_attempts,
            default_timeout: self.default_timeout,
        }
    }
}

impl<O> TaskQueue<O>
where
    O: Clone + Send + Sync + 'static,
{
    /// Create the queue and start its dispatch loop.
    pub fn new(class: ResourceClass, config: QueueConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let table: Arc<Table<O>> = Arc::new(Mutex::new(HashMap::new()));

        let dispatch = DispatchLoop {
            class,
            max_workers: config.max_workers,
            policy: config.retry,
            cmd_rx,
            table: Arc::clone(&table),
            ready: BinaryHeap::new(),
            delayed: BinaryHeap::new(),
            running: FuturesUnordered::new(),
            info: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
        };
        tokio::spawn(dispatch.run());

        Self {
            class,
            cmd_tx,
            table,
            default_max_attempts: config.default_max_attempts,
            default_timeout: config.default_timeout,
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Submit an operation. Returns immediately; execution is asynchronous.
    pub fn submit(&self, op: TaskOperation<O>, opts: SubmitOptions) -> QueueResult<TaskId> {
        let id = TaskId::new();
        let max_attempts = opts.max_attempts.unwrap_or(self.default_max_attempts).max(1);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);

        let (done, _) = watch::channel(None);
        self.table.lock().expect("task table poisoned").insert(
            id.clone(),
            TaskEntry {
                snapshot: TaskSnapshot::new(id.clone(), self.class, opts.priority, max_attempts),
                done,
            },
        );

        let sent = self.cmd_tx.send(Command::Submit {
            id: id.clone(),
            op,
            priority: opts.priority,
            max_attempts,
            timeout,
        });
        if sent.is_err() {
            self.table
                .lock()
                .expect("task table poisoned")
                .remove(&id);
            return Err(QueueError::ShuttingDown);
        }

        debug!(class = %self.class, task = %id, priority = ?opts.priority, "task submitted");
        Ok(id)
    }

    /// Submit a plain async closure.
    pub fn submit_fn<F, Fut>(&self, f: F, opts: SubmitOptions) -> QueueResult<TaskId>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        let mut f = f;
        self.submit(Box::new(move || f().boxed()), opts)
    }

    /// Wait for the task to reach a terminal state. Every concurrent waiter
    /// on the same id observes the same outcome.
    pub async fn await_result(&self, id: &TaskId) -> QueueResult<O> {
        let mut rx = {
            let table = self.table.lock().expect("task table poisoned");
            let entry = table
                .get(id)
                .ok_or_else(|| QueueError::TaskNotFound(id.clone()))?;
            entry.done.subscribe()
        };

        let outcome = {
            let value = rx
                .wait_for(|v| v.is_some())
                .await
                .map_err(|_| QueueError::ShuttingDown)?;
            value.clone()
        };
        match outcome {
            Some(Ok(output)) => Ok(output),
            Some(Err(err)) => Err(QueueError::Task(err)),
            None => Err(QueueError::ShuttingDown),
        }
    }

    /// Non-blocking state snapshot.
    pub fn status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.table
            .lock()
            .expect("task table poisoned")
            .get(id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Cancel a still-pending task. Running tasks are unaffected and the
    /// call returns false for them.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Cancel {
                id: id.clone(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Counts over every task this queue has seen.
    pub fn stats(&self) -> QueueStats {
        let table = self.table.lock().expect("task table poisoned");
        let mut stats = QueueStats::default();
        for entry in table.values() {
            match entry.snapshot.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Stop dispatching; in-flight tasks finish, remaining pending tasks are
    /// cancelled.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

#[derive(PartialEq, Eq)]
struct Ready {
    rank: u8,
    seq: u64,
    id: TaskId,
}

// BinaryHeap is a max-heap; reverse so the lowest (rank, seq) pops first.
impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(PartialEq, Eq)]
struct Delayed {
    at: Instant,
    rank: u8,
    seq: u64,
    id: TaskId,
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TaskInfo<O> {
    /// Present while the task is pending; taken for the duration of an
    /// attempt and handed back on retry.
    op: Option<TaskOperation<O>>,
    priority: TaskPriority,
    max_attempts: u32,
    timeout: Duration,
    attempts: u32,
}

struct DispatchLoop<O> {
    class: ResourceClass,
    max_workers: usize,
    policy: crate::retry::RetryPolicy,
    cmd_rx: mpsc::UnboundedReceiver<Command<O>>,
    table: Arc<Table<O>>,
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    running: FuturesUnordered<BoxFuture<'static, (TaskId, TaskOperation<O>, Outcome<O>)>>,
    info: HashMap<TaskId, TaskInfo<O>>,
    next_seq: u64,
    shutting_down: bool,
}

impl<O> DispatchLoop<O>
where
    O: Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        info!(class = %self.class, workers = self.max_workers, "task queue started");

        loop {
            self.promote_due();
            self.dispatch_ready();

            if self.shutting_down && self.running.is_empty() {
                break;
            }

            let wake = self.next_retry_in();
            tokio::select! {
                cmd = self.cmd_rx.recv(), if !self.shutting_down => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => self.shutting_down = true,
                    }
                }
                Some((id, op, outcome)) = self.running.next(), if !self.running.is_empty() => {
                    self.handle_attempt_finished(id, op, outcome);
                }
                _ = tokio::time::sleep(wake.unwrap_or(Duration::ZERO)), if wake.is_some() => {}
            }
        }

        self.cancel_remaining();
        info!(class = %self.class, "task queue stopped");
    }

    fn handle_command(&mut self, cmd: Command<O>) {
        match cmd {
            Command::Submit {
                id,
                op,
                priority,
                max_attempts,
                timeout,
            } => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.info.insert(
                    id.clone(),
                    TaskInfo {
                        op: Some(op),
                        priority,
                        max_attempts,
                        timeout,
                        attempts: 0,
                    },
                );
                self.ready.push(Ready {
                    rank: priority.rank(),
                    seq,
                    id,
                });
            }
            Command::Cancel { id, reply } => {
                let cancelled = self.cancel_pending(&id);
                let _ = reply.send(cancelled);
            }
            Command::Shutdown => {
                self.shutting_down = true;
            }
        }
    }

    /// Move retry-delayed tasks whose delay elapsed back into the ready heap.
    fn promote_due(&mut self) {
        let now = Instant::now();
        while self.delayed.peek().is_some_and(|d| d.at <= now) {
            if let Some(d) = self.delayed.pop() {
                self.ready.push(Ready {
                    rank: d.rank,
                    seq: d.seq,
                    id: d.id,
                });
            }
        }
    }

    fn next_retry_in(&self) -> Option<Duration> {
        self.delayed
            .peek()
            .map(|d| d.at.saturating_duration_since(Instant::now()))
    }

    /// Fill free slots with the highest-priority, oldest ready tasks.
    fn dispatch_ready(&mut self) {
        if self.shutting_down {
            return;
        }
        while self.running.len() < self.max_workers {
            let Some(next) = self.ready.pop() else { break };
            // Cancelled entries stay in the heap until popped here.
            if self.status_of(&next.id) != Some(TaskState::Pending) {
                continue;
            }
            self.start_attempt(next.id);
        }
    }

    fn start_attempt(&mut self, id: TaskId) {
        let Some(info) = self.info.get_mut(&id) else {
            return;
        };
        let Some(mut op) = info.op.take() else {
            return;
        };
        info.attempts += 1;
        let attempt = info.attempts;
        let max_attempts = info.max_attempts;
        let timeout = info.timeout;

        self.update_snapshot(&id, |s| {
            s.state = TaskState::Running;
            s.attempts = attempt;
            if s.started_at.is_none() {
                s.started_at = Some(Utc::now());
            }
        });
        debug!(class = %self.class, task = %id, attempt, max_attempts, "attempt started");

        let fut_id = id.clone();
        self.running.push(Box::pin(async move {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::transient(format!(
                    "attempt timed out after {}s",
                    timeout.as_secs()
                ))),
            };
            (fut_id, op, result)
        }));
    }

    fn handle_attempt_finished(&mut self, id: TaskId, op: TaskOperation<O>, outcome: Outcome<O>) {
        let Some((attempts, max_attempts, rank)) = self
            .info
            .get(&id)
            .map(|i| (i.attempts, i.max_attempts, i.priority.rank()))
        else {
            return;
        };
        match outcome {
            Ok(output) => {
                debug!(class = %self.class, task = %id, "task completed");
                self.info.remove(&id);
                self.resolve(&id, TaskState::Completed, Ok(output));
            }
            Err(err) => match self.policy.decide(attempts, max_attempts, err.kind) {
                Decision::Retry { after } => {
                    warn!(
                        class = %self.class,
                        task = %id,
                        attempt = attempts,
                        max_attempts,
                        error = %err,
                        retry_in_secs = after.as_secs_f64(),
                        "attempt failed, will retry"
                    );
                    if let Some(info) = self.info.get_mut(&id) {
                        info.op = Some(op);
                    }
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.update_snapshot(&id, |s| {
                        s.state = TaskState::Pending;
                        s.last_error = Some(err);
                    });
                    self.delayed.push(Delayed {
                        at: Instant::now() + after,
                        rank,
                        seq,
                        id,
                    });
                }
                Decision::Fail => {
                    warn!(
                        class = %self.class,
                        task = %id,
                        attempts,
                        error = %err,
                        "task failed"
                    );
                    self.info.remove(&id);
                    self.resolve(&id, TaskState::Failed, Err(err));
                }
            },
        }
    }

    /// Cancel a pending task; returns false for running or terminal tasks.
    fn cancel_pending(&mut self, id: &TaskId) -> bool {
        if self.status_of(id) != Some(TaskState::Pending) {
            return false;
        }
        self.info.remove(id);
        self.resolve(
            id,
            TaskState::Cancelled,
            Err(TaskError::permanent("task cancelled")),
        );
        debug!(class = %self.class, task = %id, "pending task cancelled");
        true
    }

    /// On shutdown, release waiters of everything that never ran.
    fn cancel_remaining(&mut self) {
        let ids: Vec<TaskId> = self.info.keys().cloned().collect();
        for id in ids {
            self.cancel_pending(&id);
        }
    }

    fn status_of(&self, id: &TaskId) -> Option<TaskState> {
        self.table
            .lock()
            .expect("task table poisoned")
            .get(id)
            .map(|e| e.snapshot.state)
    }

    fn update_snapshot(&self, id: &TaskId, f: impl FnOnce(&mut TaskSnapshot)) {
        if let Some(entry) = self
            .table
            .lock()
            .expect("task table poisoned")
            .get_mut(id)
        {
            f(&mut entry.snapshot);
        }
    }

    /// Record a terminal state and release every waiter.
    fn resolve(&self, id: &TaskId, state: TaskState, outcome: Outcome<O>) {
        let mut table = self.table.lock().expect("task table poisoned");
        if let Some(entry) = table.get_mut(id) {
            entry.snapshot.state = state;
            entry.snapshot.completed_at = Some(Utc::now());
            if let Err(err) = &outcome {
                entry.snapshot.last_error = Some(err.clone());
            }
            entry.done.send_replace(Some(outcome));
        }
    }
}
