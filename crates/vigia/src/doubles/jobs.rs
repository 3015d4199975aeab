//! Background job queue double.
//!
//! Jobs are deferred by default: `enqueue` records them and `drain` runs
//! them. [`JobQueue::run_immediately`] switches one queue to synchronous
//! mode until the returned guard drops. Each queue owns its mode, so a
//! scenario switching modes never affects another scenario's queue.

use crate::fixture::Fixture;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

const NAME: &str = "jobs";

/// When enqueued jobs run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobMode {
    /// Held until [`JobQueue::drain`]
    #[default]
    Deferred,
    /// Run inside `enqueue`
    Immediate,
}

/// One enqueued job
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Unique id
    pub id: uuid::Uuid,
    /// Job name handlers are registered under
    pub name: String,
    /// Job arguments
    pub args: Value,
    /// Enqueue time
    pub enqueued_at: DateTime<Utc>,
}

type Handler = Arc<dyn Fn(&Job) -> HarnessResult<()> + Send + Sync>;

#[derive(Default)]
struct QueueState {
    mode: JobMode,
    pending: VecDeque<Job>,
    history: Vec<Job>,
    completed: Vec<Job>,
    handlers: HashMap<String, Handler>,
}

impl fmt::Debug for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueState")
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .field("history", &self.history.len())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Job queue shared between the application side and the scenario
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl JobQueue {
    /// Deferred queue without handlers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> HarnessResult<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| HarnessError::double(NAME, "queue state poisoned"))
    }

    /// Run `handler` for jobs named `name`
    pub fn register<F>(&self, name: impl Into<String>, handler: F) -> HarnessResult<()>
    where
        F: Fn(&Job) -> HarnessResult<()> + Send + Sync + 'static,
    {
        self.lock()?.handlers.insert(name.into(), Arc::new(handler));
        Ok(())
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> JobMode {
        self.lock().map(|s| s.mode).unwrap_or_default()
    }

    /// Enqueue a job; in immediate mode it runs before this returns
    pub fn enqueue(&self, name: impl Into<String>, args: Value) -> HarnessResult<Job> {
        let job = Job {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            args,
            enqueued_at: Utc::now(),
        };
        let immediate = {
            let mut state = self.lock()?;
            state.history.push(job.clone());
            if state.mode == JobMode::Deferred {
                state.pending.push_back(job.clone());
            }
            state.mode == JobMode::Immediate
        };
        tracing::debug!(job = %job.name, immediate, "job enqueued");
        if immediate {
            self.execute(&job)?;
        }
        Ok(job)
    }

    fn execute(&self, job: &Job) -> HarnessResult<()> {
        let handler = self.lock()?.handlers.get(&job.name).cloned();
        if let Some(handler) = handler {
            handler(job)?;
        }
        self.lock()?.completed.push(job.clone());
        Ok(())
    }

    /// Run pending jobs in order, including any they enqueue.
    ///
    /// Every job runs; failures come back together as a `Double` error.
    pub fn drain(&self) -> HarnessResult<usize> {
        let mut ran = 0;
        let mut failures = Vec::new();
        loop {
            // lock released before the handler runs so it may enqueue
            let next = self.lock()?.pending.pop_front();
            let Some(job) = next else { break };
            ran += 1;
            if let Err(e) = self.execute(&job) {
                failures.push(format!("{}: {e}", job.name));
            }
        }
        if failures.is_empty() {
            Ok(ran)
        } else {
            Err(HarnessError::double(NAME, failures.join("; ")))
        }
    }

    /// Switch to immediate mode until the guard drops
    pub fn run_immediately(&self) -> ImmediateGuard {
        let previous = match self.lock() {
            Ok(mut state) => std::mem::replace(&mut state.mode, JobMode::Immediate),
            Err(_) => JobMode::Deferred,
        };
        ImmediateGuard {
            queue: self.clone(),
            previous,
        }
    }

    /// Jobs waiting for [`drain`](Self::drain)
    #[must_use]
    pub fn pending(&self) -> Vec<Job> {
        self.lock()
            .map(|s| s.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every job ever enqueued with `name`
    #[must_use]
    pub fn enqueued(&self, name: &str) -> Vec<Job> {
        self.lock()
            .map(|s| s.history.iter().filter(|j| j.name == name).cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent job enqueued with `name`
    #[must_use]
    pub fn last_enqueued(&self, name: &str) -> Option<Job> {
        self.lock()
            .ok()
            .and_then(|s| s.history.iter().rev().find(|j| j.name == name).cloned())
    }

    /// Jobs that have run
    #[must_use]
    pub fn completed(&self) -> Vec<Job> {
        self.lock().map(|s| s.completed.clone()).unwrap_or_default()
    }

    /// Drop pending jobs and history; handlers and mode stay
    pub fn clear(&self) {
        if let Ok(mut state) = self.lock() {
            state.pending.clear();
            state.history.clear();
            state.completed.clear();
        }
    }
}

/// Restores the queue's previous mode on drop
#[derive(Debug)]
#[must_use = "dropping the guard restores deferred mode immediately"]
pub struct ImmediateGuard {
    queue: JobQueue,
    previous: JobMode,
}

impl Drop for ImmediateGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.queue.lock() {
            state.mode = self.previous;
        }
    }
}

#[async_trait]
impl Fixture for JobQueue {
    async fn setup(&mut self) -> HarnessResult<()> {
        self.clear();
        Ok(())
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        let leftover = self.pending().len();
        if leftover > 0 {
            tracing::debug!(leftover, "discarding undrained jobs");
        }
        self.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "job queue"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(queue: &JobQueue, name: &str) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        queue
            .register(name, move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        hits
    }

    mod mode_tests {
        use super::*;

        #[test]
        fn test_deferred_until_drain() {
            let queue = JobQueue::new();
            let hits = counting(&queue, "send_email");
            queue.enqueue("send_email", json!({"user": 1})).unwrap();
            queue.enqueue("send_email", json!({"user": 2})).unwrap();
            assert_eq!(hits.load(Ordering::SeqCst), 0);
            assert_eq!(queue.pending().len(), 2);

            assert_eq!(queue.drain().unwrap(), 2);
            assert_eq!(hits.load(Ordering::SeqCst), 2);
            assert!(queue.pending().is_empty());
            assert_eq!(queue.completed().len(), 2);
        }

        #[test]
        fn test_run_immediately_is_scoped() {
            let queue = JobQueue::new();
            let hits = counting(&queue, "notify");
            {
                let _guard = queue.run_immediately();
                assert_eq!(queue.mode(), JobMode::Immediate);
                queue.enqueue("notify", Value::Null).unwrap();
                assert_eq!(hits.load(Ordering::SeqCst), 1);
                assert!(queue.pending().is_empty());
            }
            assert_eq!(queue.mode(), JobMode::Deferred);
            queue.enqueue("notify", Value::Null).unwrap();
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_nested_guards_restore_in_order() {
            let queue = JobQueue::new();
            let outer = queue.run_immediately();
            let inner = queue.run_immediately();
            drop(inner);
            assert_eq!(queue.mode(), JobMode::Immediate);
            drop(outer);
            assert_eq!(queue.mode(), JobMode::Deferred);
        }

        #[test]
        fn test_queues_do_not_share_mode() {
            let a = JobQueue::new();
            let b = JobQueue::new();
            let _guard = a.run_immediately();
            assert_eq!(b.mode(), JobMode::Deferred);
        }
    }

    mod drain_tests {
        use super::*;

        #[test]
        fn test_handler_may_enqueue_followups() {
            let queue = JobQueue::new();
            let follow = queue.clone();
            queue
                .register("post_created", move |job| {
                    follow.enqueue("notify_watchers", job.args.clone()).map(|_| ())
                })
                .unwrap();
            let hits = counting(&queue, "notify_watchers");
            queue.enqueue("post_created", json!({"post": 7})).unwrap();
            assert_eq!(queue.drain().unwrap(), 2);
            assert_eq!(hits.load(Ordering::SeqCst), 1);
            assert_eq!(queue.last_enqueued("notify_watchers").unwrap().args, json!({"post": 7}));
        }

        #[test]
        fn test_drain_runs_everything_and_reports_failures() {
            let queue = JobQueue::new();
            queue
                .register("flaky", |_| Err(HarnessError::double("jobs", "boom")))
                .unwrap();
            let hits = counting(&queue, "ok");
            queue.enqueue("flaky", Value::Null).unwrap();
            queue.enqueue("ok", Value::Null).unwrap();
            let err = queue.drain().unwrap_err();
            assert!(err.to_string().contains("flaky"));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn test_unhandled_jobs_still_complete() {
            let queue = JobQueue::new();
            queue.enqueue("unknown", Value::Null).unwrap();
            assert_eq!(queue.drain().unwrap(), 1);
            assert_eq!(queue.enqueued("unknown").len(), 1);
        }
    }
}
