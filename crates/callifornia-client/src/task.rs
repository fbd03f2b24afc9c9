//! Retry-until-confirmed requests.
//!
//! Every confirmable request is a task keyed by its UUID. Creating a task
//! performs the first attempt immediately and re-attempts every retry
//! interval. A matching confirmation finishes the task; running out of
//! attempts removes it and fires its exhaustion callback exactly once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type Attempt = Arc<dyn Fn() + Send + Sync>;
type OnExhausted = Box<dyn FnOnce() + Send + Sync>;

struct Task {
    attempts: u32,
    max_attempts: u32,
    attempt: Attempt,
    on_exhausted: Option<OnExhausted>,
    timer: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TaskManager {
    tasks: Arc<DashMap<String, Task>>,
    interval: Duration,
    runtime: Handle,
}

impl TaskManager {
    pub fn new(interval: Duration, runtime: Handle) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            interval,
            runtime,
        }
    }

    /// Register a task and perform its first attempt.
    ///
    /// A task already registered under `uuid` is replaced without firing
    /// its exhaustion callback.
    pub fn create_task<A, E>(&self, uuid: String, max_attempts: u32, attempt: A, on_exhausted: E)
    where
        A: Fn() + Send + Sync + 'static,
        E: FnOnce() + Send + Sync + 'static,
    {
        let attempt: Attempt = Arc::new(attempt);

        let tasks = self.tasks.clone();
        let key = uuid.clone();
        let interval = self.interval;
        let timer = self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !retry(&tasks, &key) {
                    return;
                }
            }
        });

        if let Some(old) = self.tasks.insert(
            uuid,
            Task {
                attempts: 1,
                max_attempts: max_attempts.max(1),
                attempt: attempt.clone(),
                on_exhausted: Some(Box::new(on_exhausted)),
                timer,
            },
        ) {
            old.timer.abort();
        }

        attempt();
    }

    /// Remove a task after its confirmation arrived. False if unknown.
    pub fn finish_task(&self, uuid: &str) -> bool {
        match self.tasks.remove(uuid) {
            Some((_, task)) => {
                task.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every task without firing exhaustion callbacks.
    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.finish_task(&key);
        }
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.tasks.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// One retry tick. Returns false once the task is gone.
fn retry(tasks: &DashMap<String, Task>, uuid: &str) -> bool {
    let attempt = {
        let Some(mut task) = tasks.get_mut(uuid) else {
            return false;
        };
        if task.attempts < task.max_attempts {
            task.attempts += 1;
            Some(task.attempt.clone())
        } else {
            None
        }
    };

    match attempt {
        Some(attempt) => {
            tracing::trace!(uuid, "retrying unconfirmed request");
            attempt();
            true
        }
        None => {
            if let Some((_, mut task)) = tasks.remove(uuid) {
                tracing::debug!(uuid, attempts = task.attempts, "request exhausted");
                if let Some(on_exhausted) = task.on_exhausted.take() {
                    on_exhausted();
                }
            }
            false
        }
    }
}
