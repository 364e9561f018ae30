use futures::future::join_all;
use poise::serenity_prelude::Context;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[async_trait::async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn schedule(&self) -> Option<Duration>;
    async fn execute(
        &mut self,
        ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn box_clone(&self) -> Box<dyn Task>;
}

pub struct TaskManager {
    tasks: Mutex<Vec<Box<dyn Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager").finish_non_exhaustive()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            shutdown: watch::channel(false).0,
        }
    }

    pub async fn add_task(&self, task: impl Task + 'static) {
        self.tasks.lock().await.push(Box::new(task));
    }

    /// Spawns every queued task. A task runs, sleeps for its schedule and
    /// repeats; shutdown is only observed between runs.
    pub async fn start_tasks(&self, ctx: Context) {
        let mut tasks = self.tasks.lock().await;
        let mut handles = self.handles.lock().await;

        for task in tasks.drain(..) {
            let ctx = ctx.clone();
            let mut shutdown = self.shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut task = task;
                info!("Starting task {}", task.name());
                while let Some(interval) = task.schedule() {
                    if let Err(e) = task.execute(&ctx).await {
                        error!("Task {} failed: {}", task.name(), e);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("Task {} stopped", task.name());
            });
            handles.push(handle);
        }
    }

    /// Signals every task to stop, waits up to `grace` for runs in progress
    /// to finish and aborts whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.send_replace(true);
        let mut handles = self.handles.lock().await;

        if tokio::time::timeout(grace, join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            warn!("Tasks did not stop within {:?}, aborting", grace);
            for handle in handles.drain(..).filter(|h| !h.is_finished()) {
                handle.abort();
                let _ = handle.await;
            }
        }
        handles.clear();
    }
}
