//! Dedicated signaling thread.
//!
//! A single OS thread running a current-thread tokio runtime. Posted tasks are
//! awaited one after another in posting order, so a task that awaits network
//! I/O holds back every task queued behind it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::thread::JoinHandle;

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use super::EngineError;

/// Unit of work executed on the signaling thread
pub type SignalingTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct SignalingThread {
    name: String,
    queue: Option<mpsc::UnboundedSender<SignalingTask>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalingThread {
    /// Spawn the thread and its runtime.
    pub fn start(name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (queue, mut tasks) = mpsc::unbounded_channel::<SignalingTask>();

        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!("{}: started", thread_name);
                runtime.block_on(async move {
                    while let Some(task) = tasks.recv().await {
                        task.await;
                    }
                });
                debug!("{}: stopped", thread_name);
            })?;

        Ok(Self {
            name: name.to_string(),
            queue: Some(queue),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task behind everything already posted.
    pub fn post<F>(&self, task: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.post_boxed(Box::pin(task))
    }

    pub fn post_boxed(&self, task: SignalingTask) -> Result<(), EngineError> {
        let queue = self.queue.as_ref().ok_or(EngineError::SignalingThreadClosed)?;
        queue
            .send(task)
            .map_err(|_| EngineError::SignalingThreadClosed)
    }

    /// Run `task` on the signaling thread and wait for its result.
    ///
    /// Must not be called from a task already running on this thread.
    pub async fn invoke<F, T>(&self, task: F) -> Result<T, EngineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(async move {
            let _ = tx.send(task.await);
        })?;
        rx.await.map_err(|_| EngineError::SignalingThreadClosed)
    }

    /// Stop accepting tasks, drain the queue and join the thread.
    pub fn stop(&mut self) {
        self.queue.take();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                error!("{}: thread panicked", self.name);
            }
        }
    }
}

impl Drop for SignalingThread {
    fn drop(&mut self) {
        self.stop();
    }
}
