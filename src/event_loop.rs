//! Single-threaded script event loop.
//!
//! The QuickJS runtime is not `Send`, so it is created on and never leaves a
//! dedicated thread. Work reaches it only as closures submitted through a
//! [`LoopHandle`]; jobs run one at a time, in submission order, and pending
//! promise jobs are drained after each one.

use std::thread::JoinHandle;

use rquickjs::{Context, Ctx, Runtime};
use tokio::sync::{mpsc, oneshot};

use crate::bridge::PendingRelease;
use crate::error::{Error, Result};

type Job = Box<dyn for<'js> FnOnce(Ctx<'js>) + Send>;

enum Message {
    Job(Job),
    Stop,
}

/// Cloneable submission side of an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl LoopHandle {
    /// Queue `job` to run on the loop thread. Returns `false` if the loop has
    /// shut down, in which case the job is dropped without running.
    pub fn run_on_loop<F>(&self, job: F) -> bool
    where
        F: for<'js> FnOnce(Ctx<'js>) + Send + 'static,
    {
        self.tx.send(Message::Job(Box::new(job))).is_ok()
    }

    /// Run `job` on the loop and block until it returns.
    ///
    /// Calling this from the loop thread deadlocks.
    pub fn call<F, R>(&self, job: F) -> Result<R>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        let queued = self.run_on_loop(move |ctx| {
            let _ = tx.send(job(ctx));
        });
        if !queued {
            return Err(Error::LoopStopped);
        }
        rx.recv().map_err(|_| Error::LoopStopped)
    }

    /// Run `job` on the loop and await its return value.
    pub async fn call_async<F, R>(&self, job: F) -> Result<R>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = self.run_on_loop(move |ctx| {
            let _ = tx.send(job(ctx));
        });
        if !queued {
            return Err(Error::LoopStopped);
        }
        rx.await.map_err(|_| Error::LoopStopped)
    }
}

/// A running script environment: one engine instance on its own thread.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread and create the engine on it.
    pub fn start() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("fetch-bridge-loop".into())
            .spawn(move || run(rx, ready_tx))
            .map_err(|e| Error::Engine(format!("failed to spawn loop thread: {e}")))?;

        ready_rx.recv().map_err(|_| Error::LoopStopped)??;
        tracing::debug!("event loop started");

        Ok(Self {
            handle: LoopHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// See [`LoopHandle::run_on_loop`].
    pub fn run_on_loop<F>(&self, job: F) -> bool
    where
        F: for<'js> FnOnce(Ctx<'js>) + Send + 'static,
    {
        self.handle.run_on_loop(job)
    }

    /// See [`LoopHandle::call`].
    pub fn call<F, R>(&self, job: F) -> Result<R>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.call(job)
    }

    /// See [`LoopHandle::call_async`].
    pub async fn call_async<F, R>(&self, job: F) -> Result<R>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.call_async(job).await
    }

    /// Stop the loop after the jobs already queued and join its thread.
    /// Results delivered afterwards are dropped.
    pub fn stop(&mut self) {
        let _ = self.handle.tx.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut rx: mpsc::UnboundedReceiver<Message>, ready: std::sync::mpsc::Sender<Result<()>>) {
    let engine = Runtime::new().and_then(|runtime| {
        let context = Context::full(&runtime)?;
        Ok((runtime, context))
    });
    let (runtime, context) = match engine {
        Ok(engine) => engine,
        Err(e) => {
            let _ = ready.send(Err(Error::Engine(e.to_string())));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Declared after the engine so it drops first.
    let _pending = PendingRelease;

    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Job(job) => {
                context.with(|ctx| job(ctx));
                drain_jobs(&runtime);
            }
            Message::Stop => break,
        }
    }

    tracing::debug!("event loop stopped");
}

/// Run promise continuations until none are left.
fn drain_jobs(runtime: &Runtime) {
    while runtime.is_job_pending() {
        if runtime.execute_pending_job().is_err() {
            tracing::warn!("uncaught exception in promise job");
        }
    }
}
