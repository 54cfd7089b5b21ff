//! Flush worker with a single repeating timer.
//!
//! One thread owns the timer and receives commands over an MPSC channel.
//! Timer ticks, interval changes, forced flushes and shutdown all run on
//! that thread, so two flushes of the same namespace never overlap and
//! re-arming the timer cannot leave a second one behind.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{DefaultsError, Result};
use crate::namespace::Scope;
use crate::store::Shared;

/// Commands sent to the flush worker.
#[derive(Debug)]
pub(crate) enum Command {
    /// Replace the interval and re-arm the timer from now. A tick already
    /// due sooner than that is kept.
    SetInterval(Duration),
    /// Flush one namespace now; with `force`, also request a durable sync.
    Flush {
        scope: Scope,
        force: bool,
        reply: SyncSender<Result<()>>,
    },
    /// Stop the timer, optionally flushing both namespaces first.
    Shutdown { final_flush: bool },
}

/// Owning handle for the worker thread.
pub(crate) struct Scheduler {
    tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn spawn(shared: Arc<Shared>, interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut worker = FlushWorker {
            shared,
            rx,
            interval,
            next_tick: Instant::now() + interval,
        };
        let handle = thread::Builder::new()
            .name("defaults-flush".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn sender(&self) -> Sender<Command> {
        self.tx.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub(crate) fn shutdown(mut self, final_flush: bool) {
        // A send error means the worker is already gone; joining still reaps it.
        let _ = self.tx.send(Command::Shutdown { final_flush });
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("flush worker panicked");
            }
        }
    }
}

/// Sends `SetInterval` to the worker.
pub(crate) fn set_interval(tx: &Sender<Command>, interval: Duration) -> Result<()> {
    tx.send(Command::SetInterval(interval))
        .map_err(|_| DefaultsError::WorkerStopped)
}

/// Asks the worker to flush `scope` and blocks until it has.
pub(crate) fn flush(tx: &Sender<Command>, scope: Scope, force: bool) -> Result<()> {
    let (reply, rx) = mpsc::sync_channel(1);
    tx.send(Command::Flush {
        scope,
        force,
        reply,
    })
    .map_err(|_| DefaultsError::WorkerStopped)?;
    rx.recv().map_err(|_| DefaultsError::WorkerStopped)?
}

struct FlushWorker {
    shared: Arc<Shared>,
    rx: Receiver<Command>,
    interval: Duration,
    next_tick: Instant,
}

impl FlushWorker {
    fn run(&mut self) {
        tracing::debug!(interval = ?self.interval, "flush worker started");

        loop {
            let timeout = self.next_tick.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(Command::SetInterval(interval)) => {
                    tracing::debug!(?interval, "synchronize interval changed");
                    self.interval = interval;
                    self.next_tick = self.next_tick.min(Instant::now() + interval);
                }
                Ok(Command::Flush {
                    scope,
                    force,
                    reply,
                }) => {
                    let result = self.flush_now(scope, force);
                    // The caller may have given up waiting; nothing to do then.
                    let _ = reply.send(result);
                }
                Ok(Command::Shutdown { final_flush }) => {
                    if final_flush {
                        self.final_flush();
                    }
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("flush worker channel disconnected, stopping");
                    break;
                }
            }

            // A steady stream of commands must not starve the timer.
            if Instant::now() >= self.next_tick {
                self.tick();
                self.next_tick = Instant::now() + self.interval;
            }
        }

        tracing::debug!("flush worker stopped");
    }

    /// Timer firing: save every dirty namespace, no durable sync.
    fn tick(&self) {
        tracing::trace!("synchronize timer fired");
        for scope in Scope::ALL {
            if let Err(e) = self.shared.flush(scope) {
                self.shared.report(scope, &e);
            }
        }
    }

    fn flush_now(&self, scope: Scope, force: bool) -> Result<()> {
        self.shared.flush(scope)?;
        if force {
            self.shared.gateway.synchronize()?;
        }
        Ok(())
    }

    fn final_flush(&self) {
        tracing::info!("flushing defaults before shutdown");
        for scope in Scope::ALL {
            if let Err(e) = self.shared.flush(scope) {
                self.shared.report(scope, &e);
            }
        }
        if let Err(e) = self.shared.gateway.synchronize() {
            tracing::warn!(error = %e, "durable sync failed during shutdown");
            self.shared.notify(&e);
        }
    }
}
