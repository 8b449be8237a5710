// SPDX-License-Identifier: GPL-3.0-only

//! Presentation-thread event loop
//!
//! A [`Dispatcher`] runs a dedicated thread that owns a piece of
//! presentation state `S` (display surfaces, counters). The state is created
//! on that thread and stays there until shutdown; other threads reach it only
//! by posting closures through a [`DispatcherHandle`]:
//!
//! - [`DispatcherHandle::invoke`] blocks until the closure has run and
//!   returns its result
//! - [`DispatcherHandle::begin_invoke`] queues the closure and returns
//!
//! ```text
//! ┌─────────────────┐  invoke(|s| ..)   ┌────────────────────────┐
//! │ capture worker  │ ────────────────► │  presentation thread   │
//! │ (blocked until  │ ◄──────────────── │  owns S, runs jobs in  │
//! │  reply arrives) │      reply        │  arrival order         │
//! └─────────────────┘                   └────────────────────────┘
//! ```

use crate::errors::{PipelineError, PipelineResult};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum DispatcherCommand<S> {
    Run(Job<S>),
    Shutdown,
}

/// Cloneable handle used to post work to a dispatcher
pub struct DispatcherHandle<S> {
    tx: Sender<DispatcherCommand<S>>,
    thread_id: ThreadId,
}

impl<S> Clone for DispatcherHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            thread_id: self.thread_id,
        }
    }
}

impl<S: 'static> DispatcherHandle<S> {
    /// True when called from the dispatcher's own thread
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the presentation thread and wait for its result
    ///
    /// Fails with [`PipelineError::DispatcherShutDown`] if the loop has
    /// exited (or exits before running `f`), and with
    /// [`PipelineError::ReentrantInvoke`] when called from the presentation
    /// thread itself.
    pub fn invoke<R, F>(&self, f: F) -> PipelineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_dispatcher_thread() {
            return Err(PipelineError::ReentrantInvoke);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(DispatcherCommand::Run(Box::new(move |state: &mut S| {
                // Receiver gone means the caller stopped waiting
                let _ = reply_tx.send(f(state));
            })))
            .map_err(|_| PipelineError::DispatcherShutDown)?;

        reply_rx.recv().map_err(|_| PipelineError::DispatcherShutDown)
    }

    /// Queue `f` on the presentation thread without waiting
    pub fn begin_invoke<F>(&self, f: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(DispatcherCommand::Run(Box::new(f)))
            .map_err(|_| PipelineError::DispatcherShutDown)
    }
}

/// Owner of a presentation thread
///
/// Dropping the dispatcher shuts the loop down and waits for it. Use
/// [`Dispatcher::shutdown`] to get the state back.
pub struct Dispatcher<S> {
    name: String,
    handle: DispatcherHandle<S>,
    thread: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> Dispatcher<S> {
    /// Spawn the presentation thread; `init` builds the state on that thread
    pub fn start<I>(name: &str, init: I) -> PipelineResult<Self>
    where
        I: FnOnce() -> S + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<DispatcherCommand<S>>();
        let thread_name = name.to_string();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = init();
                debug!(name = %thread_name, "Dispatcher loop running");

                while let Ok(command) = rx.recv() {
                    match command {
                        DispatcherCommand::Run(job) => job(&mut state),
                        DispatcherCommand::Shutdown => break,
                    }
                }

                debug!(name = %thread_name, "Dispatcher loop exiting");
                state
            })
            .map_err(|e| PipelineError::WorkerStartup(format!("spawn {}: {}", name, e)))?;

        info!(name, "Presentation dispatcher started");

        Ok(Self {
            name: name.to_string(),
            handle: DispatcherHandle {
                tx,
                thread_id: thread.thread().id(),
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DispatcherHandle<S> {
        self.handle.clone()
    }

    /// Drain queued work, stop the loop and return the state
    pub fn shutdown(mut self) -> PipelineResult<S> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> PipelineResult<S> {
        // Already exited when the send fails
        let _ = self.handle.tx.send(DispatcherCommand::Shutdown);

        let thread = self.thread.take().ok_or(PipelineError::DispatcherShutDown)?;
        thread.join().map_err(|_| {
            error!(name = %self.name, "Presentation dispatcher panicked");
            PipelineError::DispatcherPanicked
        })
    }
}

impl<S> Drop for Dispatcher<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.tx.send(DispatcherCommand::Shutdown);
            if thread.join().is_err() {
                error!(name = %self.name, "Presentation dispatcher panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invoke_returns_result() {
        let dispatcher = Dispatcher::start("test-dispatcher", || 40u32).unwrap();
        let handle = dispatcher.handle();
        let value = handle
            .invoke(|state| {
                *state += 2;
                *state
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(dispatcher.shutdown().unwrap(), 42);
    }

    #[test]
    fn test_begin_invoke_runs_in_order() {
        let dispatcher = Dispatcher::start("test-dispatcher", Vec::<u32>::new).unwrap();
        let handle = dispatcher.handle();
        for i in 0..5 {
            handle
                .begin_invoke(move |log| {
                    std::thread::sleep(Duration::from_millis(1));
                    log.push(i);
                })
                .unwrap();
        }
        assert_eq!(dispatcher.shutdown().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_shutdown_hands_state_back_across_threads() {
        let dispatcher = Dispatcher::start("test-dispatcher", || {
            vec![format!("{:?}", std::thread::current().name())]
        })
        .unwrap();
        dispatcher
            .handle()
            .begin_invoke(|names| names.push("second".to_string()))
            .unwrap();

        let names = dispatcher.shutdown().unwrap();
        assert_eq!(names, vec!["Some(\"test-dispatcher\")".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_invoke_after_shutdown_fails() {
        let dispatcher = Dispatcher::start("test-dispatcher", || ()).unwrap();
        let handle = dispatcher.handle();
        dispatcher.shutdown().unwrap();
        assert!(matches!(
            handle.invoke(|_| ()),
            Err(PipelineError::DispatcherShutDown)
        ));
    }

    #[test]
    fn test_reentrant_invoke_is_refused() {
        let dispatcher = Dispatcher::start("test-dispatcher", || ()).unwrap();
        let handle = dispatcher.handle();
        let inner = handle.clone();
        let result = handle
            .invoke(move |_| matches!(inner.invoke(|_| ()), Err(PipelineError::ReentrantInvoke)))
            .unwrap();
        assert!(result);
    }
}
