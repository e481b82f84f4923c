//! Worker thread with a cooperative termination flag.
//!
//! Every long-lived duty (control loop, TCP reader, keepalive monitor, UDP
//! sender/receiver) runs inside an `Endpoint`. The body receives a `Liveness`
//! handle and must return once `is_alive()` turns false. Blocking calls inside
//! the body are expected to use timeouts; `close()` can additionally run a
//! waker (e.g. a socket shutdown) to unblock them sooner.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use anyhow::Context;
use tracing::{debug, error};

/// Shared termination flag handed to an endpoint body.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        !self.0.load(Ordering::Acquire)
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::Release);
    }
}

type Waker = Box<dyn Fn() + Send + Sync>;

pub struct Endpoint {
    name: String,
    liveness: Liveness,
    handle: Option<JoinHandle<()>>,
    waker: Option<Waker>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl Endpoint {
    /// Spawns `body` on a named OS thread.
    ///
    /// An error returned by the body is logged and marks the endpoint as
    /// terminated; it never crosses the thread boundary.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> anyhow::Result<Self>
    where
        F: FnOnce(Liveness) -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let liveness = Liveness::new();
        let flag = liveness.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(endpoint = %thread_name, "started");
                if let Err(e) = body(flag.clone()) {
                    error!(endpoint = %thread_name, error = %format!("{e:#}"), "endpoint failed");
                }
                flag.terminate();
                debug!(endpoint = %thread_name, "stopped");
            })
            .with_context(|| format!("spawn endpoint {name}"))?;
        Ok(Self {
            name,
            liveness,
            handle: Some(handle),
            waker: None,
        })
    }

    /// Registers an action run by `close()` after the flag is set, used to
    /// unblock a pending socket call.
    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Box::new(waker));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// True once termination was requested or the body returned.
    pub fn is_terminated(&self) -> bool {
        !self.liveness.is_alive() || self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Requests termination and joins the thread. Idempotent.
    ///
    /// Calling this from the endpoint's own thread only sets the flag.
    pub fn close(&mut self) {
        self.liveness.terminate();
        if let Some(waker) = &self.waker {
            waker();
        }
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!(endpoint = %self.name, "endpoint thread panicked");
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    #[test]
    fn close_stops_a_polling_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = iterations.clone();
        let mut ep = Endpoint::spawn("poller", move |live| {
            while live.is_alive() {
                counter.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(!ep.is_terminated());
        let start = Instant::now();
        ep.close();
        assert!(ep.is_terminated());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(iterations.load(Ordering::Relaxed) > 0);
        ep.close();
    }

    #[test]
    fn failing_body_terminates() {
        let ep = Endpoint::spawn("fails", |_| anyhow::bail!("boom")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !ep.is_terminated() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ep.is_terminated());
    }

    #[test]
    fn waker_runs_on_close() {
        let woken = Arc::new(AtomicBool::new(false));
        let flag = woken.clone();
        let mut ep = Endpoint::spawn("waits", |live| {
            while live.is_alive() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap()
        .with_waker(move || flag.store(true, Ordering::SeqCst));
        ep.close();
        assert!(woken.load(Ordering::SeqCst));
    }
}
