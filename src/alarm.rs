// src/alarm.rs

//! A one-shot alarm for code that blocks on sockets or threads outside the
//! timed executor.
//!
//! The guarded code starts the alarm, does its work and disarms it. If the
//! work is still going when the timeout elapses, the alarm shuts down every
//! registered socket (unblocking reads and writes on it) and wakes every
//! registered thread through the [`InterruptRegistry`].

use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{ExecError, Result};
use crate::interrupt::timer::OneShotTimer;
use crate::interrupt::InterruptRegistry;

#[derive(Debug)]
pub struct Alarm {
    timeout: Duration,
    registry: Arc<InterruptRegistry>,
    sockets: Vec<TcpStream>,
    threads: Vec<ThreadId>,
    timer: Arc<OneShotTimer>,
}

impl Alarm {
    /// Fails with [`ExecError::InvalidTimeout`] for a zero timeout.
    pub fn new(timeout: Duration, registry: Arc<InterruptRegistry>) -> Result<Self> {
        if timeout.is_zero() {
            return Err(ExecError::InvalidTimeout(
                "alarm timeout must be positive".to_string(),
            ));
        }
        Ok(Self {
            timeout,
            registry,
            sockets: Vec::new(),
            threads: Vec::new(),
            timer: Arc::new(OneShotTimer::new()),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a socket to shut down when the alarm fires.
    pub fn add_socket(&mut self, socket: &TcpStream) -> Result<()> {
        self.sockets.push(socket.try_clone()?);
        Ok(())
    }

    /// Register a thread to wake when the alarm fires.
    pub fn add_thread(&mut self, thread: ThreadId) {
        self.threads.push(thread);
    }

    /// Block for the timeout. If not disarmed in the meantime, act on all
    /// targets and return true.
    pub fn run(&self) -> bool {
        if !self.timer.wait_to_fire(self.timeout) {
            debug!("alarm disarmed before timeout");
            return false;
        }

        info!(
            timeout_ms = self.timeout.as_millis() as u64,
            sockets = self.sockets.len(),
            threads = self.threads.len(),
            "alarm fired"
        );
        for socket in &self.sockets {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(error = %e, "failed to shut down socket");
            }
        }
        for thread in &self.threads {
            self.registry.interrupt_thread(*thread);
        }
        true
    }

    /// Run the alarm on its own thread.
    pub fn start(self) -> Result<AlarmHandle> {
        let timer = Arc::clone(&self.timer);
        let thread = thread::Builder::new()
            .name("harness-exec-alarm".to_string())
            .spawn(move || {
                self.run();
            })?;
        Ok(AlarmHandle {
            timer,
            thread: Some(thread),
        })
    }
}

/// Control handle for a started [`Alarm`].
#[derive(Debug)]
pub struct AlarmHandle {
    timer: Arc<OneShotTimer>,
    thread: Option<JoinHandle<()>>,
}

impl AlarmHandle {
    /// Stop the alarm. Returns true if it had already fired.
    pub fn disarm(mut self) -> bool {
        let disarmed = self.timer.disarm();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("alarm thread panicked");
            }
        }
        !disarmed && self.timer.has_fired()
    }

    pub fn has_fired(&self) -> bool {
        self.timer.has_fired()
    }
}
