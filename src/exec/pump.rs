// src/exec/pump.rs

//! Output sinks and the background threads that drain child pipes into them.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, warn};

const PUMP_CHUNK: usize = 8 * 1024;

/// In-memory capture target. Cloning shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lossy UTF-8 snapshot of everything captured so far.
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer shared between pump threads (stdout and stderr may target the
/// same sink when stderr is redirected).
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_all(buf)
    }

    fn flush(&self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}

/// Spawn a detached thread copying `reader` into `sink` until EOF, then call
/// `on_done`. Returns false if the thread could not be started, in which case
/// `on_done` is not called.
///
/// Read and write errors are logged and never fatal. After a write error the
/// pump keeps reading and discards, so the child is not blocked on a full
/// pipe.
pub fn spawn_pump<R, F>(label: &'static str, reader: R, sink: SharedSink, on_done: F) -> bool
where
    R: Read + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("harness-exec-{label}-pump"))
        .spawn(move || {
            pump(label, reader, &sink);
            on_done();
        });

    match spawned {
        Ok(_detached) => true,
        Err(e) => {
            warn!(stream = label, error = %e, "failed to start output pump");
            false
        }
    }
}

fn pump<R: Read>(label: &str, mut reader: R, sink: &SharedSink) {
    let mut chunk = [0u8; PUMP_CHUNK];
    let mut sink_ok = true;
    let mut total = 0usize;

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(stream = label, error = %e, "error reading process output");
                break;
            }
        };
        total += n;

        if sink_ok {
            if let Err(e) = sink.write_all(&chunk[..n]) {
                warn!(stream = label, error = %e, "error writing process output; discarding the rest");
                sink_ok = false;
            }
        }
    }

    if sink_ok {
        if let Err(e) = sink.flush() {
            warn!(stream = label, error = %e, "error flushing process output");
        }
    }
    debug!(stream = label, bytes = total, "output pump finished");
}

/// Spawn a detached thread writing `payload` to a child's stdin and closing
/// it. A child that exits without reading produces a logged broken pipe.
pub fn spawn_stdin_feeder<W>(mut stdin: W, payload: String)
where
    W: Write + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("harness-exec-stdin".to_string())
        .spawn(move || {
            if let Err(e) = stdin.write_all(payload.as_bytes()).and_then(|_| stdin.flush()) {
                if e.kind() == ErrorKind::BrokenPipe {
                    debug!("process closed stdin before the input was fully written");
                } else {
                    warn!(error = %e, "error writing process input");
                }
            }
        });

    if let Err(e) = spawned {
        warn!(error = %e, "failed to start stdin writer");
    }
}
