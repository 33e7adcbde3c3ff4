//! Mock link adapter for testing
//!
//! Simulates a serial port without hardware:
//! - open/closed state that tests can flip
//! - failure injection for `open` and for specific write attempts
//! - a call log and the list of lines actually written, with the (tokio)
//!   time of each write

use super::LinkTransport;
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

/// Mock link adapter
///
/// # Example
///
/// ```
/// use pld_control::adapters::MockAdapter;
///
/// let adapter = MockAdapter::opened("COM1");
/// adapter.fail_writes_at(&[2]);
/// assert!(adapter.written().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct MockAdapter {
    port_name: String,
    open: Arc<AtomicBool>,
    fail_open: Arc<AtomicBool>,
    write_attempts: Arc<AtomicUsize>,
    failing_writes: Arc<Mutex<HashSet<usize>>>,
    call_log: Arc<Mutex<Vec<String>>>,
    written: Arc<Mutex<Vec<String>>>,
    write_times: Arc<Mutex<Vec<Instant>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockAdapter {
    /// Create a closed mock port.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            open: Arc::new(AtomicBool::new(false)),
            fail_open: Arc::new(AtomicBool::new(false)),
            write_attempts: Arc::new(AtomicUsize::new(0)),
            failing_writes: Arc::new(Mutex::new(HashSet::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
            written: Arc::new(Mutex::new(Vec::new())),
            write_times: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock port that is already open.
    pub fn opened(port_name: impl Into<String>) -> Self {
        let adapter = Self::new(port_name);
        adapter.set_open(true);
        adapter
    }

    /// Set the open state directly.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make every `open` call fail until cleared.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Fail the write attempts with these zero-based indices.
    pub fn fail_writes_at(&self, attempts: &[usize]) {
        guard(&self.failing_writes).extend(attempts.iter().copied());
    }

    /// Number of write attempts so far, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Lines successfully written, without the newline.
    pub fn written(&self) -> Vec<String> {
        guard(&self.written).clone()
    }

    /// When each line in [`written`](Self::written) went out.
    pub fn write_times(&self) -> Vec<Instant> {
        guard(&self.write_times).clone()
    }

    /// Every call made on the adapter, in order.
    pub fn call_log(&self) -> Vec<String> {
        guard(&self.call_log).clone()
    }

    fn log_call(&self, call: String) {
        guard(&self.call_log).push(call);
    }
}

#[async_trait]
impl LinkTransport for MockAdapter {
    fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), TransportError> {
        self.log_call("open".to_string());
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                port: self.port_name.clone(),
                reason: "Injected failure".to_string(),
            });
        }
        self.set_open(true);
        Ok(())
    }

    async fn close(&self) {
        self.log_call("close".to_string());
        self.set_open(false);
    }

    async fn write_line(&self, message: &str) -> Result<(), TransportError> {
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.log_call(format!("write: {message}"));

        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.port_name.clone()));
        }
        if guard(&self.failing_writes).remove(&attempt) {
            return Err(TransportError::Write {
                port: self.port_name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Injected failure"),
            });
        }

        guard(&self.written).push(message.to_string());
        guard(&self.write_times).push(Instant::now());
        Ok(())
    }
}
