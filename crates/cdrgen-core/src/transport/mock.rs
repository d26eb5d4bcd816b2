//! In-memory transport for tests
//!
//! [`MockOpener`] hands out [`MockTransport`]s and records every open
//! attempt with its (tokio) timestamp, so backoff timing can be asserted
//! under a paused clock. Each opened transport is paired with a
//! [`MockHandle`] that captures writes and injects failures from the
//! test side.

use super::{Transport, TransportOpener};
use crate::config::PortConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    writes: Vec<Bytes>,
    flushes: usize,
    /// Next write fails and closes the transport
    fail_and_close: bool,
    /// Writes fail but the transport stays open
    fail_writes: bool,
    fail_flush: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Test-side view of one opened mock transport
#[derive(Debug, Clone)]
pub struct MockHandle {
    identity: String,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<Bytes> {
        lock(&self.state).writes.clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.state).writes.len()
    }

    /// All written bytes concatenated
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state)
            .writes
            .iter()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.state).flushes
    }

    /// Fail the next write with a broken pipe and report closed afterwards
    pub fn fail_and_close(&self) {
        lock(&self.state).fail_and_close = true;
    }

    /// Fail writes while staying open
    pub fn set_write_error(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn set_flush_error(&self, fail: bool) {
        lock(&self.state).fail_flush = fail;
    }
}

pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    pub fn new(identity: impl Into<String>) -> (Self, MockHandle) {
        let handle = MockHandle {
            identity: identity.into(),
            state: Arc::new(Mutex::new(MockState {
                open: true,
                ..MockState::default()
            })),
        };
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn closed(&self) -> TransportError {
        TransportError::Closed(self.handle.identity.clone())
    }

    fn io(&self, kind: io::ErrorKind, msg: &str) -> TransportError {
        TransportError::Io {
            identity: self.handle.identity.clone(),
            source: io::Error::new(kind, msg.to_string()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = lock(&self.handle.state);
        if !state.open {
            return Err(self.closed());
        }
        if state.fail_and_close {
            state.fail_and_close = false;
            state.open = false;
            return Err(self.io(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        if state.fail_writes {
            return Err(self.io(io::ErrorKind::WouldBlock, "write timed out"));
        }
        state.writes.push(Bytes::copy_from_slice(data));
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.handle.state);
        if !state.open {
            return Err(self.closed());
        }
        if state.fail_flush {
            return Err(self.io(io::ErrorKind::TimedOut, "drain timed out"));
        }
        state.flushes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        lock(&self.handle.state).open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn identity(&self) -> &str {
        &self.handle.identity
    }
}

/// Scripted outcome of one open attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Succeed,
    Fail,
}

#[derive(Default)]
struct OpenerState {
    script: VecDeque<OpenOutcome>,
    attempts: Vec<Instant>,
    handles: Vec<MockHandle>,
}

/// Opener producing mock transports; succeeds once the script runs out
#[derive(Default)]
pub struct MockOpener {
    state: Mutex<OpenerState>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opener whose first attempts follow `script`
    pub fn scripted(script: impl IntoIterator<Item = OpenOutcome>) -> Self {
        let opener = Self::new();
        lock(&opener.state).script.extend(script);
        opener
    }

    /// Queue further outcomes after the current script
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        lock(&self.state).script.extend(outcomes);
    }

    /// Timestamp of every open attempt, successful or not
    pub fn attempts(&self) -> Vec<Instant> {
        lock(&self.state).attempts.clone()
    }

    /// Handles of every transport successfully opened, oldest first
    pub fn handles(&self) -> Vec<MockHandle> {
        lock(&self.state).handles.clone()
    }

    pub fn latest(&self) -> Option<MockHandle> {
        lock(&self.state).handles.last().cloned()
    }

    /// Latest handle opened for `device`
    pub fn handle_for(&self, device: &str) -> Option<MockHandle> {
        lock(&self.state)
            .handles
            .iter()
            .rev()
            .find(|h| h.identity == device)
            .cloned()
    }
}

#[async_trait]
impl TransportOpener for MockOpener {
    async fn open(&self, port: &PortConfig) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = lock(&self.state);
        state.attempts.push(Instant::now());

        match state.script.pop_front().unwrap_or(OpenOutcome::Succeed) {
            OpenOutcome::Fail => Err(TransportError::Open {
                identity: port.device.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            }),
            OpenOutcome::Succeed => {
                let (transport, handle) = MockTransport::new(port.device.clone());
                state.handles.push(handle);
                Ok(Box::new(transport))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_and_close_closes_after_one_write() {
        let (mut transport, handle) = MockTransport::new("mock0");
        transport.write(b"ok\n").await.unwrap();

        handle.fail_and_close();
        assert!(matches!(
            transport.write(b"lost\n").await,
            Err(TransportError::Io { .. })
        ));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(b"late\n").await,
            Err(TransportError::Closed(_))
        ));
        assert_eq!(handle.written(), b"ok\n");
    }

    #[tokio::test]
    async fn test_write_error_keeps_transport_open() {
        let (mut transport, handle) = MockTransport::new("mock0");
        handle.set_write_error(true);
        assert!(transport.write(b"x").await.is_err());
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_scripted_opener() {
        let opener = MockOpener::scripted([OpenOutcome::Fail]);
        let port = PortConfig::new("mock0", "vesta", "synthetic");

        assert!(opener.open(&port).await.is_err());
        assert!(opener.open(&port).await.is_ok());
        assert_eq!(opener.attempts().len(), 2);
        assert_eq!(opener.handles().len(), 1);
        assert!(opener.handle_for("mock0").is_some());
    }
}
