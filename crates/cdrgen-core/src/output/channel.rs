//! Output Channel
//!
//! One endpoint, one generator, one worker task. State machine:
//!
//! ```text
//! Initializing --open ok--> Running <--reopen ok-- Reconnecting
//!      |                       |  \                    ^  |
//!   open failed                |   +--error, closed----+  |
//!      v                       v                          v
//!    Error                  Stopped <-----stop------------+
//! ```
//!
//! `Error` is terminal; besides a failed initial open, a pacing task that
//! ends without a stop request also lands there. Production errors on an open transport are counted
//! and logged without a state change; a replay source that ran out keeps
//! failing on every tick.
//!
//! Stop is cooperative: it is observed between ticks and at the top of
//! every reconnect attempt, never in the middle of a write or a backoff
//! sleep.

use crate::config::{PortConfig, RecoveryConfig};
use crate::error::ChannelError;
use crate::format::{CdrRecord, RecordKind};
use crate::generator::{Generator, Mode, Ticker};
use crate::transport::{Transport, TransportOpener};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Records kept per channel for inspection
pub const RECENT_RECORDS_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Initializing,
    Running,
    Reconnecting,
    Stopped,
    Error,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Initializing => "initializing",
            ChannelState::Running => "running",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Stopped => "stopped",
            ChannelState::Error => "error",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative counters for one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    /// Completed reconnects
    pub reconnects: u64,
    pub last_record_time: Option<DateTime<Local>>,
    pub last_error: Option<String>,
    pub start_time: DateTime<Local>,
}

impl ChannelStats {
    fn new() -> Self {
        Self {
            records_sent: 0,
            bytes_sent: 0,
            errors: 0,
            reconnects: 0,
            last_record_time: None,
            last_error: None,
            start_time: Local::now(),
        }
    }
}

/// A record as it went out on the wire
#[derive(Debug, Clone, Serialize)]
pub struct SentRecord {
    pub id: String,
    pub kind: RecordKind,
    pub timestamp: DateTime<Local>,
    pub sent_at: DateTime<Local>,
    pub bytes: usize,
    pub lines: Vec<String>,
}

/// Point-in-time snapshot for observers
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub device: String,
    pub format: String,
    pub mode: Mode,
    pub state: ChannelState,
    pub calls_per_minute: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub stats: ChannelStats,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// State shared between the channel handle and its worker
struct Shared {
    state: watch::Sender<ChannelState>,
    stats: RwLock<ChannelStats>,
    recent: Mutex<VecDeque<SentRecord>>,
}

impl Shared {
    fn set_state(&self, state: ChannelState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            debug!(from = %prev, to = %state, "channel state changed");
        }
    }

    fn stats(&self) -> ChannelStats {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut ChannelStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn push_recent(&self, record: SentRecord) {
        let mut recent = lock(&self.recent);
        if recent.len() == RECENT_RECORDS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(record);
    }
}

pub struct Channel {
    port: PortConfig,
    recovery: RecoveryConfig,
    format: String,
    mode: Mode,
    opener: Arc<dyn TransportOpener>,
    shared: Arc<Shared>,
    generator: Mutex<Option<Generator>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    pub fn new(
        port: PortConfig,
        recovery: RecoveryConfig,
        generator: Generator,
        opener: Arc<dyn TransportOpener>,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Initializing);
        Self {
            format: generator.format().name().to_string(),
            mode: generator.mode(),
            port,
            recovery,
            opener,
            shared: Arc::new(Shared {
                state,
                stats: RwLock::new(ChannelStats::new()),
                recent: Mutex::new(VecDeque::with_capacity(RECENT_RECORDS_CAPACITY)),
            }),
            generator: Mutex::new(Some(generator)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Open the transport and spawn the production loop.
    ///
    /// An open failure leaves the channel in [`ChannelState::Error`] for
    /// good; no loop is started and no retry happens.
    pub async fn start(&self) -> Result<(), ChannelError> {
        let generator = lock(&self.generator)
            .take()
            .ok_or_else(|| ChannelError::AlreadyStarted(self.port.device.clone()))?;

        self.shared.set_state(ChannelState::Initializing);

        let transport = match self.opener.open(&self.port).await {
            Ok(t) => t,
            Err(e) => {
                self.shared.set_state(ChannelState::Error);
                self.shared.update_stats(|s| {
                    s.errors += 1;
                    s.last_error = Some(e.to_string());
                });
                error!(device = %self.port.device, error = %e, "failed to open transport");
                return Err(ChannelError::Open(e));
            }
        };

        self.shared.set_state(ChannelState::Running);
        info!(
            device = %self.port.device,
            format = %self.format,
            mode = %self.mode,
            calls_per_minute = self.port.calls_per_minute,
            "output channel started"
        );

        let worker = Worker {
            port: self.port.clone(),
            recovery: self.recovery.clone(),
            generator,
            transport,
            opener: self.opener.clone(),
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        };
        let span = info_span!("channel", device = %self.port.device, format = %self.format);
        let handle = tokio::spawn(worker.run().instrument(span));
        *lock(&self.task) = Some(handle);

        Ok(())
    }

    /// Request stop and wait for the worker to finish. Latency is bounded
    /// by the current backoff delay when reconnecting.
    pub async fn stop(&self) {
        info!(device = %self.port.device, "stopping output channel");
        self.cancel.cancel();

        let handle = lock(&self.task).take();
        let Some(handle) = handle else {
            // Never started; Error stays terminal
            if self.state() != ChannelState::Error {
                self.shared.set_state(ChannelState::Stopped);
            }
            return;
        };

        if let Err(e) = handle.await {
            error!(device = %self.port.device, error = %e, "channel worker panicked");
        }
        if self.state() != ChannelState::Error {
            self.shared.set_state(ChannelState::Stopped);
        }

        let stats = self.stats();
        info!(
            device = %self.port.device,
            records_sent = stats.records_sent,
            bytes_sent = stats.bytes_sent,
            errors = stats.errors,
            "output channel stopped"
        );
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.stats()
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            device: self.port.device.clone(),
            format: self.format.clone(),
            mode: self.mode,
            state: self.state(),
            calls_per_minute: self.port.calls_per_minute,
            description: self.port.description.clone(),
            stats: self.stats(),
        }
    }

    /// Up to `limit` most recently sent records, newest first
    pub fn recent_records(&self, limit: usize) -> Vec<SentRecord> {
        lock(&self.shared.recent)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn device(&self) -> &str {
        &self.port.device
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    port: PortConfig,
    recovery: RecoveryConfig,
    generator: Generator,
    transport: Box<dyn Transport>,
    opener: Arc<dyn TransportOpener>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let ticker = Ticker::spawn(self.generator.rate_limiter());
        self.drive(ticker).await;
    }

    async fn drive(mut self, mut ticker: Ticker) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                tick = ticker.tick() => {
                    if tick.is_none() {
                        if !self.cancel.is_cancelled() {
                            self.pacing_stopped();
                        }
                        break;
                    }
                    if let Err(e) = self.send_next().await {
                        if !self.handle_error(e).await {
                            break;
                        }
                    }
                }
            }
        }

        ticker.stop();
        if ticker.dropped() > 0 {
            debug!(dropped = ticker.dropped(), "ticks dropped while busy");
        }
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close transport");
        }
    }

    /// Generate, render, write and flush one record
    async fn send_next(&mut self) -> Result<(), ChannelError> {
        let record = self.generator.next_record()?;
        let payload = record.render();

        let written = self
            .transport
            .write(&payload)
            .await
            .map_err(ChannelError::Write)?;
        self.transport.flush().await.map_err(ChannelError::Flush)?;

        let sent_at = Local::now();
        self.shared.update_stats(|s| {
            s.records_sent += 1;
            s.bytes_sent += written as u64;
            s.last_record_time = Some(sent_at);
        });
        debug!(record_id = %record.id, kind = %record.kind, bytes = written, "sent record");
        self.shared.push_recent(sent_record(record, sent_at, written));

        Ok(())
    }

    /// The pacing task ended without a stop request; nothing will be
    /// produced again, so the channel goes to `Error`
    fn pacing_stopped(&self) {
        let err = ChannelError::PacingStopped(self.port.device.clone());
        let message = err.to_string();
        self.shared.update_stats(|s| {
            s.errors += 1;
            s.last_error = Some(message.clone());
        });
        error!(error = %message, "output channel halted");
        self.shared.set_state(ChannelState::Error);
    }

    /// Count the error and reconnect when the transport went away.
    /// Returns false once stop was requested during reconnect.
    async fn handle_error(&mut self, err: ChannelError) -> bool {
        let message = err.to_string();
        self.shared.update_stats(|s| {
            s.errors += 1;
            s.last_error = Some(message.clone());
        });

        match &err {
            ChannelError::Produce(e) if e.is_exhausted() => warn!(error = %message, "output error"),
            _ => error!(
                error = %message,
                transport = err.transport().is_some(),
                "output error"
            ),
        }

        if self.transport.is_open() {
            return true;
        }
        self.reconnect().await
    }

    async fn reconnect(&mut self) -> bool {
        self.shared.set_state(ChannelState::Reconnecting);
        let _ = self.transport.close().await;

        let mut delay = self.recovery.reconnect_delay();
        let max_delay = self.recovery.max_reconnect_delay();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                info!(attempt, "stop requested while reconnecting");
                self.shared.set_state(ChannelState::Stopped);
                return false;
            }

            attempt += 1;
            info!(attempt, delay = ?delay, "attempting to reconnect");
            tokio::time::sleep(delay).await;

            match self.opener.open(&self.port).await {
                Ok(transport) => {
                    self.transport = transport;
                    self.shared.update_stats(|s| s.reconnects += 1);
                    self.shared.set_state(ChannelState::Running);
                    info!(attempt, "reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect failed");
                    if self.recovery.exponential_backoff {
                        delay = (delay * 2).min(max_delay);
                    }
                }
            }
        }
    }
}

fn sent_record(record: CdrRecord, sent_at: DateTime<Local>, bytes: usize) -> SentRecord {
    SentRecord {
        id: record.id,
        kind: record.kind,
        timestamp: record.timestamp,
        sent_at,
        bytes,
        lines: record.lines,
    }
}
