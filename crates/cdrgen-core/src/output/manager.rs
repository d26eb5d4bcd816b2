//! Output Manager
//!
//! Builds one generator + channel per enabled port and supervises them.
//! A port whose generator cannot be built, or whose transport cannot be
//! opened, is logged and skipped; only a start with zero running channels
//! is an error.

use super::channel::{Channel, ChannelInfo, ChannelState, ChannelStats, SentRecord};
use crate::config::Config;
use crate::error::ManagerError;
use crate::format::FormatRegistry;
use crate::generator::Generator;
use crate::transport::TransportOpener;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Sums across every channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub channels: usize,
    pub records_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

pub struct OutputManager {
    config: Config,
    registry: Arc<FormatRegistry>,
    opener: Arc<dyn TransportOpener>,
    /// Every constructed channel, including ones stuck in `Error`
    channels: RwLock<Vec<Arc<Channel>>>,
    started: AtomicBool,
}

impl OutputManager {
    pub fn new(config: Config, registry: Arc<FormatRegistry>, opener: Arc<dyn TransportOpener>) -> Self {
        Self {
            config,
            registry,
            opener,
            channels: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Start a channel for every enabled port; returns how many are running.
    /// Only the first call does anything; later calls fail with
    /// [`ManagerError::AlreadyStarted`].
    pub async fn start(&self) -> Result<usize, ManagerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ManagerError::AlreadyStarted);
        }
        let mut started = 0;

        for port in &self.config.ports {
            if !port.enabled {
                info!(device = %port.device, "skipping disabled port");
                continue;
            }

            let generator = match Generator::new(&self.registry, port, self.config.timing.jitter_percent) {
                Ok(g) => g,
                Err(e) => {
                    error!(device = %port.device, error = %e, "failed to create generator");
                    continue;
                }
            };

            let channel = Arc::new(Channel::new(
                port.clone(),
                self.config.recovery.clone(),
                generator,
                self.opener.clone(),
            ));
            let result = channel.start().await;
            self.channels
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(channel);

            match result {
                Ok(()) => {
                    started += 1;
                    info!(
                        device = %port.device,
                        format = %port.format,
                        mode = %port.mode,
                        "started output channel"
                    );
                }
                Err(e) => error!(device = %port.device, error = %e, "failed to start channel"),
            }
        }

        if started == 0 {
            return Err(ManagerError::NoChannelsStarted);
        }
        info!(channels = started, "output manager started");
        Ok(started)
    }

    /// Stop every channel concurrently and wait for all of them
    pub async fn stop(&self) {
        let channels = self.channels();
        info!(channels = channels.len(), "stopping output manager");

        let mut set = JoinSet::new();
        for channel in channels {
            set.spawn(async move { channel.stop().await });
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "channel stop task failed");
            }
        }

        info!("output manager stopped");
    }

    /// Channels whose production loop was started
    pub fn channel_count(&self) -> usize {
        self.channels()
            .iter()
            .filter(|c| c.state() != ChannelState::Error)
            .count()
    }

    /// Snapshot of every channel keyed by device
    pub fn channel_infos(&self) -> BTreeMap<String, ChannelInfo> {
        self.channels()
            .iter()
            .map(|c| (c.device().to_string(), c.info()))
            .collect()
    }

    pub fn stats(&self) -> BTreeMap<String, ChannelStats> {
        self.channels()
            .iter()
            .map(|c| (c.device().to_string(), c.stats()))
            .collect()
    }

    pub fn totals(&self) -> Totals {
        let channels = self.channels();
        channels.iter().fold(
            Totals {
                channels: channels.len(),
                ..Totals::default()
            },
            |mut acc, c| {
                let s = c.stats();
                acc.records_sent += s.records_sent;
                acc.bytes_sent += s.bytes_sent;
                acc.errors += s.errors;
                acc
            },
        )
    }

    /// Newest `limit` records sent on `device`, newest first
    pub fn recent_records(&self, device: &str, limit: usize) -> Option<Vec<SentRecord>> {
        self.channel(device).map(|c| c.recent_records(limit))
    }

    pub fn channel(&self, device: &str) -> Option<Arc<Channel>> {
        self.channels().into_iter().find(|c| c.device() == device)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }
}
