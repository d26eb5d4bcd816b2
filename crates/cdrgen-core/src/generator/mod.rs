//! Record Generator
//!
//! Binds one [`CdrFormat`] to a production mode:
//! - **replay**: cursor over records parsed eagerly from a sample capture
//! - **synthetic**: fresh records from a private [`GenerationContext`]
//!
//! Each channel owns exactly one generator, so no locking is needed here.

pub mod timing;

pub use timing::{RateLimiter, Ticker};

use crate::config::PortConfig;
use crate::error::GeneratorError;
use crate::format::context::DEFAULT_PSAP_NAME;
use crate::format::{CdrFormat, CdrRecord, FormatRegistry, GenerationContext};
use chrono::Local;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// System id used when a synthetic port has no `synthetic` section
pub const DEFAULT_SYSTEM_ID: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Replay,
    Synthetic,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Replay => "replay",
            Mode::Synthetic => "synthetic",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replay" => Ok(Mode::Replay),
            "synthetic" => Ok(Mode::Synthetic),
            _ => Err(GeneratorError::InvalidMode(s.to_string())),
        }
    }
}

/// How many records a generator can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCount {
    Finite(usize),
    Unbounded,
}

enum Source {
    Replay {
        records: Vec<CdrRecord>,
        cursor: usize,
        looping: bool,
    },
    Synthetic {
        ctx: Box<GenerationContext>,
    },
}

pub struct Generator {
    format: Arc<dyn CdrFormat>,
    mode: Mode,
    source: Source,
    calls_per_minute: f64,
    jitter_percent: f64,
}

impl Generator {
    /// Build the generator for one port. Replay sources are loaded and
    /// parsed here, so a bad sample fails construction rather than the
    /// first tick.
    pub fn new(
        registry: &FormatRegistry,
        port: &PortConfig,
        jitter_percent: f64,
    ) -> Result<Self, GeneratorError> {
        let format = registry
            .get(&port.format)
            .map_err(|_| GeneratorError::UnknownFormat(port.format.clone()))?;
        let mode: Mode = port.mode.parse()?;

        let source = match mode {
            Mode::Replay => {
                let path = match port.sample_file.as_deref() {
                    Some(p) if !p.is_empty() => PathBuf::from(p),
                    _ => return Err(GeneratorError::MissingSampleFile),
                };
                let records = load_sample(format.as_ref(), &path)?;
                info!(
                    device = %port.device,
                    format = format.name(),
                    records = records.len(),
                    path = %path.display(),
                    "loaded sample file"
                );
                Source::Replay {
                    records,
                    cursor: 0,
                    looping: port.looping,
                }
            }
            Mode::Synthetic => Source::Synthetic {
                ctx: Box::new(synthetic_context(port)),
            },
        };

        Ok(Self {
            format,
            mode,
            source,
            calls_per_minute: port.calls_per_minute,
            jitter_percent,
        })
    }

    /// Produce the next record.
    ///
    /// Replay without looping fails with [`GeneratorError::EndOfSample`] on
    /// every call after the last record; callers treat that as per-call.
    pub fn next_record(&mut self) -> Result<CdrRecord, GeneratorError> {
        match &mut self.source {
            Source::Replay {
                records,
                cursor,
                looping,
            } => {
                if *cursor >= records.len() {
                    if *looping && !records.is_empty() {
                        debug!(records = records.len(), "replay wrapped to start");
                        *cursor = 0;
                    } else {
                        return Err(GeneratorError::EndOfSample {
                            count: records.len(),
                        });
                    }
                }
                let record = records[*cursor].clone();
                *cursor += 1;
                Ok(record)
            }
            Source::Synthetic { ctx } => {
                ctx.current_time = Local::now();
                self.format
                    .generate_record(ctx)
                    .map_err(GeneratorError::Generation)
            }
        }
    }

    pub fn record_count(&self) -> RecordCount {
        match &self.source {
            Source::Replay { records, .. } => RecordCount::Finite(records.len()),
            Source::Synthetic { .. } => RecordCount::Unbounded,
        }
    }

    pub fn format(&self) -> &Arc<dyn CdrFormat> {
        &self.format
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Fresh pacing state for this generator's rate and jitter
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.calls_per_minute, self.jitter_percent)
    }
}

fn load_sample(format: &dyn CdrFormat, path: &Path) -> Result<Vec<CdrRecord>, GeneratorError> {
    let file = File::open(path).map_err(|source| GeneratorError::SampleFile {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let records = format
        .parse_records(&mut reader)
        .map_err(GeneratorError::Parse)?;

    if records.is_empty() {
        return Err(GeneratorError::NoRecords(path.to_path_buf()));
    }
    Ok(records)
}

fn synthetic_context(port: &PortConfig) -> GenerationContext {
    let Some(synth) = port.synthetic.as_ref() else {
        return GenerationContext::new(DEFAULT_SYSTEM_ID, DEFAULT_PSAP_NAME);
    };

    let ctx = match synth.seed {
        Some(seed) => GenerationContext::seeded(&synth.system_id, &synth.psap_name, seed),
        None => GenerationContext::new(&synth.system_id, &synth.psap_name),
    };
    ctx.with_agent_count(synth.agent_count as usize)
        .with_duration_range(synth.min_duration_sec, synth.max_duration_sec)
        .with_agent_events(synth.include_agent_events)
}
