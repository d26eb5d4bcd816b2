//! CDR Formats
//!
//! The record model and the pluggable encoding contract:
//! - **context**: mutable synthesis state owned by one generator
//! - **registry**: name -> format lookup, populated once at startup
//! - **sample**: shared reader for captured `(sysident, message)` logs
//! - **vesta**: fixed-width textual blocks closed by a separator line
//! - **viper**: `BEGIN`/`END` marker-delimited CDR and agent blocks

pub mod context;
pub mod registry;
pub mod sample;
pub mod vesta;
pub mod viper;

use crate::error::FormatError;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::Read;
use std::time::Duration;

pub use context::{Agent, Carrier, GenerationContext, Location};
pub use registry::FormatRegistry;
pub use vesta::VestaFormat;
pub use viper::ViperFormat;

/// Terminator appended to every line on the wire
pub const LINE_TERMINATOR: &[u8] = b"\n";

/// Block kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Call detail block
    Cdr,
    /// Agent status block
    Agent,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Cdr => "cdr",
            RecordKind::Agent => "agent",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logically atomic output unit (a call or an agent event)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdrRecord {
    /// Protocol call identifier; empty when none could be extracted
    pub id: String,
    pub kind: RecordKind,
    /// When the record occurred
    pub timestamp: DateTime<Local>,
    /// Call length for call-detail kinds
    pub duration: Option<Duration>,
    /// Wire payload, one entry per line, in output order
    pub lines: Vec<String>,
}

impl CdrRecord {
    pub fn new(id: impl Into<String>, kind: RecordKind, lines: Vec<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp: Local::now(),
            duration: None,
            lines,
        }
    }

    /// Wire bytes: every line followed by [`LINE_TERMINATOR`], in order
    pub fn render(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.rendered_len());
        for line in &self.lines {
            buf.put_slice(line.as_bytes());
            buf.put_slice(LINE_TERMINATOR);
        }
        buf.freeze()
    }

    pub fn rendered_len(&self) -> usize {
        self.lines
            .iter()
            .map(|l| l.len() + LINE_TERMINATOR.len())
            .sum()
    }

    /// Last line of the block, if any
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

/// Contract every CDR encoding implements.
///
/// Formats are stateless: all mutable synthesis state lives in the
/// [`GenerationContext`] passed to [`CdrFormat::generate_record`].
pub trait CdrFormat: Send + Sync {
    /// Unique, case-insensitive identifier (e.g. "vesta")
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Parse a captured sample log into ordered record blocks (replay mode)
    fn parse_records(&self, reader: &mut dyn Read) -> Result<Vec<CdrRecord>, FormatError>;

    /// Synthesize one new record (synthetic mode)
    fn generate_record(&self, ctx: &mut GenerationContext) -> Result<CdrRecord, FormatError>;
}

/// `HH:MM:SS.mmm` offset used for relative event timestamps
pub(crate) fn format_offset(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
