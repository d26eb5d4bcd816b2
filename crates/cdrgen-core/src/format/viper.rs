//! Viper VoIP 911 call handling format
//!
//! Viper frames every record between literal markers. Two block kinds
//! share the stream:
//!
//! ```text
//! ===== CDR BEGIN : 01/02/06 15:04:05.000 =====     ===== AGENT BEGIN : ... =====
//! 00:00:00.000 [VoIP] Incoming Call(ID: ...)         ON CALL (ID: ...)
//! ...                                                ...
//! ===== CDR END =====                                ===== AGENT END =====
//! ```

use super::sample::read_messages;
use super::{CdrFormat, CdrRecord, GenerationContext, RecordKind, format_offset};
use crate::error::FormatError;
use chrono::{DateTime, Local};
use rand::Rng;
use std::io::Read;
use std::time::Duration;

/// Prefix of the line opening a CDR block
pub const CDR_BEGIN: &str = "===== CDR BEGIN :";
/// Line closing a CDR block
pub const CDR_END: &str = "===== CDR END =====";
/// Prefix of the line opening an agent block
pub const AGENT_BEGIN: &str = "===== AGENT BEGIN :";
/// Line closing an agent block
pub const AGENT_END: &str = "===== AGENT END =====";

const CALL_ID_MARKER: &str = "Incoming Call(ID:";
const BEGIN_TIME_FORMAT: &str = "%m/%d/%y %H:%M:%S%.3f";
const ALI_TIME_FORMAT: &str = "%H:%M  %m/%d";

/// Chance that a synthesized call is followed by an agent status block
pub const AGENT_BLOCK_PROBABILITY: f64 = 0.7;

const SECTORS: [&str; 8] = ["N", "S", "E", "W", "NE", "NW", "SE", "SW"];
const EXTERNAL_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Viper VoIP 911 call handling system
pub struct ViperFormat;

impl CdrFormat for ViperFormat {
    fn name(&self) -> &str {
        "viper"
    }

    fn description(&self) -> &str {
        "Viper VoIP 911 Call Handling System"
    }

    fn parse_records(&self, reader: &mut dyn Read) -> Result<Vec<CdrRecord>, FormatError> {
        parse_viper_records(reader)
    }

    fn generate_record(&self, ctx: &mut GenerationContext) -> Result<CdrRecord, FormatError> {
        Ok(generate_viper_record(ctx))
    }
}

// ============================================================================
// Replay parsing
// ============================================================================

/// Block currently being accumulated
struct OpenBlock {
    kind: RecordKind,
    id: Option<String>,
    lines: Vec<String>,
}

impl OpenBlock {
    fn begin(kind: RecordKind, marker: &str) -> Self {
        Self {
            kind,
            id: None,
            lines: vec![marker.to_string()],
        }
    }

    fn into_record(self) -> CdrRecord {
        CdrRecord::new(self.id.unwrap_or_default(), self.kind, self.lines)
    }
}

/// Split a captured Viper log into CDR and agent blocks
pub fn parse_viper_records(reader: &mut dyn Read) -> Result<Vec<CdrRecord>, FormatError> {
    let messages = read_messages(reader)?;

    let mut records = Vec::new();
    let mut open: Option<OpenBlock> = None;

    for msg in messages {
        let trimmed = msg.message.trim();

        let begins = if trimmed.starts_with(CDR_BEGIN) {
            Some(RecordKind::Cdr)
        } else if trimmed.starts_with(AGENT_BEGIN) {
            Some(RecordKind::Agent)
        } else {
            None
        };

        if let Some(kind) = begins {
            // A new BEGIN flushes a block that never saw its END
            if let Some(prev) = open.take() {
                records.push(prev.into_record());
            }
            open = Some(OpenBlock::begin(kind, trimmed));
        } else if trimmed == CDR_END || trimmed == AGENT_END {
            if let Some(mut block) = open.take() {
                block.lines.push(trimmed.to_string());
                records.push(block.into_record());
            }
        } else if let Some(block) = open.as_mut() {
            if trimmed.is_empty() {
                continue;
            }
            if block.id.is_none() {
                block.id = extract_call_id(&msg.message);
            }
            block.lines.push(msg.message);
        }
    }

    if let Some(block) = open {
        records.push(block.into_record());
    }

    Ok(records)
}

/// Text between `Incoming Call(ID:` and the following `)`
fn extract_call_id(line: &str) -> Option<String> {
    let start = line.find(CALL_ID_MARKER)? + CALL_ID_MARKER.len();
    let end = line[start..].find(')')?;
    let id = line[start..start + end].trim();
    (!id.is_empty()).then(|| id.to_string())
}

// ============================================================================
// Synthetic generation
// ============================================================================

/// Synthesize one Viper call, optionally followed by an agent block
pub fn generate_viper_record(ctx: &mut GenerationContext) -> CdrRecord {
    let call_number = ctx.next_call_number();
    let ani = ctx.random_phone_number();
    let location = ctx.random_location();
    let carrier = ctx.random_carrier();

    let now = ctx.current_time;
    let duration = ctx.random_duration();

    let trunk_number = ctx.rng().random_range(1..=10);
    let trunk = format!("SIP{:03}", trunk_number);
    let call_id = format!(
        "911{:03}-{:05}-{}",
        trunk_number,
        call_number % 100_000,
        now.format("%Y%m%d%H%M%S")
    );
    let position = ctx.rng().random_range(1..=20);
    let station = 2000 + position;
    let queue = 6000 + ctx.rng().random_range(1..=10);
    let external_id = ctx.random_string(EXTERNAL_ID_ALPHABET, 20);

    let at = |ms: u64| format_offset(Duration::from_millis(ms));
    let released = format_offset(duration);
    let completed = format_offset(duration + Duration::from_millis(73));

    let mut lines = vec![
        format!("{} {} =====", CDR_BEGIN, now.format(BEGIN_TIME_FORMAT)),
        format!("{} [  TS] SYSTEM ID = {}", at(0), ctx.system_id.to_lowercase()),
        format!(
            "{} [VoIP] {} {}) Offered on Trunk {}/{}-{}",
            at(0),
            CALL_ID_MARKER,
            call_id,
            trunk,
            ani,
            trunk
        ),
        format!("{} [  TS] Trunk Group = 911", at(0)),
        format!("{} [VoIP] Call Presented", at(0)),
        format!("{} [VoIP] ANI: (40)'{}' [VALID] PseudoANI: '' [NONE]", at(0), ani),
        format!("{} [  TS] Initial ALI Request for ANI : {}", at(0), ani),
        format!(
            "{} [VoIP] External Call-Identifier <urn:nena:uid:callid:{}:inbcf.indigital.net>",
            at(75),
            external_id
        ),
        format!("{} [VoIP] Call Connected", at(104)),
        format!("{} [VoIP] Routing call QUEUE = {}", at(108), queue),
        format!("{} [ PAS] Initial ALI Response received / ALI TYPE = 1", at(1_696)),
        format!("{} [VoIP] Caller Disconnected Before Supervision", released),
        format!("{} [VoIP] Call Terminated", completed),
        format!("{} [  TS] Call Completed", completed),
    ];

    lines.extend(ali_block(ctx, &ani, &location, &carrier, now, position));
    lines.push(String::new());
    lines.push(CDR_END.to_string());

    let with_agent = ctx.include_agent_events && ctx.rng().random_bool(AGENT_BLOCK_PROBABILITY);
    if with_agent {
        lines.push(String::new());
        lines.extend(agent_block(ctx, &call_id, position, station, now));
    }

    CdrRecord {
        id: call_id,
        kind: RecordKind::Cdr,
        timestamp: now,
        duration: Some(duration),
        lines,
    }
}

fn ali_block(
    ctx: &mut GenerationContext,
    ani: &str,
    location: &super::Location,
    carrier: &super::Carrier,
    now: DateTime<Local>,
    position: u32,
) -> Vec<String> {
    let sector = SECTORS[ctx.rng().random_range(0..SECTORS.len())];
    let psap = ctx.rng().random_range(1..=50);
    let uncertainty = 4.64 + ctx.rng().random::<f64>() * 50.0;
    let short_address: String = location.address.chars().take(16).collect();

    vec![
        String::new(),
        "=====   Initial ALI   ====".to_string(),
        String::new(),
        format!("({}) {}   ", &ani[..3], now.format(ALI_TIME_FORMAT)),
        format!("{}                   ", carrier.name),
        format!("{:<16}", short_address),
        format!("{} - {} SECTOR     ", location.address.to_uppercase(), sector),
        String::new(),
        " ".repeat(30),
        format!("{:<24}          ESN {}", location.city, location.esn),
        format!(
            "CO={} PSAP {:02} POS# {:02}   {}",
            carrier.code, psap, position, carrier.class
        ),
        " ".repeat(32),
        " ".repeat(6),
        format!("P#({}){}", &ani[..3], &ani[3..]),
        format!(" UNC={:.2}     COP=90%  Initia", uncertainty),
        format!("+{:010.6} -{:010.6}", location.latitude, -location.longitude),
    ]
}

fn agent_block(
    ctx: &mut GenerationContext,
    call_id: &str,
    position: u32,
    station: u32,
    now: DateTime<Local>,
) -> Vec<String> {
    let agent = ctx.random_agent();
    let route = 6000 + ctx.rng().random_range(1..=10);
    let psap_id = ctx.rng().random_range(1000..10_000);

    vec![
        format!("{} {} =====", AGENT_BEGIN, now.format(BEGIN_TIME_FORMAT)),
        format!("ON CALL (ID: {})", call_id),
        "DIRECTION = incoming".to_string(),
        format!("ROUTE = Q{}", route),
        "VIPERNODE = PRIMARY".to_string(),
        format!("AGENT = {}/{} ROLE = {}", agent.name, agent.id, agent.role),
        format!("From  PSAP ID = {} PSAP Name = {}", psap_id, ctx.psap_name),
        format!("POS = {:04} / STN = {}", position, station),
        AGENT_END.to_string(),
    ]
}
