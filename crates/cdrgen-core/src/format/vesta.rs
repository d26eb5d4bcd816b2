//! Vesta 911 call handling format
//!
//! Vesta emits one fixed-width text block per call: a site header, a
//! single wide line carrying every call event, an ALI section, the SIP
//! call identifiers, and a literal separator line that closes the block.

use super::sample::read_messages;
use super::{CdrFormat, CdrRecord, GenerationContext, RecordKind};
use crate::error::FormatError;
use chrono::{DateTime, Local, TimeDelta};
use rand::Rng;
use std::io::Read;

/// Line that terminates every Vesta block
pub const VESTA_SEPARATOR: &str =
    "---   ---   ---   ---   ---   ---   ---   ---   ---   ---   ---   ---   ---";

pub const ALI_MARKER: &str = "ALI Information";
pub const SIP_MARKER: &str = "SIP Call IDs";

/// Site code printed ahead of the PSAP name
const SITE_CODE: u32 = 3001;
const QUEUE_NAME: &str = "DCD-911";

const EVENT_TIME_FORMAT: &str = "%b/%d/%y %H:%M:%S EST";
const ALI_DATE_FORMAT: &str = "%m/%d/%Y";

const SIP_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const LOCATION_TECHNOLOGIES: [&str; 4] = [
    "Handset AGPS",
    "Handset GPS",
    "Hybrid Device Based",
    "Hybrid Unspecified",
];

/// Vesta 911 call handling system
pub struct VestaFormat;

impl CdrFormat for VestaFormat {
    fn name(&self) -> &str {
        "vesta"
    }

    fn description(&self) -> &str {
        "Vesta 911 Call Handling System"
    }

    fn parse_records(&self, reader: &mut dyn Read) -> Result<Vec<CdrRecord>, FormatError> {
        parse_vesta_records(reader)
    }

    fn generate_record(&self, ctx: &mut GenerationContext) -> Result<CdrRecord, FormatError> {
        Ok(generate_vesta_record(ctx))
    }
}

// ============================================================================
// Replay parsing
// ============================================================================

/// Split a captured Vesta log into call blocks
pub fn parse_vesta_records(reader: &mut dyn Read) -> Result<Vec<CdrRecord>, FormatError> {
    let messages = read_messages(reader)?;

    let mut records = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut call_id: Option<String> = None;

    for msg in messages {
        if msg.message == VESTA_SEPARATOR {
            if !lines.is_empty() {
                lines.push(msg.message);
                let id = call_id.take().unwrap_or_default();
                records.push(CdrRecord::new(id, RecordKind::Cdr, std::mem::take(&mut lines)));
            }
        } else if msg.message.is_empty() {
            continue;
        } else {
            if call_id.is_none() {
                call_id = extract_call_id(&msg.message);
            }
            lines.push(msg.message);
        }
    }

    // A final block may be missing its separator
    if !lines.is_empty() {
        records.push(CdrRecord::new(
            call_id.unwrap_or_default(),
            RecordKind::Cdr,
            lines,
        ));
    }

    Ok(records)
}

/// Pull the number out of a `Call <number> ... Arrives On` event line
fn extract_call_id(line: &str) -> Option<String> {
    if !line.contains("Call ") || !line.contains("Arrives On") {
        return None;
    }
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "Call")?;
    tokens.next().map(str::to_string)
}

// ============================================================================
// Synthetic generation
// ============================================================================

/// Builder for space-padded columns
struct FixedLine(String);

impl FixedLine {
    fn new() -> Self {
        Self(String::with_capacity(1024))
    }

    /// Append `text` padded to `width`; over-long text still gets one space
    fn field(&mut self, text: &str, width: usize) -> &mut Self {
        self.0.push_str(text);
        let pad = width.saturating_sub(text.len()).max(1);
        self.0.extend(std::iter::repeat_n(' ', pad));
        self
    }

    fn finish(&mut self) -> String {
        std::mem::take(&mut self.0).trim_end().to_string()
    }
}

fn dashed_phone(phone: &str) -> String {
    if phone.len() == 10 {
        format!("{}-{}-{}", &phone[..3], &phone[3..6], &phone[6..])
    } else {
        phone.to_string()
    }
}

fn offset(t: DateTime<Local>, secs: i64) -> DateTime<Local> {
    t + TimeDelta::seconds(secs)
}

/// Synthesize one Vesta call block
pub fn generate_vesta_record(ctx: &mut GenerationContext) -> CdrRecord {
    let call_id = ctx.next_call_number().to_string();
    let ani = ctx.random_phone_number();
    let cpn = ctx.random_phone_number();
    let location = ctx.random_location();
    let carrier = ctx.random_carrier();

    let now = ctx.current_time;
    let duration = ctx.random_duration();
    let end = now + TimeDelta::from_std(duration).unwrap_or_else(|_| TimeDelta::zero());

    let position = format!("DCD{:02}", ctx.rng().random_range(1..=10));
    let trunk = format!("DCDEIM911{}", ctx.rng().random_range(1..=5));
    let call = format!("Call {}", call_id);
    let ts = |t: DateTime<Local>| t.format(EVENT_TIME_FORMAT).to_string();

    let events = FixedLine::new()
        .field("ANI", 16)
        .field(&ani, 56)
        .field("CPN", 16)
        .field(&cpn, 136)
        .field(&call, 16)
        .field("Arrives On", 25)
        .field(&trunk, 16)
        .field(&ts(now), 24)
        .field(&trunk, 16)
        .field("Goes Off Hook", 41)
        .field(&ts(now), 24)
        .field(&trunk, 16)
        .field("Queue In", 25)
        .field(QUEUE_NAME, 16)
        .field(&ts(now), 24)
        .field(&call, 16)
        .field("Cellular Call", 41)
        .field(&ts(offset(now, 2)), 24)
        .field(&call, 16)
        .field(&format!("CPN: {}", cpn), 41)
        .field(&ts(offset(now, 2)), 24)
        .field(QUEUE_NAME, 16)
        .field("Queue Out (Answered)", 25)
        .field(&position, 16)
        .field(&ts(offset(now, 4)), 24)
        .field(&position, 16)
        .field("Picks Up", 41)
        .field(&ts(offset(now, 4)), 24)
        .field(&trunk, 16)
        .field("Is Released", 41)
        .field(&ts(end), 24)
        .field(&position, 16)
        .field("Hangs Up", 25)
        .field(&call, 16)
        .field(&ts(end), 24)
        .field(&position, 16)
        .field("Releases", 25)
        .field(&call, 16)
        .field(&ts(end), 24)
        .field(&call, 16)
        .field("Finishes", 41)
        .field(&ts(end), 24)
        .finish();

    let technology = LOCATION_TECHNOLOGIES[ctx.rng().random_range(0..LOCATION_TECHNOLOGIES.len())];
    let uncertainty = 4.64 + ctx.rng().random::<f64>() * 50.0;
    let altitude_error = ctx.rng().random::<f64>() * 10.0;
    let ali_time = format!(
        "{}.{}EST",
        now.format("%H:%M:%S"),
        now.timestamp_subsec_millis() / 100
    );
    let city: String = location.city.to_uppercase().chars().take(20).collect();

    let ali = FixedLine::new()
        .field(&dashed_phone(&ani), 15)
        .field(&format!("CBN {}", dashed_phone(&cpn)), 20)
        .field(&carrier.code, 7)
        .field(&now.format(ALI_DATE_FORMAT).to_string(), 12)
        .field(&ali_time, 20)
        .field(&format!("{}{}", carrier.class, carrier.name), 40)
        .field(&format!("ESN {}", location.esn), 18)
        .field(&location.address.to_uppercase(), 52)
        .field("Township:", 40)
        .field(&location.township.to_uppercase(), 30)
        .field(&format!("{}Comments:", location.state), 40)
        .field(&city, 57)
        .field(&format!("Updated PositionX={:+010.6}", location.longitude), 30)
        .field("90% sure caller", 1)
        .field(&format!("Y={:+010.6}", location.latitude), 18)
        .field(&format!("within {:.2} meters", uncertainty), 1)
        .field(
            &format!("Z={:03}+/-{:.12}", location.altitude as i64, altitude_error),
            58,
        )
        .field("LAW:", 40)
        .field("FIR:", 40)
        .field("EMS:", 40)
        .field(&format!("LocTechn:{}", technology), 31)
        .field("MIN:", 15)
        .field("IMIN:", 25)
        .field(&format!("Tabular/Legacy route {}", location.city.to_uppercase()), 1)
        .finish();

    let sip_call_id = format!("{}..", ctx.random_string(SIP_ALPHABET, 22));

    let lines = vec![
        format!("{} {}", SITE_CODE, ctx.psap_name),
        events,
        ALI_MARKER.to_string(),
        ali,
        SIP_MARKER.to_string(),
        sip_call_id,
        VESTA_SEPARATOR.to_string(),
    ];

    CdrRecord {
        id: call_id,
        kind: RecordKind::Cdr,
        timestamp: now,
        duration: Some(duration),
        lines,
    }
}
