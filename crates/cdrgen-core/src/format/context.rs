//! Generation Context
//!
//! Mutable synthesis state for one generator. Each context owns its own
//! random source, so channels never share randomness. Reference pools are
//! fixed at construction.

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::time::Duration;

/// First call number handed out is `CALL_COUNTER_BASE + 1`
pub const CALL_COUNTER_BASE: u64 = 10_000_000;

pub const DEFAULT_PSAP_NAME: &str = "Default PSAP";
pub const DEFAULT_MIN_DURATION_SEC: u32 = 30;
pub const DEFAULT_MAX_DURATION_SEC: u32 = 300;

/// A call taker position operator
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// A geographic location used for ALI data
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub address: String,
    pub city: String,
    pub state: String,
    pub township: String,
    pub esn: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// A phone carrier
#[derive(Debug, Clone, PartialEq)]
pub struct Carrier {
    /// Short code, e.g. "VZW"
    pub code: String,
    pub name: String,
    /// Class of service, e.g. "WPH2" (wireless phase 2)
    pub class: String,
}

fn agent(id: &str, name: &str, role: &str) -> Agent {
    Agent {
        id: id.to_string(),
        name: name.to_string(),
        role: role.to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
fn location(
    address: &str,
    city: &str,
    township: &str,
    esn: &str,
    latitude: f64,
    longitude: f64,
    altitude: f64,
) -> Location {
    Location {
        address: address.to_string(),
        city: city.to_string(),
        state: "NE".to_string(),
        township: township.to_string(),
        esn: esn.to_string(),
        latitude,
        longitude,
        altitude,
    }
}

fn carrier(code: &str, name: &str) -> Carrier {
    Carrier {
        code: code.to_string(),
        name: name.to_string(),
        class: "WPH2".to_string(),
    }
}

static DEFAULT_AGENTS: Lazy<Vec<Agent>> = Lazy::new(|| {
    vec![
        agent("10001", "John Smith", "CALL TAKER"),
        agent("10002", "Jane Doe", "CALL TAKER"),
        agent("10003", "Mike Johnson", "CALL TAKER"),
        agent("10004", "Sarah Williams", "CALL TAKER"),
        agent("10005", "David Brown", "DISPATCHER"),
        agent("10006", "Emily Davis", "DISPATCHER"),
        agent("10007", "Chris Wilson", "CALL TAKER"),
        agent("10008", "Amanda Miller", "CALL TAKER"),
        agent("10009", "Robert Taylor", "SUPERVISOR"),
        agent("10010", "Lisa Anderson", "CALL TAKER"),
    ]
});

static DEFAULT_LOCATIONS: Lazy<Vec<Location>> = Lazy::new(|| {
    vec![
        location("123 Main St", "Lincoln", "Lancaster", "123456", 40.8136, -96.7026, 357.0),
        location("456 Oak Ave", "Omaha", "Douglas", "234567", 41.2565, -95.9345, 332.0),
        location("789 Elm Blvd", "Bellevue", "Sarpy", "345678", 41.1544, -95.9146, 305.0),
        location("321 Pine Rd", "Grand Island", "Hall", "456789", 40.9264, -98.3420, 566.0),
        location("654 Cedar Ln", "Kearney", "Buffalo", "567890", 40.6993, -99.0817, 652.0),
        location("987 Maple Dr", "Fremont", "Dodge", "678901", 41.4333, -96.4981, 373.0),
        location("147 Birch Way", "Hastings", "Adams", "789012", 40.5861, -98.3884, 595.0),
        location("258 Walnut Ct", "Norfolk", "Madison", "890123", 42.0283, -97.4170, 476.0),
        location("369 Spruce Pl", "Columbus", "Platte", "901234", 41.4297, -97.3684, 436.0),
        location("480 Ash St", "Papillion", "Sarpy", "012345", 41.1544, -96.0419, 329.0),
    ]
});

static DEFAULT_CARRIERS: Lazy<Vec<Carrier>> = Lazy::new(|| {
    vec![
        carrier("VZW", "VERIZON"),
        carrier("TMOB", "T-MOBILE USA, INC."),
        carrier("ATTMO", "AT&T Mobility"),
        carrier("SPRINT", "SPRINT"),
        carrier("USCC", "US CELLULAR"),
    ]
});

/// Agent pool of exactly `count` agents: the default roster, truncated or
/// extended with generated call takers. `0` keeps the default roster.
fn agent_pool(count: usize) -> Vec<Agent> {
    if count == 0 {
        return DEFAULT_AGENTS.clone();
    }
    (0..count)
        .map(|i| match DEFAULT_AGENTS.get(i) {
            Some(a) => a.clone(),
            None => Agent {
                id: format!("{}", 10_001 + i),
                name: format!("Agent {:03}", i + 1),
                role: "CALL TAKER".to_string(),
            },
        })
        .collect()
}

/// Synthesis state owned by exactly one generator
pub struct GenerationContext {
    pub system_id: String,
    pub psap_name: String,
    /// Baseline clock for relative timestamps inside a record
    pub current_time: DateTime<Local>,
    pub min_duration_sec: u32,
    pub max_duration_sec: u32,
    /// Whether formats with a secondary agent block may emit it
    pub include_agent_events: bool,
    agent_pool: Vec<Agent>,
    location_pool: Vec<Location>,
    carrier_pool: Vec<Carrier>,
    call_counter: u64,
    rng: StdRng,
}

impl GenerationContext {
    /// Fresh context with default pools and an OS-seeded random source
    pub fn new(system_id: impl Into<String>, psap_name: impl Into<String>) -> Self {
        Self::with_rng(system_id, psap_name, StdRng::from_os_rng())
    }

    /// Fresh context with a reproducible random source
    pub fn seeded(system_id: impl Into<String>, psap_name: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(system_id, psap_name, StdRng::seed_from_u64(seed))
    }

    fn with_rng(system_id: impl Into<String>, psap_name: impl Into<String>, rng: StdRng) -> Self {
        Self {
            system_id: system_id.into(),
            psap_name: psap_name.into(),
            current_time: Local::now(),
            min_duration_sec: DEFAULT_MIN_DURATION_SEC,
            max_duration_sec: DEFAULT_MAX_DURATION_SEC,
            include_agent_events: true,
            agent_pool: DEFAULT_AGENTS.clone(),
            location_pool: DEFAULT_LOCATIONS.clone(),
            carrier_pool: DEFAULT_CARRIERS.clone(),
            call_counter: CALL_COUNTER_BASE,
            rng,
        }
    }

    pub fn with_agent_count(mut self, count: usize) -> Self {
        self.agent_pool = agent_pool(count);
        self
    }

    pub fn with_duration_range(mut self, min_sec: u32, max_sec: u32) -> Self {
        self.min_duration_sec = min_sec;
        self.max_duration_sec = max_sec;
        self
    }

    pub fn with_agent_events(mut self, include: bool) -> Self {
        self.include_agent_events = include;
        self
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agent_pool
    }

    pub fn locations(&self) -> &[Location] {
        &self.location_pool
    }

    pub fn carriers(&self) -> &[Carrier] {
        &self.carrier_pool
    }

    /// Last call number handed out
    pub fn call_counter(&self) -> u64 {
        self.call_counter
    }

    /// Advance the call counter and return the new value
    pub fn next_call_number(&mut self) -> u64 {
        self.call_counter += 1;
        self.call_counter
    }

    pub fn random_agent(&mut self) -> Agent {
        let idx = self.rng.random_range(0..self.agent_pool.len());
        self.agent_pool[idx].clone()
    }

    pub fn random_location(&mut self) -> Location {
        let idx = self.rng.random_range(0..self.location_pool.len());
        self.location_pool[idx].clone()
    }

    pub fn random_carrier(&mut self) -> Carrier {
        let idx = self.rng.random_range(0..self.carrier_pool.len());
        self.carrier_pool[idx].clone()
    }

    /// Ten digit NANP-looking number, area code and exchange in 200..=999
    pub fn random_phone_number(&mut self) -> String {
        let area = self.rng.random_range(200..1000);
        let exchange = self.rng.random_range(200..1000);
        let subscriber = self.rng.random_range(0..10_000);
        format!("{:03}{:03}{:04}", area, exchange, subscriber)
    }

    /// Uniform whole-second duration in `[min, max]`; `min` when `max <= min`
    pub fn random_duration(&mut self) -> Duration {
        let (min, max) = (self.min_duration_sec, self.max_duration_sec);
        if max <= min {
            return Duration::from_secs(u64::from(min));
        }
        Duration::from_secs(u64::from(self.rng.random_range(min..=max)))
    }

    /// The context's private random source, for format-specific draws
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Random string of `len` characters drawn from `alphabet`
    pub fn random_string(&mut self, alphabet: &[u8], len: usize) -> String {
        (0..len)
            .map(|_| *alphabet.choose(&mut self.rng).unwrap_or(&b'0') as char)
            .collect()
    }
}
