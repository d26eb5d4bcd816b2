//! Serial line endpoints
//!
//! `/dev/tty*`, `/dev/cu.*` and `COM*` devices are opened as real serial
//! ports with the port's baud rate, data bits, parity and stop bits.

use super::StreamTransport;
use crate::config::PortConfig;
use crate::error::TransportError;
use std::time::Duration;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Parity names accepted in the configuration
pub const VALID_PARITIES: [&str; 3] = ["none", "odd", "even"];

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// True for device names that denote a serial line
pub fn is_serial_device(device: &str) -> bool {
    device.starts_with("/dev/tty")
        || device.starts_with("/dev/cu.")
        || device.to_ascii_uppercase().starts_with("COM")
}

/// Line settings resolved from a port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineSettings {
    pub fn from_port(port: &PortConfig) -> Result<Self, String> {
        Ok(Self {
            baud_rate: port.baud_rate,
            data_bits: data_bits(port.data_bits)?,
            parity: parity(&port.parity)?,
            stop_bits: stop_bits(port.stop_bits)?,
        })
    }
}

pub fn data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(format!("unsupported data bits: {} (must be 5-8)", other)),
    }
}

pub fn parity(name: &str) -> Result<Parity, String> {
    match name.to_lowercase().as_str() {
        "" | "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        other => Err(format!(
            "unsupported parity: {} (must be one of {})",
            other,
            VALID_PARITIES.join(", ")
        )),
    }
}

pub fn stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(format!("unsupported stop bits: {} (must be 1 or 2)", other)),
    }
}

/// Open `port.device` as a serial line with its configured settings
pub fn open(port: &PortConfig) -> Result<StreamTransport<SerialStream>, TransportError> {
    let identity = port.device.clone();
    let settings = LineSettings::from_port(port).map_err(|message| TransportError::InvalidSettings {
        identity: identity.clone(),
        message,
    })?;

    let stream = tokio_serial::new(port.device.as_str(), settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .timeout(WRITE_TIMEOUT)
        .open_native_async()
        .map_err(|e| TransportError::Open {
            identity: identity.clone(),
            source: e.into(),
        })?;

    Ok(StreamTransport::new(identity, stream))
}
