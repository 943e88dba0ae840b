#![cfg_attr(not(test), no_std)]

//! Yolka WiFi LED Strip Controller Library
//!
//! This library drives a serial-attached AT-command WiFi modem, serves the
//! Yolka binary control protocol to network clients over it and paints a
//! WS2812 strip between protocol events. Everything here is target
//! independent; the board bindings live in the binaries behind the `esp32c3`
//! feature.

use core::fmt;

pub mod at_parser;
pub mod boot;
pub mod cipher;
pub mod dispatcher;
pub mod effects;
pub mod led_control;
pub mod modem;
pub mod params;
pub mod power;
pub mod ring_buffer;
pub mod runner;
pub mod state_machine;
pub mod storage;

#[cfg(test)]
mod mock;

/// Project version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const fn parse_decimal(s: &str) -> u16 {
    let bytes = s.as_bytes();
    let mut value = 0u16;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u16;
        i += 1;
    }
    value
}

/// Default configuration constants
pub mod config {
    use super::parse_decimal;

    /// Firmware version reported to clients
    pub const VERSION_MAJOR: u8 = parse_decimal(env!("CARGO_PKG_VERSION_MAJOR")) as u8;
    pub const VERSION_MINOR: u8 = parse_decimal(env!("CARGO_PKG_VERSION_MINOR")) as u8;
    pub const BUILD_NUMBER: u16 = parse_decimal(env!("CARGO_PKG_VERSION_PATCH"));

    /// Build date as (day, month, year), stamped by the build script
    pub const BUILD_DATE: (u8, u8, u16) = (
        parse_decimal(env!("YOLKA_BUILD_DAY")) as u8,
        parse_decimal(env!("YOLKA_BUILD_MONTH")) as u8,
        parse_decimal(env!("YOLKA_BUILD_YEAR")),
    );

    /// Greeting sent to every client that connects
    pub const HELLO: &str = concat!(
        "WiFi Yolka ",
        env!("CARGO_PKG_VERSION_MAJOR"),
        ".",
        env!("CARGO_PKG_VERSION_MINOR")
    );

    /// Animation tick rate
    pub const TICKS_PER_SECOND: u16 = 50;

    /// Default LED data GPIO pin
    pub const LED_DATA_PIN: u8 = 4;

    /// Maximum supported LEDs per strip
    pub const MAX_LEDS: usize = 512;

    /// Default strip length
    pub const DEFAULT_LED_COUNT: u16 = 50;

    /// Default TCP port the modem listens on
    pub const DEFAULT_PORT: u16 = 3388;

    /// Access point defaults, used until a client stores its own values
    /// Read from environment variables at compile time
    pub const DEFAULT_AP_SSID: &str = env!("YOLKA_AP_SSID");
    pub const DEFAULT_AP_PASSWORD: &str = env!("YOLKA_AP_PASSWORD");
    pub const DEFAULT_AP_IP: &str = "192.168.10.1";
    pub const DEFAULT_AP_GATEWAY: &str = "192.168.10.1";
    pub const DEFAULT_AP_MASK: &str = "255.255.255.0";
    pub const DEFAULT_AP_CHANNEL: u8 = 6;

    /// Effect scheduling, in seconds
    pub const DEFAULT_EFFECT_TIME: u8 = 20;
    pub const DEFAULT_EFFECT_TIME_ADD: u8 = 20;

    /// Sensor calibration
    pub const DEFAULT_VOLTAGE_ADJUST: u16 = 660;
    pub const DEFAULT_TEMP_ADJUST: u8 = 128;

    /// Ticks a raw frame push keeps other clients of equal priority out
    pub const IMMEDIATE_CLAIM_TICKS: u8 = 25;

    /// Modem serial speeds
    pub const MODEM_DEFAULT_BAUD: u32 = 115_200;
    pub const MODEM_WORK_BAUD: u32 = 1_000_000;

    /// Marker written by the firmware once it booted fine
    pub const UPDATE_MARKER: u8 = 0x83;

    /// Flash offset of the parameter store (the `nvs` partition of the
    /// default partition table)
    pub const STORE_FLASH_OFFSET: u32 = 0x9000;
}

/// Error types for the Yolka board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// Modem is busy provisioning or another send is in flight
    ModemBusy,
    /// LED strip output error
    LedError,
    /// Malformed or out-of-range client request
    ProtocolError,
    /// Parameter validation failure
    Param(ParamError),
}

/// Reasons a parameter request is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// Ordinal outside the parameter table
    UnknownOrdinal,
    /// Declared length does not fit the packet or the parameter type
    BadLength,
    /// Numeric value outside the declared bounds
    OutOfRange,
    /// String starts with the unset marker or contains a terminator
    BadString,
}

impl From<ParamError> for BoardError {
    fn from(err: ParamError) -> Self {
        BoardError::Param(err)
    }
}

impl fmt::Display for BoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::ModemBusy => f.write_str("modem not ready"),
            BoardError::LedError => f.write_str("strip output failed"),
            BoardError::ProtocolError => f.write_str("malformed request"),
            BoardError::Param(err) => write!(f, "parameter rejected: {}", err),
        }
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::UnknownOrdinal => f.write_str("unknown ordinal"),
            ParamError::BadLength => f.write_str("bad length"),
            ParamError::OutOfRange => f.write_str("out of range"),
            ParamError::BadString => f.write_str("bad string"),
        }
    }
}
