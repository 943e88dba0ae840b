//! Client-visible parameter table
//!
//! Every persisted setting a client may inspect or change, addressed by a
//! stable ordinal. Numbers are little endian; strings end with a zero byte
//! and the rest of their slot is padded with unset cells.

use heapless::Vec;
use log::{info, warn};

use crate::ParamError;
use crate::config;
use crate::storage::{ByteStore, UNSET, layout};

/// Largest encoded parameter value
pub const VALUE_CAPACITY: usize = 64;

/// Encoded parameter value
pub type Value = Vec<u8, VALUE_CAPACITY>;

/// Storage type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    U8,
    U16,
    Str32,
    Str64,
}

impl ParamKind {
    /// Wire type code; the low nibble is log2 of the slot size
    pub const fn code(self) -> u8 {
        match self {
            ParamKind::U8 => 0x00,
            ParamKind::U16 => 0x01,
            ParamKind::Str32 => 0x85,
            ParamKind::Str64 => 0x86,
        }
    }

    /// Slot size in bytes
    pub const fn size(self) -> usize {
        1 << (self.code() & 0x0F)
    }

    pub const fn is_string(self) -> bool {
        self.code() & 0x80 != 0
    }
}

/// Value reported while the slot is unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    None,
    Number(u16),
    Text(&'static str),
}

/// One entry of the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDesc {
    pub offset: u16,
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: ParamDefault,
    pub min: u16,
    /// Zero means no declared bound
    pub max: u16,
}

impl ParamDesc {
    const fn number(
        offset: u16,
        name: &'static str,
        kind: ParamKind,
        default: u16,
        min: u16,
        max: u16,
    ) -> Self {
        Self {
            offset,
            name,
            kind,
            default: ParamDefault::Number(default),
            min,
            max,
        }
    }

    const fn text(offset: u16, name: &'static str, kind: ParamKind, default: ParamDefault) -> Self {
        Self {
            offset,
            name,
            kind,
            default,
            min: 0,
            max: 0,
        }
    }

    /// Bounds advertised to clients, for numbers with a declared maximum
    pub fn declared_bounds(&self) -> Option<(u16, u16)> {
        (!self.kind.is_string() && self.max != 0).then_some((self.min, self.max))
    }

    /// Bounds enforced on writes
    fn limits(&self) -> (u16, u16) {
        match (self.max, self.kind) {
            (0, ParamKind::U8) => (self.min, 254),
            (0, _) => (self.min, 65534),
            (max, _) => (self.min, max),
        }
    }
}

/// Stable ordinals
pub mod ordinal {
    pub const PORT: u8 = 0;
    pub const STATION_SSID: u8 = 1;
    pub const STATION_PASSWORD: u8 = 2;
    pub const STATION_IP: u8 = 3;
    pub const STATION_GATEWAY: u8 = 4;
    pub const STATION_MASK: u8 = 5;
    pub const AP_SSID: u8 = 6;
    pub const AP_PASSWORD: u8 = 7;
    pub const AP_IP: u8 = 8;
    pub const AP_GATEWAY: u8 = 9;
    pub const AP_MASK: u8 = 10;
    pub const AP_CHANNEL: u8 = 11;
    pub const LED_COUNT: u8 = 12;
    pub const EFFECT_TIME: u8 = 13;
    pub const EFFECT_TIME_ADD: u8 = 14;
    pub const VOLTAGE_ADJUST: u8 = 15;
    pub const TEMP_ADJUST: u8 = 16;
}

pub static PARAMS: [ParamDesc; 17] = [
    ParamDesc::number(
        layout::PORT,
        "TCP Port to listen",
        ParamKind::U16,
        config::DEFAULT_PORT,
        1,
        65534,
    ),
    ParamDesc::text(
        layout::STATION_SSID,
        "SSID of AP to connect to (leave blank for AP mode)",
        ParamKind::Str64,
        ParamDefault::None,
    ),
    ParamDesc::text(
        layout::STATION_PASSWORD,
        "Password of AP to connect to",
        ParamKind::Str64,
        ParamDefault::None,
    ),
    ParamDesc::text(
        layout::STATION_IP,
        "IP (leave blank for DHCP)",
        ParamKind::Str32,
        ParamDefault::None,
    ),
    ParamDesc::text(layout::STATION_GATEWAY, "Gateway", ParamKind::Str32, ParamDefault::None),
    ParamDesc::text(layout::STATION_MASK, "Network Mask", ParamKind::Str32, ParamDefault::None),
    ParamDesc::text(
        layout::AP_SSID,
        "AP mode: self SSID",
        ParamKind::Str64,
        ParamDefault::Text(config::DEFAULT_AP_SSID),
    ),
    ParamDesc::text(
        layout::AP_PASSWORD,
        "AP mode: password",
        ParamKind::Str64,
        ParamDefault::Text(config::DEFAULT_AP_PASSWORD),
    ),
    ParamDesc::text(
        layout::AP_IP,
        "AP mode: self IP",
        ParamKind::Str32,
        ParamDefault::Text(config::DEFAULT_AP_IP),
    ),
    ParamDesc::text(
        layout::AP_GATEWAY,
        "AP mode: gateway IP",
        ParamKind::Str32,
        ParamDefault::Text(config::DEFAULT_AP_GATEWAY),
    ),
    ParamDesc::text(
        layout::AP_MASK,
        "AP mode: network mask",
        ParamKind::Str32,
        ParamDefault::Text(config::DEFAULT_AP_MASK),
    ),
    ParamDesc::number(
        layout::AP_CHANNEL,
        "AP mode: WiFi channel",
        ParamKind::U8,
        config::DEFAULT_AP_CHANNEL as u16,
        1,
        13,
    ),
    ParamDesc::number(
        layout::LED_COUNT,
        "Number Of LEDs",
        ParamKind::U16,
        config::DEFAULT_LED_COUNT,
        1,
        config::MAX_LEDS as u16,
    ),
    ParamDesc::number(
        layout::EFFECT_TIME,
        "Effect Time (Min), s",
        ParamKind::U8,
        config::DEFAULT_EFFECT_TIME as u16,
        1,
        254,
    ),
    ParamDesc::number(
        layout::EFFECT_TIME_ADD,
        "Effect Time (Add), s",
        ParamKind::U8,
        config::DEFAULT_EFFECT_TIME_ADD as u16,
        0,
        254,
    ),
    ParamDesc::number(
        layout::VOLTAGE_ADJUST,
        "Adjust Voltage Sensor",
        ParamKind::U16,
        config::DEFAULT_VOLTAGE_ADJUST,
        1,
        65534,
    ),
    ParamDesc::number(
        layout::TEMP_ADJUST,
        "Adjust Temperature Sensor",
        ParamKind::U8,
        config::DEFAULT_TEMP_ADJUST as u16,
        0,
        254,
    ),
];

pub fn count() -> u8 {
    PARAMS.len() as u8
}

pub fn describe(ordinal: u8) -> Result<&'static ParamDesc, ParamError> {
    PARAMS
        .get(ordinal as usize)
        .ok_or(ParamError::UnknownOrdinal)
}

/// Current value of a parameter, falling back to its default while unset
pub fn read<S: ByteStore>(store: &S, ordinal: u8) -> Result<Value, ParamError> {
    let desc = describe(ordinal)?;
    let mut value = Value::new();
    let fallback = match desc.default {
        ParamDefault::Number(n) => n,
        _ => 0,
    };
    let filled = match desc.kind {
        ParamKind::U8 => value.push(store.read_or(desc.offset, fallback as u8)).is_ok(),
        ParamKind::U16 => value
            .extend_from_slice(&store.read_u16_or(desc.offset, fallback).to_le_bytes())
            .is_ok(),
        ParamKind::Str32 | ParamKind::Str64 => {
            match store.read_string::<VALUE_CAPACITY>(desc.offset, desc.kind.size()) {
                Some(stored) => {
                    value = stored;
                    true
                }
                None => match desc.default {
                    ParamDefault::Text(text) => value.extend_from_slice(text.as_bytes()).is_ok(),
                    _ => true,
                },
            }
        }
    };
    if filled {
        Ok(value)
    } else {
        Err(ParamError::BadLength)
    }
}

/// Validates and persists a parameter. An empty value resets it to its
/// default. Nothing is written when validation fails.
pub fn write<S: ByteStore>(store: &mut S, ordinal: u8, value: &[u8]) -> Result<(), ParamError> {
    let desc = describe(ordinal)?;
    let size = desc.kind.size();
    if value.len() > size || (!desc.kind.is_string() && !value.is_empty() && value.len() != size)
    {
        return Err(ParamError::BadLength);
    }

    if let Some(&first) = value.first() {
        if desc.kind.is_string() {
            if first == UNSET || value.contains(&0) {
                return Err(ParamError::BadString);
            }
        } else {
            let v = match desc.kind {
                ParamKind::U8 => first as u16,
                _ => u16::from_le_bytes([value[0], value[1]]),
            };
            let (min, max) = desc.limits();
            if v < min || v > max {
                warn!("[PARAM] {} rejected: {} outside {}..={}", desc.name, v, min, max);
                return Err(ParamError::OutOfRange);
            }
        }
    }

    let mut addr = desc.offset;
    for &b in value {
        store.write(addr, b);
        addr += 1;
    }
    let mut written = value.len();
    if desc.kind.is_string() && written > 0 && written < size {
        store.write(addr, 0);
        addr += 1;
        written += 1;
    }
    while written < size {
        store.write(addr, UNSET);
        addr += 1;
        written += 1;
    }
    store.commit();

    if value.is_empty() {
        info!("[PARAM] {} reset to default", desc.name);
    } else {
        info!("[PARAM] {} updated", desc.name);
    }
    Ok(())
}

/// Runtime copy of the settings the control loop consults every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub led_count: u16,
    /// Minimum effect duration in seconds
    pub effect_time: u8,
    /// Random extra effect duration in seconds
    pub effect_time_add: u8,
    pub voltage_adjust: u16,
    pub temp_adjust: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            led_count: config::DEFAULT_LED_COUNT,
            effect_time: config::DEFAULT_EFFECT_TIME,
            effect_time_add: config::DEFAULT_EFFECT_TIME_ADD,
            voltage_adjust: config::DEFAULT_VOLTAGE_ADJUST,
            temp_adjust: config::DEFAULT_TEMP_ADJUST,
        }
    }
}

impl Settings {
    /// Boot-time load. A stored LED count above the strip limit has its high
    /// byte cleared in storage.
    pub fn load<S: ByteStore>(store: &mut S) -> Self {
        let led_count = store.read_u16_or(layout::LED_COUNT, config::DEFAULT_LED_COUNT);
        if led_count as usize > config::MAX_LEDS {
            warn!(
                "[PARAM] stored LED count {} too large, using {}",
                led_count,
                led_count & 0xFF
            );
            store.write(layout::LED_COUNT + 1, 0);
        }
        let mut settings = Self::default();
        settings.reload(store);
        settings
    }

    /// Re-reads every cached value, substituting defaults for unusable ones
    pub fn reload<S: ByteStore>(&mut self, store: &S) {
        let led_count = store.read_u16_or(layout::LED_COUNT, config::DEFAULT_LED_COUNT);
        self.led_count = if led_count == 0 || led_count as usize > config::MAX_LEDS {
            config::DEFAULT_LED_COUNT
        } else {
            led_count
        };
        self.effect_time = match store.read_or(layout::EFFECT_TIME, config::DEFAULT_EFFECT_TIME) {
            0 => config::DEFAULT_EFFECT_TIME,
            t => t,
        };
        self.effect_time_add =
            store.read_or(layout::EFFECT_TIME_ADD, config::DEFAULT_EFFECT_TIME_ADD);
        self.voltage_adjust =
            store.read_u16_or(layout::VOLTAGE_ADJUST, config::DEFAULT_VOLTAGE_ADJUST);
        self.temp_adjust = store.read_or(layout::TEMP_ADJUST, config::DEFAULT_TEMP_ADJUST);
    }
}
