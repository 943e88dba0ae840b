//! Persistent byte store
//!
//! Byte-addressed configuration memory where `0xFF` marks an unset cell.
//! Multi-byte numbers are little endian.

use core::fmt::Debug;

use embedded_storage::Storage;
use heapless::Vec;
use log::{debug, warn};

/// Fixed offsets of every persisted item
pub mod layout {
    pub const UPDATE_MARKER: u16 = 0;
    pub const LED_COUNT: u16 = 2;
    pub const RANDOM_SEED: u16 = 4;
    pub const VOLTAGE_ADJUST: u16 = 8;
    pub const TEMP_ADJUST: u16 = 10;
    pub const EFFECT_TIME: u16 = 12;
    pub const EFFECT_TIME_ADD: u16 = 13;
    pub const PORT: u16 = 60;
    pub const AP_CHANNEL: u16 = 63;
    pub const AP_IP: u16 = 64;
    pub const AP_GATEWAY: u16 = 96;
    pub const AP_MASK: u16 = 128;
    pub const STATION_IP: u16 = 160;
    pub const STATION_GATEWAY: u16 = 192;
    pub const STATION_MASK: u16 = 224;
    pub const AP_SSID: u16 = 256;
    pub const AP_PASSWORD: u16 = 320;
    pub const STATION_SSID: u16 = 384;
    pub const STATION_PASSWORD: u16 = 448;

    /// Total size of the address space
    pub const SIZE: usize = 512;
}

/// Unset cell value
pub const UNSET: u8 = 0xFF;

/// Single-byte persistent storage
pub trait ByteStore {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);

    /// Makes earlier writes survive a power cycle
    fn commit(&mut self) {}

    fn is_set(&self, addr: u16) -> bool {
        self.read(addr) != UNSET
    }

    fn read_or(&self, addr: u16, default: u8) -> u8 {
        match self.read(addr) {
            UNSET => default,
            v => v,
        }
    }

    fn read_u16_or(&self, addr: u16, default: u16) -> u16 {
        match u16::from_le_bytes([self.read(addr), self.read(addr + 1)]) {
            0xFFFF => default,
            v => v,
        }
    }

    fn write_u16(&mut self, addr: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write(addr, lo);
        self.write(addr + 1, hi);
    }

    fn read_u32(&self, addr: u16) -> u32 {
        u32::from_le_bytes([
            self.read(addr),
            self.read(addr + 1),
            self.read(addr + 2),
            self.read(addr + 3),
        ])
    }

    fn write_u32(&mut self, addr: u16, value: u32) {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.write(addr + i as u16, b);
        }
    }

    /// Reads a string of at most `max` bytes, ending at a zero cell.
    /// Returns `None` when the first cell is unset.
    fn read_string<const N: usize>(&self, addr: u16, max: usize) -> Option<Vec<u8, N>> {
        if !self.is_set(addr) {
            return None;
        }
        let mut out = Vec::new();
        for i in 0..max.min(N) {
            let b = self.read(addr + i as u16);
            if b == 0 {
                break;
            }
            // capacity is bounded by the loop range
            let _ = out.push(b);
        }
        Some(out)
    }
}

/// RAM-backed store, blank on creation
pub struct MemoryStore {
    bytes: [u8; layout::SIZE],
}

impl MemoryStore {
    pub const fn new() -> Self {
        Self {
            bytes: [UNSET; layout::SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStore for MemoryStore {
    fn read(&self, addr: u16) -> u8 {
        self.bytes.get(addr as usize).copied().unwrap_or(UNSET)
    }

    fn write(&mut self, addr: u16, value: u8) {
        if let Some(cell) = self.bytes.get_mut(addr as usize) {
            *cell = value;
        }
    }
}

/// Store mirrored in RAM and written back to a flash region on commit
pub struct FlashStore<F> {
    flash: F,
    offset: u32,
    image: MemoryStore,
    dirty: bool,
}

impl<F: Storage> FlashStore<F> {
    /// Loads the region at `offset` into the mirror
    pub fn open(mut flash: F, offset: u32) -> Result<Self, F::Error> {
        let mut image = MemoryStore::new();
        flash.read(offset, &mut image.bytes)?;
        Ok(Self {
            flash,
            offset,
            image,
            dirty: false,
        })
    }

    /// Writes the mirror back if anything changed since the last call
    pub fn persist(&mut self) -> Result<(), F::Error> {
        if self.dirty {
            self.flash.write(self.offset, self.image.as_bytes())?;
            self.dirty = false;
            debug!("[PARAM] settings written to flash at {:#x}", self.offset);
        }
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl<F> ByteStore for FlashStore<F>
where
    F: Storage,
    F::Error: Debug,
{
    fn read(&self, addr: u16) -> u8 {
        self.image.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        if self.image.read(addr) != value {
            self.image.write(addr, value);
            self.dirty = true;
        }
    }

    fn commit(&mut self) {
        if let Err(err) = self.persist() {
            warn!("[PARAM] flash write failed: {:?}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryFlash;

    #[test]
    fn blank_store_falls_back_to_defaults() {
        let store = MemoryStore::new();
        assert_eq!(store.read_or(layout::AP_CHANNEL, 6), 6);
        assert_eq!(store.read_u16_or(layout::PORT, 3388), 3388);
        assert!(store.read_string::<64>(layout::STATION_SSID, 64).is_none());
    }

    #[test]
    fn u16_needs_both_bytes_unset_to_default() {
        let mut store = MemoryStore::new();
        store.write(layout::PORT, 0x10);
        assert_eq!(store.read_u16_or(layout::PORT, 3388), 0xFF10);
        store.write_u16(layout::PORT, 8080);
        assert_eq!(store.read_u16_or(layout::PORT, 3388), 8080);
    }

    #[test]
    fn strings_stop_at_terminator_or_limit() {
        let mut store = MemoryStore::new();
        for (i, b) in b"home\0junk".iter().enumerate() {
            store.write(layout::STATION_SSID + i as u16, *b);
        }
        let ssid = store.read_string::<64>(layout::STATION_SSID, 64).unwrap();
        assert_eq!(ssid.as_slice(), b"home");

        for i in 0..32u16 {
            store.write(layout::AP_IP + i, b'1');
        }
        let ip = store.read_string::<32>(layout::AP_IP, 32).unwrap();
        assert_eq!(ip.len(), 32);
    }

    #[test]
    fn unset_cells_inside_a_string_are_kept() {
        let mut store = MemoryStore::new();
        for (i, b) in b"a\xFFb\0".iter().enumerate() {
            store.write(layout::STATION_SSID + i as u16, *b);
        }
        let ssid = store.read_string::<64>(layout::STATION_SSID, 64).unwrap();
        assert_eq!(ssid.as_slice(), b"a\xFFb");
    }

    #[test]
    fn out_of_range_addresses_read_unset() {
        let mut store = MemoryStore::new();
        store.write(4000, 1);
        assert_eq!(store.read(4000), UNSET);
    }

    #[test]
    fn flash_store_survives_reopen() {
        let flash = MemoryFlash::new(0x2000);
        let mut store = FlashStore::open(flash.clone(), 0x1000).unwrap();
        assert!(!store.is_set(layout::LED_COUNT));

        store.write_u16(layout::LED_COUNT, 120);
        assert!(store.is_dirty());
        assert_eq!(flash.writes(), 0);
        store.commit();
        assert!(!store.is_dirty());
        assert_eq!(flash.writes(), 1);

        let reopened = FlashStore::open(flash.clone(), 0x1000).unwrap();
        assert_eq!(reopened.read_u16_or(layout::LED_COUNT, 50), 120);
        // nothing below the region was touched
        assert!(flash.bytes()[..0x1000].iter().all(|&b| b == UNSET));
    }

    #[test]
    fn unchanged_values_do_not_rewrite_flash() {
        let flash = MemoryFlash::new(0x1000);
        let mut store = FlashStore::open(flash.clone(), 0).unwrap();
        store.write(layout::AP_CHANNEL, 3);
        store.commit();
        store.write(layout::AP_CHANNEL, 3);
        store.commit();
        store.commit();
        assert_eq!(flash.writes(), 1);
    }

    #[test]
    fn failed_flash_write_stays_dirty() {
        let flash = MemoryFlash::new(0x1000);
        let mut store = FlashStore::open(flash.clone(), 0).unwrap();
        store.write(layout::AP_CHANNEL, 3);
        flash.fail_writes(true);
        store.commit();
        assert!(store.is_dirty());
        flash.fail_writes(false);
        store.commit();
        assert!(!store.is_dirty());
        assert_eq!(flash.bytes()[layout::AP_CHANNEL as usize], 3);
    }
}
