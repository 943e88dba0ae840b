//! Host-side doubles for the board peripherals

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_storage::{ReadStorage, Storage};
use smart_leds::{RGB8, SmartLedsWrite};

use crate::boot::UpdateHandoff;
use crate::dispatcher::{Platform, SensorSample, SensorSource};
use crate::modem::{BaudRate, ModemPort, TickSource};
use crate::storage::MemoryStore;

#[derive(Default)]
struct PortState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    bauds: Vec<BaudRate>,
    paused: bool,
    suspends: usize,
}

/// Scripted serial port. Clones share the same buffers.
#[derive(Clone, Default)]
pub struct MockPort {
    state: Rc<RefCell<PortState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes as if the modem had sent them
    pub fn script(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Everything written since the last call
    pub fn take_sent(&self) -> String {
        String::from_utf8_lossy(&self.take_sent_bytes()).into_owned()
    }

    pub fn take_sent_bytes(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().tx)
    }

    pub fn bauds(&self) -> Vec<BaudRate> {
        self.state.borrow().bauds.clone()
    }

    pub fn unread(&self) -> usize {
        self.state.borrow().rx.len()
    }

    /// Number of times reception was suspended
    pub fn suspends(&self) -> usize {
        self.state.borrow().suspends
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }
}

impl ModemPort for MockPort {
    fn try_read(&mut self) -> Option<u8> {
        self.state.borrow_mut().rx.pop_front()
    }

    fn read(&mut self) -> u8 {
        self.try_read().expect("blocking read on an empty script")
    }

    fn write(&mut self, byte: u8) {
        self.state.borrow_mut().tx.push(byte);
    }

    fn flush(&mut self) {}

    fn set_baud_rate(&mut self, baud: BaudRate) {
        self.state.borrow_mut().bauds.push(baud);
    }

    fn suspend_receive(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.suspends += 1;
        let was_running = !state.paused;
        state.paused = true;
        was_running
    }

    fn restore_receive(&mut self, was_running: bool) {
        if was_running {
            self.state.borrow_mut().paused = false;
        }
    }
}

/// Tick source fired by hand
#[derive(Clone, Default)]
pub struct ManualTicks {
    pending: Rc<Cell<u32>>,
}

impl ManualTicks {
    pub fn manual() -> Self {
        Self::default()
    }

    /// Makes `n` more ticks due
    pub fn fire(&self, n: u32) {
        self.pending.set(self.pending.get() + n);
    }

    pub fn pending(&self) -> u32 {
        self.pending.get()
    }
}

impl TickSource for ManualTicks {
    fn take_tick(&mut self) -> bool {
        let pending = self.pending.get();
        if pending == 0 {
            return false;
        }
        self.pending.set(pending - 1);
        true
    }
}

/// Strip that remembers every frame written to it
#[derive(Clone, Default)]
pub struct RecordingStrip {
    frames: Rc<RefCell<Vec<Vec<RGB8>>>>,
}

impl RecordingStrip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Vec<RGB8>> {
        self.frames.borrow().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.frames.borrow().len()
    }
}

impl SmartLedsWrite for RecordingStrip {
    type Error = Infallible;
    type Color = RGB8;

    fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
    where
        T: IntoIterator<Item = I>,
        I: Into<Self::Color>,
    {
        let frame = iterator.into_iter().map(Into::into).collect();
        self.frames.borrow_mut().push(frame);
        Ok(())
    }
}

/// Sensors returning a fixed sample and alternating noise
#[derive(Clone)]
pub struct FixedSensors {
    pub sample: SensorSample,
    flip: bool,
}

impl FixedSensors {
    pub fn new(voltage: u16, temperature: u16) -> Self {
        Self {
            sample: SensorSample {
                voltage,
                temperature,
            },
            flip: false,
        }
    }
}

impl SensorSource for FixedSensors {
    fn sample(&mut self) -> SensorSample {
        self.sample
    }

    fn noise_bit(&mut self) -> bool {
        self.flip = !self.flip;
        self.flip
    }
}

/// Counts hand-offs to the update image
#[derive(Clone, Default)]
pub struct RecordingUpdater {
    entered: Rc<Cell<u32>>,
}

impl RecordingUpdater {
    pub fn entered(&self) -> u32 {
        self.entered.get()
    }
}

impl UpdateHandoff for RecordingUpdater {
    fn enter_update_image(&mut self) {
        self.entered.set(self.entered.get() + 1);
    }
}

#[derive(Default)]
struct FlashState {
    bytes: Vec<u8>,
    writes: usize,
    failing: bool,
}

/// Erased NOR flash image. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryFlash {
    state: Rc<RefCell<FlashState>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlashFault {
    OutOfBounds,
    WriteFailed,
}

impl MemoryFlash {
    pub fn new(capacity: usize) -> Self {
        let flash = Self::default();
        flash.state.borrow_mut().bytes = vec![0xFF; capacity];
        flash
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.state.borrow().bytes.clone()
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn fail_writes(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }
}

impl ReadStorage for MemoryFlash {
    type Error = FlashFault;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), FlashFault> {
        let state = self.state.borrow();
        let start = offset as usize;
        let src = state
            .bytes
            .get(start..start + bytes.len())
            .ok_or(FlashFault::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.state.borrow().bytes.len()
    }
}

impl Storage for MemoryFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), FlashFault> {
        let mut state = self.state.borrow_mut();
        if state.failing {
            return Err(FlashFault::WriteFailed);
        }
        let start = offset as usize;
        state
            .bytes
            .get_mut(start..start + bytes.len())
            .ok_or(FlashFault::OutOfBounds)?
            .copy_from_slice(bytes);
        state.writes += 1;
        Ok(())
    }
}

/// Host platform built from the doubles above
pub struct TestPlatform;

impl Platform for TestPlatform {
    type Port = MockPort;
    type Ticks = ManualTicks;
    type Store = MemoryStore;
    type Strip = RecordingStrip;
    type Sensors = FixedSensors;
    type Updater = RecordingUpdater;
}
