//! Modem serial ring buffers
//!
//! The receive interrupt pushes into [`RxProducer`], the cooperative loop pops
//! from [`RxConsumer`]. Occupancy hysteresis drives the remote pause line: it
//! is asserted when the ring fills to [`RX_PAUSE_AT`] and released once the
//! reader drains it back to [`RX_RESUME_AT`]. Transmit goes the other way
//! through [`TxQueue`], drained one byte per transmitter-ready interrupt.
//!
//! Only atomic loads and stores are used; the ESP32-C3 core has no
//! compare-and-swap.

use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::CriticalSection;
use embedded_hal::digital::OutputPin;
use heapless::spsc::{Consumer, Producer, Queue};

/// Receive ring slots (one stays free, so 63 bytes usable)
pub const RX_SLOTS: usize = 64;
/// Occupancy at which the modem is told to pause
pub const RX_PAUSE_AT: usize = 58;
/// Occupancy at which the modem may resume
pub const RX_RESUME_AT: usize = 32;
/// Transmit ring slots
pub const TX_SLOTS: usize = 32;

/// Change to apply to the remote pause line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEdge {
    None,
    Pause,
    Resume,
}

/// Receive ring with flow-control state
pub struct RxQueue {
    queue: Queue<u8, RX_SLOTS>,
    paused: AtomicBool,
}

impl RxQueue {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            paused: AtomicBool::new(false),
        }
    }

    /// Splits into the interrupt half and the reader half
    pub fn split(&mut self) -> (RxProducer<'_>, RxConsumer<'_>) {
        let RxQueue { queue, paused } = self;
        let paused: &AtomicBool = paused;
        let (producer, consumer) = queue.split();
        (
            RxProducer {
                inner: producer,
                paused,
            },
            RxConsumer {
                inner: consumer,
                paused,
            },
        )
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt side of the receive ring
pub struct RxProducer<'a> {
    inner: Producer<'a, u8, RX_SLOTS>,
    paused: &'a AtomicBool,
}

impl RxProducer<'_> {
    /// Stores one received byte. A full ring drops the byte; the pause line
    /// is already asserted long before that can happen.
    pub fn enqueue(&mut self, byte: u8) -> FlowEdge {
        let _ = self.inner.enqueue(byte);
        if self.inner.len() >= RX_PAUSE_AT && !self.paused.load(Ordering::Acquire) {
            self.paused.store(true, Ordering::Release);
            FlowEdge::Pause
        } else {
            FlowEdge::None
        }
    }
}

/// Reader side of the receive ring
pub struct RxConsumer<'a> {
    inner: Consumer<'a, u8, RX_SLOTS>,
    paused: &'a AtomicBool,
}

impl RxConsumer<'_> {
    /// Takes the oldest byte. A resume edge at the low-water mark is handed
    /// to `apply` inside the same critical section that clears the flag, so
    /// a pause raised by the interrupt cannot be overtaken by a stale resume.
    pub fn dequeue<F>(&mut self, apply: F) -> Option<u8>
    where
        F: FnOnce(CriticalSection<'_>, FlowEdge),
    {
        let byte = self.inner.dequeue()?;
        critical_section::with(|cs| {
            if self.paused.load(Ordering::Acquire) && self.inner.len() <= RX_RESUME_AT {
                self.paused.store(false, Ordering::Release);
                apply(cs, FlowEdge::Resume);
            }
        });
        Some(byte)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.inner.ready()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Forces a pause around timing-critical work. Returns whether reception
    /// was running before the call.
    pub fn suspend<F>(&mut self, apply: F) -> bool
    where
        F: FnOnce(CriticalSection<'_>, FlowEdge),
    {
        critical_section::with(|cs| {
            let was_running = !self.paused.load(Ordering::Acquire);
            self.paused.store(true, Ordering::Release);
            apply(cs, FlowEdge::Pause);
            was_running
        })
    }

    /// Undoes [`suspend`](Self::suspend). Reception stays paused when the
    /// ring filled past the high-water mark in the meantime; the reader
    /// releases it at the low-water mark as usual.
    pub fn restore<F>(&mut self, was_running: bool, apply: F)
    where
        F: FnOnce(CriticalSection<'_>, FlowEdge),
    {
        if !was_running {
            return;
        }
        critical_section::with(|cs| {
            if self.inner.len() < RX_PAUSE_AT {
                self.paused.store(false, Ordering::Release);
                apply(cs, FlowEdge::Resume);
            }
        });
    }
}

/// Transmit ring
pub struct TxQueue {
    queue: Queue<u8, TX_SLOTS>,
}

impl TxQueue {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
        }
    }

    pub fn split(&mut self) -> (TxProducer<'_>, TxConsumer<'_>) {
        let (producer, consumer) = self.queue.split();
        (TxProducer { inner: producer }, TxConsumer { inner: consumer })
    }
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer side of the transmit ring
pub struct TxProducer<'a> {
    inner: Producer<'a, u8, TX_SLOTS>,
}

impl TxProducer<'_> {
    /// Hands the byte back when the ring is full
    pub fn try_enqueue(&mut self, byte: u8) -> Result<(), u8> {
        self.inner.enqueue(byte)
    }

    pub fn is_drained(&self) -> bool {
        self.inner.len() == 0
    }
}

/// Interrupt side of the transmit ring
pub struct TxConsumer<'a> {
    inner: Consumer<'a, u8, TX_SLOTS>,
}

impl TxConsumer<'_> {
    /// Next byte for the transmitter; `None` means the interrupt can be
    /// disabled.
    pub fn next_byte(&mut self) -> Option<u8> {
        self.inner.dequeue()
    }

    pub fn is_empty(&self) -> bool {
        !self.inner.ready()
    }
}

/// Remote pause line, high while the modem must hold off
pub struct FlowPin<P: OutputPin> {
    pin: P,
}

impl<P: OutputPin> FlowPin<P> {
    pub fn new(mut pin: P) -> Self {
        let _ = pin.set_low();
        Self { pin }
    }

    pub fn apply(&mut self, edge: FlowEdge) -> Result<(), P::Error> {
        match edge {
            FlowEdge::Pause => self.pin.set_high(),
            FlowEdge::Resume => self.pin.set_low(),
            FlowEdge::None => Ok(()),
        }
    }
}
