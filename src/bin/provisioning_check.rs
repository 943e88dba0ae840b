//! Modem provisioning check
//!
//! Brings the attached modem up with the regular engine over a polled UART
//! and reports each provisioning step, then exercises one close and one
//! reinitialization cycle.

#![no_std]
#![no_main]

use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::time::{Duration, Instant};
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_println::println;

use yolka_rs::modem::{AtEngine, BaudRate, ModemPort, TickSource};
use yolka_rs::state_machine::ModemState;
use yolka_rs::storage::MemoryStore;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ {}", info);
    loop {}
}

/// UART without interrupts or flow control; enough for provisioning
struct PolledPort {
    uart: Uart<'static, Blocking>,
}

impl ModemPort for PolledPort {
    fn try_read(&mut self) -> Option<u8> {
        let mut buf = [0u8; 1];
        match self.uart.read_buffered(&mut buf) {
            Ok(1) => Some(buf[0]),
            _ => None,
        }
    }

    fn write(&mut self, byte: u8) {
        let _ = self.uart.write(&[byte]);
    }

    fn flush(&mut self) {
        let _ = self.uart.flush();
    }

    fn set_baud_rate(&mut self, baud: BaudRate) {
        self.flush();
        let config = UartConfig::default().with_baudrate(baud.bits_per_second());
        if let Err(err) = self.uart.apply_config(&config) {
            println!("⚠️ baud change to {} failed: {:?}", baud.bits_per_second(), err);
        }
    }

    fn suspend_receive(&mut self) -> bool {
        false
    }

    fn restore_receive(&mut self, _was_running: bool) {}
}

struct Clock {
    next: Instant,
}

impl TickSource for Clock {
    fn take_tick(&mut self) -> bool {
        if Instant::now() < self.next {
            return false;
        }
        self.next = self.next + Duration::from_millis(20);
        true
    }
}

/// Polls until the engine is ready, printing every state it passes through
fn provision(engine: &mut AtEngine<PolledPort, Clock>, store: &MemoryStore, limit: Duration) {
    let start = Instant::now();
    let mut last = engine.state();
    println!("  {:?}", last);
    while !engine.is_ready() {
        if let Some(event) = engine.poll(store) {
            println!("  event {:?}", event);
        }
        if engine.state() != last {
            last = engine.state();
            println!("  {:?}", last);
        }
        assert!(
            start.elapsed() < limit,
            "modem stuck in {:?}",
            engine.state()
        );
    }
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    println!("=== Modem provisioning check ===");

    let uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(BaudRate::Working.bits_per_second()),
    )
    .expect("UART1 setup")
    .with_tx(peripherals.GPIO7)
    .with_rx(peripherals.GPIO6);

    let port = PolledPort { uart };
    let clock = Clock {
        next: Instant::now(),
    };
    let store = MemoryStore::new();
    let mut engine = AtEngine::new(port, clock);

    println!("\n1. Access point provisioning");
    provision(&mut engine, &store, Duration::from_secs(90));
    println!("✅ ready");

    println!("\n2. Close on an idle link");
    assert!(engine.request_close(0));
    assert_eq!(engine.state(), ModemState::Disconnect);
    provision(&mut engine, &store, Duration::from_secs(5));
    println!("✅ back to ready");

    println!("\n3. Reinitialization");
    assert!(engine.request_reinit());
    assert!(!engine.request_reinit());
    provision(&mut engine, &store, Duration::from_secs(90));
    println!("✅ ready again");

    println!("\n=== All checks passed ===");
    loop {
        core::hint::spin_loop();
    }
}
