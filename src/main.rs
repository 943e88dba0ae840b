#![no_std]
#![no_main]

use core::cell::RefCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::{CriticalSection, Mutex};
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::handler;
use esp_hal::rmt::Rmt;
use esp_hal::rng::Rng;
use esp_hal::time::{Duration, Instant, Rate};
use esp_hal::uart::{Config as UartConfig, RxConfig, Uart, UartInterrupt};
use esp_hal::Blocking;
use esp_hal_smartled::SmartLedsAdapter;
use esp_storage::FlashStorage;
use log::{LevelFilter, error, info, warn};
use smart_leds::{RGB8, SmartLedsWrite};
use static_cell::StaticCell;

use yolka_rs::boot::{self, BootTarget, UpdateHandoff};
use yolka_rs::config;
use yolka_rs::dispatcher::{Controller, Parts, Platform, SensorSample, SensorSource};
use yolka_rs::effects::BUILTIN;
use yolka_rs::modem::{BaudRate, ModemPort, TickSource};
use yolka_rs::ring_buffer::{
    FlowEdge, FlowPin, RxConsumer, RxProducer, RxQueue, TxConsumer, TxProducer, TxQueue,
};
use yolka_rs::storage::FlashStore;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

/// RMT pulses per LED plus the end marker
const RMT_BUFFER_SIZE: usize = config::MAX_LEDS * 24 + 1;

/// Raw readings accumulated per sensor sample
const SENSOR_SAMPLES: u16 = 64;

static RX_QUEUE: StaticCell<RxQueue> = StaticCell::new();
static TX_QUEUE: StaticCell<TxQueue> = StaticCell::new();
static RMT_BUFFER: StaticCell<[u32; RMT_BUFFER_SIZE]> = StaticCell::new();

// Shared with the UART interrupt
static UART: Mutex<RefCell<Option<Uart<'static, Blocking>>>> = Mutex::new(RefCell::new(None));
static RX_PRODUCER: Mutex<RefCell<Option<RxProducer<'static>>>> = Mutex::new(RefCell::new(None));
static TX_CONSUMER: Mutex<RefCell<Option<TxConsumer<'static>>>> = Mutex::new(RefCell::new(None));
static FLOW: Mutex<RefCell<Option<FlowPin<Output<'static>>>>> = Mutex::new(RefCell::new(None));
static TX_ACTIVE: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("[BOOT] panic: {}", info);
    loop {}
}

fn uart_config(baud: BaudRate) -> UartConfig {
    UartConfig::default()
        .with_baudrate(baud.bits_per_second())
        .with_rx(RxConfig::default().with_fifo_full_threshold(1))
}

/// Drives the pause line; callers hold the critical section that decided the edge
fn apply_flow(cs: CriticalSection<'_>, edge: FlowEdge) {
    if let Some(flow) = FLOW.borrow_ref_mut(cs).as_mut() {
        let _ = flow.apply(edge);
    }
}

/// Starts the transmitter when it is idle and bytes are queued
fn kick_transmitter() {
    critical_section::with(|cs| {
        if TX_ACTIVE.load(Ordering::Acquire) {
            return;
        }
        let mut uart = UART.borrow_ref_mut(cs);
        let mut tx = TX_CONSUMER.borrow_ref_mut(cs);
        if let (Some(uart), Some(tx)) = (uart.as_mut(), tx.as_mut()) {
            if let Some(byte) = tx.next_byte() {
                let _ = uart.write(&[byte]);
                TX_ACTIVE.store(true, Ordering::Release);
                uart.listen(UartInterrupt::TxDone);
            }
        }
    });
}

#[handler]
fn uart1_interrupt() {
    critical_section::with(|cs| {
        let mut uart = UART.borrow_ref_mut(cs);
        let Some(uart) = uart.as_mut() else {
            return;
        };
        let pending = uart.interrupts();

        let mut rx = RX_PRODUCER.borrow_ref_mut(cs);
        let mut flow = FLOW.borrow_ref_mut(cs);
        let mut buf = [0u8; 16];
        while let Ok(n) = uart.read_buffered(&mut buf) {
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                if let Some(rx) = rx.as_mut() {
                    let edge = rx.enqueue(byte);
                    if let Some(flow) = flow.as_mut() {
                        let _ = flow.apply(edge);
                    }
                }
            }
        }

        if pending.contains(UartInterrupt::TxDone) {
            let next = TX_CONSUMER
                .borrow_ref_mut(cs)
                .as_mut()
                .and_then(|tx| tx.next_byte());
            match next {
                Some(byte) => {
                    let _ = uart.write(&[byte]);
                }
                None => {
                    TX_ACTIVE.store(false, Ordering::Release);
                    uart.unlisten(UartInterrupt::TxDone);
                }
            }
        }

        uart.clear_interrupts(pending);
    });
}

/// Modem side of the interrupt-driven serial rings
struct BoardPort {
    rx: RxConsumer<'static>,
    tx: TxProducer<'static>,
}

impl ModemPort for BoardPort {
    fn try_read(&mut self) -> Option<u8> {
        self.rx.dequeue(apply_flow)
    }

    fn write(&mut self, byte: u8) {
        let mut byte = byte;
        while let Err(rejected) = self.tx.try_enqueue(byte) {
            byte = rejected;
            kick_transmitter();
            core::hint::spin_loop();
        }
        kick_transmitter();
    }

    fn flush(&mut self) {
        while !self.tx.is_drained() || TX_ACTIVE.load(Ordering::Acquire) {
            kick_transmitter();
            core::hint::spin_loop();
        }
        critical_section::with(|cs| {
            if let Some(uart) = UART.borrow_ref_mut(cs).as_mut() {
                let _ = uart.flush();
            }
        });
    }

    fn set_baud_rate(&mut self, baud: BaudRate) {
        self.flush();
        critical_section::with(|cs| {
            if let Some(uart) = UART.borrow_ref_mut(cs).as_mut() {
                if let Err(err) = uart.apply_config(&uart_config(baud)) {
                    warn!("[MODEM] baud change failed: {:?}", err);
                }
            }
        });
    }

    fn suspend_receive(&mut self) -> bool {
        self.rx.suspend(apply_flow)
    }

    fn restore_receive(&mut self, was_running: bool) {
        self.rx.restore(was_running, apply_flow);
    }
}

/// 50 Hz frame clock on the system timer
struct FrameClock {
    next: Instant,
    period: Duration,
}

impl FrameClock {
    fn new() -> Self {
        let period = Duration::from_millis(1000 / config::TICKS_PER_SECOND as u64);
        Self {
            next: Instant::now() + period,
            period,
        }
    }
}

impl TickSource for FrameClock {
    fn take_tick(&mut self) -> bool {
        if Instant::now() < self.next {
            return false;
        }
        self.next = self.next + self.period;
        true
    }
}

/// Supply voltage and temperature dividers plus hardware noise
struct AnalogSensors<F> {
    read: F,
    rng: Rng,
}

impl<F: FnMut() -> SensorSample> SensorSource for AnalogSensors<F> {
    fn sample(&mut self) -> SensorSample {
        (self.read)()
    }

    fn noise_bit(&mut self) -> bool {
        self.rng.random() & 1 != 0
    }
}

/// Restarts into the update image
struct ResetToUpdater;

impl UpdateHandoff for ResetToUpdater {
    fn enter_update_image(&mut self) {
        info!("[BOOT] restarting into the update image");
        esp_hal::system::software_reset();
    }
}

struct Board<S, F>(PhantomData<(S, F)>);

impl<S, F> Platform for Board<S, F>
where
    S: SmartLedsWrite<Color = RGB8>,
    F: FnMut() -> SensorSample,
{
    type Port = BoardPort;
    type Ticks = FrameClock;
    type Store = FlashStore<FlashStorage>;
    type Strip = S;
    type Sensors = AnalogSensors<F>;
    type Updater = ResetToUpdater;
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    info!("[BOOT] Yolka {}", yolka_rs::VERSION);

    let store = match FlashStore::open(FlashStorage::new(), config::STORE_FLASH_OFFSET) {
        Ok(store) => store,
        Err(err) => {
            error!("[PARAM] flash read failed: {:?}", err);
            panic!("parameter store unavailable");
        }
    };
    if boot::select(&store) == BootTarget::Updater {
        ResetToUpdater.enter_update_image();
    }

    // Serial rings and the interrupt side
    let (rx_producer, rx_consumer) = RX_QUEUE.init(RxQueue::new()).split();
    let (tx_producer, tx_consumer) = TX_QUEUE.init(TxQueue::new()).split();
    let flow_pin = Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default());

    let mut uart = match Uart::new(peripherals.UART1, uart_config(BaudRate::Working)) {
        Ok(uart) => uart
            .with_tx(peripherals.GPIO7)
            .with_rx(peripherals.GPIO6),
        Err(err) => {
            error!("[MODEM] UART setup failed: {:?}", err);
            panic!("UART initialization failed");
        }
    };
    uart.set_interrupt_handler(uart1_interrupt);
    uart.listen(UartInterrupt::RxFifoFull);

    critical_section::with(|cs| {
        RX_PRODUCER.borrow_ref_mut(cs).replace(rx_producer);
        TX_CONSUMER.borrow_ref_mut(cs).replace(tx_consumer);
        FLOW.borrow_ref_mut(cs).replace(FlowPin::new(flow_pin));
        UART.borrow_ref_mut(cs).replace(uart);
    });
    info!("[MODEM] UART1 ready, RX GPIO6 / TX GPIO7, pause GPIO5");

    // WS2812 strip on the RMT peripheral
    let rmt = match Rmt::new(peripherals.RMT, Rate::from_mhz(80)) {
        Ok(rmt) => rmt,
        Err(err) => {
            error!("[LED] RMT setup failed: {:?}", err);
            panic!("RMT initialization failed");
        }
    };
    let buffer = RMT_BUFFER.init([0u32; RMT_BUFFER_SIZE]);
    let strip = SmartLedsAdapter::new(rmt.channel0, peripherals.GPIO4, buffer);
    info!("[LED] strip on GPIO{}", config::LED_DATA_PIN);

    // Supply and temperature dividers
    let mut adc_config = AdcConfig::new();
    let mut voltage_pin = adc_config.enable_pin(peripherals.GPIO0, Attenuation::_11dB);
    let mut temperature_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let mut adc = Adc::new(peripherals.ADC1, adc_config);
    let read = move || {
        let mut sample = SensorSample::default();
        for _ in 0..SENSOR_SAMPLES {
            let voltage = loop {
                if let Ok(raw) = adc.read_oneshot(&mut voltage_pin) {
                    break raw;
                }
            };
            let temperature = loop {
                if let Ok(raw) = adc.read_oneshot(&mut temperature_pin) {
                    break raw;
                }
            };
            // 12-bit readings, accumulated as 10-bit
            sample.voltage = sample.voltage.wrapping_add(voltage >> 2);
            sample.temperature = sample.temperature.wrapping_add(temperature >> 2);
        }
        sample
    };

    let parts = Parts::<Board<_, _>> {
        port: BoardPort {
            rx: rx_consumer,
            tx: tx_producer,
        },
        ticks: FrameClock::new(),
        store,
        strip,
        sensors: AnalogSensors {
            read,
            rng: Rng::new(peripherals.RNG),
        },
        updater: ResetToUpdater,
    };

    let mut controller = Controller::new(parts, &BUILTIN);
    info!("[BOOT] entering control loop");
    controller.run()
}
