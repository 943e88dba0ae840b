//! Device controller and client protocol
//!
//! [`Controller`] owns every piece of runtime state: the modem engine, the
//! shared frame, power animation, the raw-frame claim and the effect
//! schedule. Effects reach it only through [`FrameSync`]; whenever they wait
//! for a tick the controller services modem events and answers client
//! requests.

use core::ops::ControlFlow;

use heapless::Vec;
use log::{debug, info, warn};
use smart_leds::{RGB8, SmartLedsWrite};

use crate::BoardError;
use crate::boot::{self, UpdateHandoff};
use crate::cipher;
use crate::config;
use crate::effects::{Aborted, Effect, Flow, FrameSync, Lcg};
use crate::led_control::LedController;
use crate::modem::{AtEngine, ModemEvent, ModemPort, SEND_CAPACITY, SendSource, TickSource};
use crate::params::{self, ParamKind, Settings};
use crate::power::PowerState;
use crate::storage::{ByteStore, layout};

/// Raw frame pushes hold the strip this many ticks after the last accepted one
const EXTERNAL_HOLD: u8 = 255;

/// Effect selection shortens any external hold to this
const SELECT_HOLD: u8 = 5;

/// Added to the stored seed on every boot
const SEED_STEP: u32 = 3571;

/// Accumulated raw analog readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSample {
    pub voltage: u16,
    pub temperature: u16,
}

pub trait SensorSource {
    fn sample(&mut self) -> SensorSample;

    /// One bit of analog noise for seeding
    fn noise_bit(&mut self) -> bool;
}

/// Hardware the controller runs on
pub trait Platform {
    type Port: ModemPort;
    type Ticks: TickSource;
    type Store: ByteStore;
    type Strip: SmartLedsWrite<Color = RGB8>;
    type Sensors: SensorSource;
    type Updater: UpdateHandoff;
}

/// Peripherals handed to [`Controller::new`]
pub struct Parts<P: Platform> {
    pub port: P::Port,
    pub ticks: P::Ticks,
    pub store: P::Store,
    pub strip: P::Strip,
    pub sensors: P::Sensors,
    pub updater: P::Updater,
}

/// Temporary raw-frame ownership of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImmediateClaim {
    pub owner: u8,
    pub high_priority: bool,
    pub remaining: u8,
}

impl ImmediateClaim {
    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    /// Whether a push from `link` may take over the strip
    pub fn admits(&self, link: u8, high_priority: bool) -> bool {
        !self.is_active() || self.owner == link || (high_priority && !self.high_priority)
    }

    /// Another client currently holds the strip
    pub fn blocks(&self, link: u8) -> bool {
        self.is_active() && self.owner != link
    }

    fn tick(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

type Reply = Result<Option<SendSource>, BoardError>;

fn reply(parts: &[&[u8]]) -> Reply {
    let mut buf: Vec<u8, SEND_CAPACITY> = Vec::new();
    for part in parts {
        buf.extend_from_slice(part)
            .map_err(|_| BoardError::ProtocolError)?;
    }
    Ok(Some(SendSource::Buffer(buf)))
}

fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// The whole device
pub struct Controller<P: Platform> {
    pub(crate) modem: AtEngine<P::Port, P::Ticks>,
    pub(crate) store: P::Store,
    leds: LedController<P::Strip>,
    sensors: P::Sensors,
    updater: P::Updater,
    frame: [RGB8; config::MAX_LEDS],
    pub(crate) settings: Settings,
    pub(crate) power: PowerState,
    pub(crate) claim: ImmediateClaim,
    /// Ticks the strip stays under client control
    pub(crate) external_control: u8,
    /// Ticks until the next effect switch
    pub(crate) effect_countdown: u16,
    pub(crate) next_effect: u8,
    pub(crate) effects: &'static [&'static dyn Effect],
    pub(crate) reinit_pending: bool,
    rng: Lcg,
}

impl<P: Platform> Controller<P> {
    /// Loads settings, advances the stored random seed and picks the first
    /// effect
    pub fn new(parts: Parts<P>, effects: &'static [&'static dyn Effect]) -> Self {
        let Parts {
            port,
            ticks,
            mut store,
            strip,
            mut sensors,
            updater,
        } = parts;

        let carried = store.read_u32(layout::RANDOM_SEED);
        store.write_u32(layout::RANDOM_SEED, carried.wrapping_add(SEED_STEP));
        let mut noise = 0u32;
        for _ in 0..64 {
            noise = (noise << 1) | sensors.noise_bit() as u32;
        }

        let settings = Settings::load(&mut store);
        store.commit();
        info!(
            "[BOOT] {} LEDs, {} effects, seed {:#010x}",
            settings.led_count,
            effects.len(),
            carried ^ noise
        );

        let mut controller = Self {
            modem: AtEngine::new(port, ticks),
            store,
            leds: LedController::new(strip),
            sensors,
            updater,
            frame: [RGB8::default(); config::MAX_LEDS],
            settings,
            power: PowerState::new(),
            claim: ImmediateClaim::default(),
            external_control: 0,
            effect_countdown: 0,
            next_effect: 0,
            effects,
            reinit_pending: false,
            rng: Lcg::new(carried ^ noise),
        };
        controller.next_effect = controller.random(effects.len() as u8);
        controller
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn power(&self) -> &PowerState {
        &self.power
    }

    /// Writes the frame with the current brightness applied
    fn output(&mut self) {
        let count = self.led_count();
        let was_running = self.modem.suspend_receive();
        let result = self
            .leds
            .write_frame(&self.frame[..count], self.power.brightness());
        self.modem.restore_receive(was_running);
        self.power.mark_output();
        if let Err(err) = result {
            warn!("[LED] {}", err);
        }
    }

    fn blank(&mut self) {
        let count = self.led_count();
        self.frame[..count].fill(RGB8::default());
        self.output();
    }

    /// Rewrites a held frame after a brightness change
    pub(crate) fn refresh_held_frame(&mut self) {
        if !self.power.needs_reoutput() {
            return;
        }
        if self.power.is_powered_down() {
            self.power.mark_output();
        } else {
            self.output();
        }
    }

    /// Per-tick bookkeeping once no event is pending
    pub(crate) fn on_tick(&mut self) -> Flow {
        if self.power.tick() {
            self.blank();
        }
        self.claim.tick();
        if self.effect_countdown == 0 {
            return ControlFlow::Break(Aborted);
        }
        self.effect_countdown -= 1;
        if self.external_control > 0 {
            return ControlFlow::Break(Aborted);
        }
        ControlFlow::Continue(())
    }

    pub(crate) fn on_event(&mut self, event: ModemEvent) -> Flow {
        match event {
            ModemEvent::Connect(link) => {
                debug!("[CTRL] link {} connected", link);
                if self.modem.is_ready() {
                    self.modem
                        .request_send(link, SendSource::text(config::HELLO));
                }
            }
            ModemEvent::Disconnect(link) => debug!("[CTRL] link {} closed", link),
            ModemEvent::SendComplete(_) => {}
            ModemEvent::SendFailed(link) => {
                debug!("[CTRL] reply to link {} lost", link);
                self.reinit_pending = false;
            }
            ModemEvent::Packet { link, .. } => return self.on_packet(link),
        }
        ControlFlow::Continue(())
    }

    fn on_packet(&mut self, link: u8) -> Flow {
        let result = match self.next_byte() {
            b'D' => return self.push_frame(link),
            b'Y' => self.update_handoff(link),
            b'S' => self.set_magic(),
            b'Q' => self.query_status(link),
            b'P' => self.parameter_request(),
            b'E' => self.effect_request(),
            b'M' => self.mood_request(),
            b'W' => self.handshake(),
            b'L' => self.power_request(),
            b'V' => self.version(),
            _ => Ok(None),
        };
        self.respond(link, result);
        ControlFlow::Continue(())
    }

    fn respond(&mut self, link: u8, result: Reply) {
        match result {
            Ok(Some(source)) => {
                if !self.modem.request_send(link, source) {
                    debug!("[CTRL] reply to link {} dropped, modem busy", link);
                }
            }
            Ok(None) => {}
            Err(BoardError::ModemBusy) => debug!("[CTRL] request from link {} ignored", link),
            Err(err) => {
                warn!("[CTRL] link {}: {}", link, err);
                self.modem.request_send(link, SendSource::text("error"));
            }
        }
    }

    fn next_byte(&mut self) -> u8 {
        self.modem.read_packet_byte()
    }

    fn remaining(&self) -> usize {
        self.modem.packet_remaining() as usize
    }

    /// Consumes bytes while they match `text`
    fn expect_text(&mut self, text: &[u8]) -> bool {
        text.iter().all(|&b| self.next_byte() == b)
    }

    /// Ordinal argument; an empty packet names no valid entry
    fn ordinal(&mut self) -> u8 {
        if self.remaining() > 0 {
            self.next_byte()
        } else {
            u8::MAX
        }
    }

    fn require_ready(&self) -> Result<(), BoardError> {
        if self.modem.is_ready() {
            Ok(())
        } else {
            Err(BoardError::ModemBusy)
        }
    }

    /// Accepts a raw frame when arbitration allows it and takes the strip
    /// away from the running effect
    fn push_frame(&mut self, link: u8) -> Flow {
        let high_priority = match self.next_byte() {
            b'H' => true,
            b'L' => false,
            _ => return ControlFlow::Continue(()),
        };
        if self.power.is_powered_down() || !self.claim.admits(link, high_priority) {
            debug!("[CTRL] frame from link {} rejected", link);
            return ControlFlow::Continue(());
        }

        let count = self.led_count();
        for i in 0..count {
            let r = self.next_byte();
            let g = self.next_byte();
            let b = self.next_byte();
            self.frame[i] = RGB8::new(r, g, b);
        }
        self.claim = ImmediateClaim {
            owner: link,
            high_priority,
            remaining: config::IMMEDIATE_CLAIM_TICKS,
        };
        self.output();
        self.external_control = EXTERNAL_HOLD;
        ControlFlow::Break(Aborted)
    }

    fn update_handoff(&mut self, link: u8) -> Reply {
        if !self.expect_text(b"OLKA_BLST") {
            return Ok(None);
        }
        self.require_ready()?;
        info!("[BOOT] link {} requested the update image", link);
        self.modem.request_send(link, SendSource::text("RECONNECT"));
        self.modem.wait_until_ready(&self.store);
        self.modem.request_close(link);
        self.modem.flush();
        self.updater.enter_update_image();
        Ok(None)
    }

    fn set_magic(&mut self) -> Reply {
        if !self.expect_text(b"ETMAGIC") {
            return Ok(None);
        }
        self.require_ready()?;
        boot::confirm_update(&mut self.store);
        info!("[BOOT] update marker set");
        Ok(Some(SendSource::text("MAGICOK")))
    }

    fn query_status(&mut self, link: u8) -> Reply {
        if self.next_byte() != b'P' {
            return Ok(None);
        }
        self.require_ready()?;

        let mut status = 0u8;
        if self.power.is_lit() {
            status |= 0x01;
        }
        if self.power.sleep_timer() != 0 {
            status |= 0x02;
        }
        if self.power.wake_timer() != 0 {
            status |= 0x04;
        }
        if self.external_control > 0 {
            status |= 0x08;
        }
        if self.power.is_powered_down() || self.claim.blocks(link) {
            status |= 0x10;
        }

        let sample = self.sensors.sample();
        let voltage =
            ((sample.voltage as u32 * self.settings.voltage_adjust as u32 + 32768) >> 16) as u16;
        let temperature = (sample.temperature >> 6)
            .wrapping_sub(443)
            .wrapping_add(self.settings.temp_adjust as u16) as u8;
        let [led_lo, led_hi] = self.settings.led_count.to_le_bytes();
        let [volt_lo, volt_hi] = voltage.to_le_bytes();
        reply(&[
            b"qp",
            &[
                status,
                led_lo,
                led_hi,
                self.effects.len() as u8,
                volt_lo,
                volt_hi,
                temperature,
            ],
        ])
    }

    fn parameter_request(&mut self) -> Reply {
        match self.next_byte() {
            b'C' => {
                self.require_ready()?;
                if self.reinit_pending {
                    return Ok(None);
                }
                reply(&[b"pc", &[params::count()]])
            }
            b'D' => {
                self.require_ready()?;
                let ordinal = self.ordinal();
                let desc = params::describe(ordinal)?;
                let mut bounds: Vec<u8, 4> = Vec::new();
                if let Some((min, max)) = desc.declared_bounds() {
                    let encoded = match desc.kind {
                        ParamKind::U8 => bounds.extend_from_slice(&[min as u8, max as u8]),
                        _ => bounds
                            .extend_from_slice(&min.to_le_bytes())
                            .and_then(|()| bounds.extend_from_slice(&max.to_le_bytes())),
                    };
                    encoded.map_err(|_| BoardError::ProtocolError)?;
                }
                reply(&[
                    b"pd",
                    &[ordinal, desc.kind.code(), desc.name.len() as u8],
                    desc.name.as_bytes(),
                    &bounds,
                ])
            }
            b'I' => {
                self.require_ready()?;
                if self.reinit_pending {
                    return Ok(None);
                }
                info!("[CTRL] modem reinitialization scheduled");
                self.reinit_pending = true;
                Ok(Some(SendSource::text("REINIT")))
            }
            b'R' => {
                self.require_ready()?;
                let ordinal = self.ordinal();
                let value = params::read(&self.store, ordinal)?;
                reply(&[b"pr", &[ordinal, value.len() as u8], &value])
            }
            b'W' => {
                self.require_ready()?;
                let ordinal = if self.remaining() >= 2 {
                    self.next_byte()
                } else {
                    u8::MAX
                };
                let len = self.next_byte() as usize;
                let desc = params::describe(ordinal)?;
                if len > self.remaining() || len > desc.kind.size() {
                    return Err(crate::ParamError::BadLength.into());
                }
                let mut value: params::Value = Vec::new();
                for _ in 0..len {
                    let b = self.next_byte();
                    value.push(b).map_err(|_| BoardError::ProtocolError)?;
                }
                params::write(&mut self.store, ordinal, &value)?;
                self.settings.reload(&self.store);
                reply(&[b"pw", &[ordinal]])
            }
            _ => Ok(None),
        }
    }

    fn effect_request(&mut self) -> Reply {
        match self.next_byte() {
            b'C' => {
                self.require_ready()?;
                if self.reinit_pending {
                    return Ok(None);
                }
                reply(&[b"ec", &[self.effects.len() as u8]])
            }
            b'D' => {
                self.require_ready()?;
                let ordinal = self.ordinal();
                let effect = self
                    .effects
                    .get(ordinal as usize)
                    .ok_or(BoardError::ProtocolError)?;
                let name = effect.name();
                reply(&[b"ed", &[ordinal, name.len() as u8], name.as_bytes()])
            }
            b'S' => {
                let ordinal = self.ordinal();
                let effect = self
                    .effects
                    .get(ordinal as usize)
                    .ok_or(BoardError::ProtocolError)?;
                info!("[CTRL] effect {} selected", effect.name());
                self.next_effect = ordinal;
                self.external_control = self.external_control.min(SELECT_HOLD);
                self.effect_countdown = 0;
                reply(&[b"es", &[ordinal]])
            }
            _ => Ok(None),
        }
    }

    fn mood_request(&mut self) -> Reply {
        match self.next_byte() {
            b'S' => {
                if self.remaining() < 3 {
                    return Err(BoardError::ProtocolError);
                }
                let mood = RGB8::new(self.next_byte(), self.next_byte(), self.next_byte());
                self.power.set_mood(mood);
                reply(&[b"ms", &[mood.r, mood.g, mood.b]])
            }
            b'R' => {
                let mood = self.power.mood();
                reply(&[b"mr", &[mood.r, mood.g, mood.b]])
            }
            _ => Ok(None),
        }
    }

    fn handshake(&mut self) -> Reply {
        if self.remaining() < cipher::CHALLENGE_LEN {
            return Ok(None);
        }
        let mut challenge = [0u8; cipher::CHALLENGE_LEN];
        for b in challenge.iter_mut() {
            *b = self.next_byte();
        }
        Ok(cipher::respond(&challenge).and_then(|response| SendSource::copy_of(&response)))
    }

    fn timer_arg(&mut self) -> Result<u16, BoardError> {
        if self.remaining() < 2 {
            return Err(BoardError::ProtocolError);
        }
        let lo = self.next_byte();
        let hi = self.next_byte();
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn power_request(&mut self) -> Reply {
        match self.next_byte() {
            b'R' => {
                let [wake_lo, wake_hi] = self.power.wake_timer().to_le_bytes();
                let [sleep_lo, sleep_hi] = self.power.sleep_timer().to_le_bytes();
                reply(&[
                    b"lr",
                    &[
                        self.power.is_lit() as u8,
                        wake_lo,
                        wake_hi,
                        sleep_lo,
                        sleep_hi,
                    ],
                ])
            }
            b'O' => {
                if self.remaining() < 1 {
                    return Err(BoardError::ProtocolError);
                }
                let on = match self.next_byte() {
                    0 => false,
                    1 => true,
                    _ => return Err(BoardError::ProtocolError),
                };
                self.power.set_power(on);
                reply(&[b"lo", &[on as u8]])
            }
            b'W' => {
                let seconds = self.timer_arg()?;
                self.power.set_wake_timer(seconds);
                reply(&[b"lw", &seconds.to_le_bytes()])
            }
            b'S' => {
                let seconds = self.timer_arg()?;
                self.power.set_sleep_timer(seconds);
                reply(&[b"ls", &seconds.to_le_bytes()])
            }
            _ => Ok(None),
        }
    }

    fn version(&mut self) -> Reply {
        if self.next_byte() != b'R' {
            return Ok(None);
        }
        self.require_ready()?;
        let (day, month, year) = config::BUILD_DATE;
        let build = config::BUILD_NUMBER;
        reply(&[
            b"vr",
            b"YOLKA_WF",
            &[
                bcd(config::VERSION_MAJOR),
                bcd(config::VERSION_MINOR),
                bcd((build / 100) as u8),
                bcd((build % 100) as u8),
                bcd(day),
                bcd(month),
                bcd((year / 100) as u8),
                bcd((year % 100) as u8),
            ],
        ])
    }
}

impl<P: Platform> FrameSync for Controller<P> {
    fn led_count(&self) -> usize {
        (self.settings.led_count as usize).min(config::MAX_LEDS)
    }

    fn frame_mut(&mut self) -> &mut [RGB8] {
        let count = self.led_count();
        &mut self.frame[..count]
    }

    fn wait_frame(&mut self) -> Flow {
        loop {
            if self.reinit_pending && self.modem.is_ready() {
                self.reinit_pending = false;
                self.modem.request_reinit();
            }
            match self.modem.wait_for_tick(&self.store) {
                None => return self.on_tick(),
                Some(event) => self.on_event(event)?,
            }
        }
    }

    fn sync_out(&mut self) -> Flow {
        self.wait_frame()?;
        if self.power.is_powered_down() {
            return ControlFlow::Break(Aborted);
        }
        self.output();
        ControlFlow::Continue(())
    }

    fn sync_out_pause(&mut self, skip: u8) -> Flow {
        self.sync_out()?;
        for _ in 0..skip {
            if self.power.needs_reoutput() {
                self.sync_out()?;
            } else {
                self.wait_frame()?;
            }
        }
        ControlFlow::Continue(())
    }

    fn random16(&mut self) -> u16 {
        self.rng.next_u16()
    }
}
