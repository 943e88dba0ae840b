//! Strip power and brightness animation
//!
//! The applied brightness is the client's mood color scaled by an animated
//! scaler. Sleep and wake timers count whole seconds and start the matching
//! animation when they expire.

use log::{debug, info};
use smart_leds::RGB8;

use crate::config::TICKS_PER_SECOND;

const SLEEP_STEP: u8 = 1;
const WAKE_STEP: u8 = 1;
const POWER_OFF_STEP: u8 = 8;
const POWER_ON_STEP: u8 = 5;

/// Brightness ramp in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Animation {
    None,
    Wake,
    Sleep,
    PowerOn,
    PowerOff,
}

impl Animation {
    fn advance(self, scaler: u8) -> u8 {
        match self {
            Animation::None => scaler,
            Animation::Sleep => scaler.saturating_sub(SLEEP_STEP),
            Animation::PowerOff => scaler.saturating_sub(POWER_OFF_STEP),
            Animation::Wake => scaler.saturating_add(WAKE_STEP),
            Animation::PowerOn => scaler.saturating_add(POWER_ON_STEP),
        }
    }

    fn is_dimming(self) -> bool {
        matches!(self, Animation::Sleep | Animation::PowerOff)
    }
}

/// Power and brightness state of the strip
#[derive(Debug, Clone)]
pub struct PowerState {
    scaler: u8,
    animation: Animation,
    sleep_timer: u16,
    wake_timer: u16,
    second_countdown: u16,
    mood: RGB8,
    brightness: RGB8,
    powered_down: bool,
    need_reoutput: bool,
}

impl Default for PowerState {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerState {
    /// Dark strip fading in
    pub fn new() -> Self {
        let mut state = Self {
            scaler: 0,
            animation: Animation::PowerOn,
            sleep_timer: 0,
            wake_timer: 0,
            second_countdown: TICKS_PER_SECOND,
            mood: RGB8::new(128, 128, 128),
            brightness: RGB8::default(),
            powered_down: false,
            need_reoutput: false,
        };
        state.recalculate();
        state
    }

    /// Advances one tick. Returns `true` when the strip just went dark and
    /// must be blanked.
    pub fn tick(&mut self) -> bool {
        self.second_countdown -= 1;
        if self.second_countdown == 0 {
            self.second_countdown = TICKS_PER_SECOND;
            self.tick_second();
        }

        if self.animation == Animation::None {
            return false;
        }
        self.scaler = self.animation.advance(self.scaler);
        self.recalculate();
        match self.scaler {
            0 => {
                self.animation = Animation::None;
                self.powered_down = true;
                self.need_reoutput = false;
                info!("[LED] strip powered down");
                true
            }
            255 => {
                self.animation = Animation::None;
                false
            }
            _ => false,
        }
    }

    fn tick_second(&mut self) {
        if self.sleep_timer > 0 {
            self.sleep_timer -= 1;
            if self.sleep_timer == 0 {
                info!("[LED] sleep timer expired");
                self.animation = Animation::Sleep;
            }
        }
        if self.wake_timer > 0 {
            self.wake_timer -= 1;
            if self.wake_timer == 0 {
                info!("[LED] wake timer expired");
                self.powered_down = false;
                self.animation = Animation::Wake;
            }
        }
    }

    fn recalculate(&mut self) {
        self.brightness = if self.scaler == 255 {
            self.mood
        } else {
            let s = self.scaler as u16;
            let scale = |c: u8| ((c as u16 * s + 128) >> 8) as u8;
            RGB8::new(scale(self.mood.r), scale(self.mood.g), scale(self.mood.b))
        };
        self.need_reoutput = true;
    }

    pub fn mood(&self) -> RGB8 {
        self.mood
    }

    pub fn set_mood(&mut self, mood: RGB8) {
        self.mood = mood;
        self.recalculate();
    }

    /// Per-channel brightness applied on output
    pub fn brightness(&self) -> RGB8 {
        self.brightness
    }

    pub fn scaler(&self) -> u8 {
        self.scaler
    }

    pub fn animation(&self) -> Animation {
        self.animation
    }

    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    /// On and not fading out
    pub fn is_lit(&self) -> bool {
        !self.powered_down && !self.animation.is_dimming()
    }

    /// Brightness changed since the frame was last written
    pub fn needs_reoutput(&self) -> bool {
        self.need_reoutput
    }

    pub fn mark_output(&mut self) {
        self.need_reoutput = false;
    }

    pub fn wake_timer(&self) -> u16 {
        self.wake_timer
    }

    pub fn sleep_timer(&self) -> u16 {
        self.sleep_timer
    }

    /// Explicit on/off. The opposing timer survives only when it is armed
    /// to fire after the other one.
    pub fn set_power(&mut self, on: bool) {
        if on {
            self.powered_down = false;
            self.animation = Animation::PowerOn;
            if self.sleep_timer == 0 || self.wake_timer <= self.sleep_timer {
                self.wake_timer = 0;
            }
        } else {
            self.animation = Animation::PowerOff;
            if self.wake_timer == 0 || self.sleep_timer <= self.wake_timer {
                self.sleep_timer = 0;
            }
        }
        debug!("[LED] power {}", if on { "on" } else { "off" });
    }

    /// Arms the wake timer in seconds; zero disarms it
    pub fn set_wake_timer(&mut self, seconds: u16) {
        self.wake_timer = seconds;
        if seconds == 0 {
            return;
        }
        if self.sleep_timer != 0 {
            if seconds < self.sleep_timer {
                self.sleep_timer = 0;
                self.powered_down = false;
                self.animation = Animation::PowerOn;
            }
        } else if !self.powered_down {
            // go dark now so the timer has something to wake
            self.animation = Animation::PowerOff;
        }
    }

    /// Arms the sleep timer in seconds; zero disarms it
    pub fn set_sleep_timer(&mut self, seconds: u16) {
        self.sleep_timer = seconds;
        if seconds != 0 && (self.wake_timer == 0 || seconds < self.wake_timer) {
            self.powered_down = false;
            self.animation = Animation::PowerOn;
        }
    }
}
