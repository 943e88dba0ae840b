//! Effect scheduling loop

use log::info;

use crate::config::TICKS_PER_SECOND;
use crate::dispatcher::{Controller, Platform};
use crate::effects::FrameSync;

impl<P: Platform> Controller<P> {
    /// Runs one effect until it is interrupted, then waits out any external
    /// control or power-down
    pub fn run_once(&mut self) {
        let current = self.next_effect;
        if self.effect_countdown == 0 {
            self.schedule_next(current);
        }

        if let Some(effect) = self.effects.get(current as usize).copied() {
            info!("[CTRL] running {}", effect.name());
            let _ = effect.run(self);
        }

        while self.external_control > 0 || self.power.is_powered_down() {
            self.external_control = self.external_control.saturating_sub(1);
            let _ = self.wait_frame();
            self.refresh_held_frame();
        }
    }

    pub fn run(&mut self) -> ! {
        loop {
            self.run_once();
        }
    }

    /// Picks a different effect and how long `current` may run
    fn schedule_next(&mut self, current: u8) {
        let count = self.effects.len() as u8;
        if count > 1 {
            let mut next = self.random(count - 1);
            if next >= current {
                next += 1;
            }
            self.next_effect = next;
        }
        let spread = self.random_wide(self.settings.effect_time_add as u16 * TICKS_PER_SECOND);
        self.effect_countdown = self.settings.effect_time as u16 * TICKS_PER_SECOND + spread;
    }
}
