//! Frame synchronization API and the built-in effects
//!
//! Effects render into the shared frame and hand it to [`FrameSync`] once per
//! tick. A `Break` from any sync call means the frame now belongs to someone
//! else: the effect must return at once without touching it again.

use core::ops::ControlFlow;

use smart_leds::RGB8;
use smart_leds::hsv::{Hsv, hsv2rgb};

/// The current effect has to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// Result of every frame synchronization call
pub type Flow = ControlFlow<Aborted>;

/// What an effect can ask of the controller
pub trait FrameSync {
    /// Active strip length
    fn led_count(&self) -> usize;

    /// Shared frame, `led_count()` pixels long
    fn frame_mut(&mut self) -> &mut [RGB8];

    /// Services the network until the next tick
    fn wait_frame(&mut self) -> Flow;

    /// Waits for the next tick and writes the frame
    fn sync_out(&mut self) -> Flow;

    /// Like [`sync_out`](Self::sync_out), then holds the frame for `skip`
    /// more ticks, rewriting it only when brightness changes
    fn sync_out_pause(&mut self, skip: u8) -> Flow;

    fn random16(&mut self) -> u16;

    fn random8(&mut self) -> u8 {
        (self.random16() >> 1) as u8
    }

    /// Uniform in `0..n`
    fn random(&mut self, n: u8) -> u8 {
        ((self.random16() as u32 * n as u32) >> 16) as u8
    }

    /// Uniform in `0..n`
    fn random_wide(&mut self, n: u16) -> u16 {
        ((self.random16() as u32 * n as u32) >> 16) as u16
    }
}

/// 32-bit linear congruential generator; outputs the high half
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u16(&mut self) -> u16 {
        self.state = self.state.wrapping_mul(0x0808_8405).wrapping_add(1);
        (self.state >> 16) as u16
    }
}

/// A renderer driven through [`FrameSync`]
pub trait Effect: Sync {
    fn name(&self) -> &'static str;

    /// Renders until the controller breaks the flow
    fn run(&self, sync: &mut dyn FrameSync) -> Flow;
}

/// Effects shipped with the firmware
pub static BUILTIN: [&'static dyn Effect; 3] = [&Breathing, &Rainbow, &Sparkles];

/// White breathing
pub struct Breathing;

impl Breathing {
    const MIN: u8 = 30;
    const MAX: u8 = 180;
    const STEP: u8 = 2;
}

impl Effect for Breathing {
    fn name(&self) -> &'static str {
        "Breathing"
    }

    fn run(&self, sync: &mut dyn FrameSync) -> Flow {
        let mut level = Self::MIN;
        let mut rising = true;
        loop {
            sync.frame_mut().fill(RGB8::new(level, level, level));
            sync.sync_out()?;

            if rising {
                level += Self::STEP;
                rising = level < Self::MAX;
            } else {
                level -= Self::STEP;
                rising = level <= Self::MIN;
            }
        }
    }
}

/// Hue wheel spread over the strip, slowly rotating
pub struct Rainbow;

impl Effect for Rainbow {
    fn name(&self) -> &'static str {
        "Rainbow"
    }

    fn run(&self, sync: &mut dyn FrameSync) -> Flow {
        let mut hue = sync.random8();
        loop {
            let count = sync.led_count().max(1);
            for (i, px) in sync.frame_mut().iter_mut().enumerate() {
                let offset = (i * 256 / count) as u8;
                *px = hsv2rgb(Hsv {
                    hue: hue.wrapping_add(offset),
                    sat: 255,
                    val: 255,
                });
            }
            sync.sync_out_pause(1)?;
            hue = hue.wrapping_add(1);
        }
    }
}

/// Random pale twinkles fading out
pub struct Sparkles;

impl Sparkles {
    fn fade(c: u8) -> u8 {
        c - (c >> 3) - (c > 0) as u8
    }
}

impl Effect for Sparkles {
    fn name(&self) -> &'static str {
        "Sparkles"
    }

    fn run(&self, sync: &mut dyn FrameSync) -> Flow {
        sync.frame_mut().fill(RGB8::default());
        loop {
            for px in sync.frame_mut().iter_mut() {
                *px = RGB8::new(Self::fade(px.r), Self::fade(px.g), Self::fade(px.b));
            }

            let count = sync.led_count() as u16;
            if count > 0 {
                for _ in 0..1 + count / 32 {
                    let index = sync.random_wide(count) as usize;
                    let hue = sync.random8();
                    let color = hsv2rgb(Hsv {
                        hue,
                        sat: 64,
                        val: 255,
                    });
                    if let Some(px) = sync.frame_mut().get_mut(index) {
                        *px = color;
                    }
                }
            }
            sync.sync_out()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts a fixed number of frames, then breaks
    struct ScriptedSync {
        frame: std::vec::Vec<RGB8>,
        budget: usize,
        outputs: std::vec::Vec<std::vec::Vec<RGB8>>,
        rng: Lcg,
        aborted: bool,
    }

    impl ScriptedSync {
        fn new(leds: usize, budget: usize) -> Self {
            Self {
                frame: vec![RGB8::default(); leds],
                budget,
                outputs: std::vec::Vec::new(),
                rng: Lcg::new(7),
                aborted: false,
            }
        }
    }

    impl FrameSync for ScriptedSync {
        fn led_count(&self) -> usize {
            self.frame.len()
        }

        fn frame_mut(&mut self) -> &mut [RGB8] {
            assert!(!self.aborted, "frame touched after abort");
            &mut self.frame
        }

        fn wait_frame(&mut self) -> Flow {
            if self.budget == 0 {
                self.aborted = true;
                return ControlFlow::Break(Aborted);
            }
            self.budget -= 1;
            ControlFlow::Continue(())
        }

        fn sync_out(&mut self) -> Flow {
            self.wait_frame()?;
            self.outputs.push(self.frame.clone());
            ControlFlow::Continue(())
        }

        fn sync_out_pause(&mut self, skip: u8) -> Flow {
            self.sync_out()?;
            for _ in 0..skip {
                self.wait_frame()?;
            }
            ControlFlow::Continue(())
        }

        fn random16(&mut self) -> u16 {
            self.rng.next_u16()
        }
    }

    #[test]
    fn generator_matches_reference_sequence() {
        let mut rng = Lcg::new(0);
        assert_eq!(rng.next_u16(), 0x0000);
        assert_eq!(rng.next_u16(), 0x0808);
        let mut sync = ScriptedSync::new(1, 0);
        for n in [1u8, 7, 255] {
            for _ in 0..100 {
                assert!(sync.random(n) < n);
            }
        }
        assert_eq!(sync.random_wide(0), 0);
    }

    #[test]
    fn breathing_ramps_between_bounds() {
        let mut sync = ScriptedSync::new(4, 200);
        assert_eq!(Breathing.run(&mut sync), ControlFlow::Break(Aborted));
        let levels: std::vec::Vec<u8> = sync.outputs.iter().map(|f| f[0].r).collect();
        assert_eq!(levels[0], 30);
        assert_eq!(*levels.iter().max().unwrap(), 180);
        assert_eq!(*levels.iter().min().unwrap(), 30);
        assert_eq!(levels[75], 180);
        assert_eq!(levels[76], 178);
        assert_eq!(levels[150], 30);
        assert_eq!(levels[151], 32);
    }

    #[test]
    fn rainbow_fills_strip_and_pauses() {
        let mut sync = ScriptedSync::new(8, 10);
        let _ = Rainbow.run(&mut sync);
        assert_eq!(sync.outputs.len(), 5);
        assert!(
            sync.outputs[0]
                .iter()
                .all(|px| px.r as u16 + px.g as u16 + px.b as u16 > 0)
        );
        assert_ne!(sync.outputs[0], sync.outputs[1]);
    }

    #[test]
    fn sparkles_light_and_fade() {
        let mut sync = ScriptedSync::new(64, 40);
        let _ = Sparkles.run(&mut sync);
        assert_eq!(sync.outputs.len(), 40);
        assert!(sync.outputs.iter().all(|f| f.iter().any(|px| px.r > 0)));
        assert_eq!(Sparkles::fade(1), 0);
        assert_eq!(Sparkles::fade(0), 0);
        assert_eq!(Sparkles::fade(255), 223);
    }

    #[test]
    fn effects_stop_without_touching_frame_after_abort() {
        for effect in BUILTIN {
            for budget in 0..4 {
                let mut sync = ScriptedSync::new(16, budget);
                assert_eq!(effect.run(&mut sync), ControlFlow::Break(Aborted));
                assert!(sync.aborted, "{} ended on its own", effect.name());
            }
        }
    }
}
