//! Status LEDs.
//!
//! The core only issues [`Indicator::set`] requests. [`LedBank`] renders
//! them on two GPIO pins; the platform calls [`LedBank::tick`] periodically
//! to advance blink patterns.

use embedded_hal::digital::OutputPin;

/// Logical LEDs of the remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    /// Red: errors and audio activity.
    Error,
    /// Green: BLE link status.
    Link,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedMode {
    Off,
    On,
    /// Blink `count` times (0 = until replaced) with the given period.
    Blink { count: u8, period_ms: u16 },
}

/// Sink for LED requests.
pub trait Indicator {
    fn set(&mut self, led: Led, mode: LedMode);
}

struct Channel<P> {
    pin: P,
    active_low: bool,
    mode: LedMode,
    lit: bool,
    /// Set by `set`; the next tick re-anchors the blink phase.
    restart: bool,
    toggled_at: u32,
    /// Half-periods left for a finite blink.
    phases_left: u16,
}

impl<P: OutputPin> Channel<P> {
    fn new(pin: P, active_low: bool) -> Self {
        let mut channel = Self {
            pin,
            active_low,
            mode: LedMode::Off,
            lit: false,
            restart: false,
            toggled_at: 0,
            phases_left: 0,
        };
        channel.drive(false);
        channel
    }

    fn drive(&mut self, lit: bool) {
        self.lit = lit;
        // A failed GPIO write only affects the LED; nothing to recover.
        let _ = if lit != self.active_low {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
    }

    fn set(&mut self, mode: LedMode) {
        self.mode = mode;
        match mode {
            LedMode::Off => self.drive(false),
            LedMode::On => self.drive(true),
            LedMode::Blink { count, .. } => {
                self.phases_left = u16::from(count) * 2;
                self.restart = true;
                self.drive(true);
            }
        }
    }

    fn tick(&mut self, now: u32) {
        let LedMode::Blink { count, period_ms } = self.mode else {
            return;
        };
        if self.restart {
            self.restart = false;
            self.toggled_at = now;
            return;
        }

        let half = u32::from(period_ms / 2).max(1);
        if now.wrapping_sub(self.toggled_at) < half {
            return;
        }
        self.toggled_at = now;

        if count > 0 {
            self.phases_left = self.phases_left.saturating_sub(1);
            if self.phases_left == 0 {
                self.mode = LedMode::Off;
                self.drive(false);
                return;
            }
        }
        self.drive(!self.lit);
    }
}

/// Two GPIO-driven LEDs implementing [`Indicator`].
pub struct LedBank<E, L> {
    error: Channel<E>,
    link: Channel<L>,
}

impl<E: OutputPin, L: OutputPin> LedBank<E, L> {
    /// Both LEDs start off. `active_low` applies to both pins.
    pub fn new(error_pin: E, link_pin: L, active_low: bool) -> Self {
        Self {
            error: Channel::new(error_pin, active_low),
            link: Channel::new(link_pin, active_low),
        }
    }

    /// Advance blink patterns to `now` (ms).
    pub fn tick(&mut self, now: u32) {
        self.error.tick(now);
        self.link.tick(now);
    }

    /// Current logical state of `led`.
    pub fn is_lit(&self, led: Led) -> bool {
        match led {
            Led::Error => self.error.lit,
            Led::Link => self.link.lit,
        }
    }

    pub fn mode(&self, led: Led) -> LedMode {
        match led {
            Led::Error => self.error.mode,
            Led::Link => self.link.mode,
        }
    }
}

impl<E: OutputPin, L: OutputPin> Indicator for LedBank<E, L> {
    fn set(&mut self, led: Led, mode: LedMode) {
        trace!("LED {} -> {}", led, mode);
        match led {
            Led::Error => self.error.set(mode),
            Led::Link => self.link.set(mode),
        }
    }
}
