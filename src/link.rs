//! BLE link status and the pairing key combo.
//!
//! Link indicator table:
//!
//! | Resting state  | Link LED                |
//! |----------------|-------------------------|
//! | `Disconnected` | off                     |
//! | `Advertising`  | blinking (500 ms)       |
//! | `Connected`    | solid on                |
//!
//! After a pairing request, `Advertising` blinks at the faster pairing
//! period until a connection is made.
//!
//! Holding the connect combo alone for the configured time fires a single
//! pairing request. The combo timer is only reset by the held keys
//! changing, never by link churn.

use crate::combo::{ComboTimer, HeldKeys};
use crate::config::{
    PairingConfig, ERROR_BLINKS_BAD_LINK_STATE, ERROR_BLINKS_DISCONNECT, ERROR_BLINK_PERIOD_MS,
    LINK_ADV_BLINK_PERIOD_MS, LINK_PAIRING_BLINK_PERIOD_MS,
};
use crate::event::Event;
use crate::indicator::{Led, LedMode};

/// Raw link state codes reported by the transport.
pub mod raw {
    pub const IDLE: u32 = 0;
    pub const DISCONNECTED: u32 = 1;
    pub const DISCOVERABLE: u32 = 2;
    pub const RECONNECTING: u32 = 3;
    pub const CONNECTED: u32 = 4;
}

/// Resting link state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Disconnected,
    /// Advertising or connecting.
    Advertising,
    Connected,
}

impl LinkState {
    /// Default classification of [`raw`] codes.
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            raw::IDLE | raw::DISCONNECTED => Some(LinkState::Disconnected),
            raw::DISCOVERABLE | raw::RECONNECTING => Some(LinkState::Advertising),
            raw::CONNECTED => Some(LinkState::Connected),
            _ => None,
        }
    }

    /// Link LED mode for this state.
    pub fn indicator(self) -> LedMode {
        match self {
            LinkState::Disconnected => LedMode::Off,
            LinkState::Advertising => LedMode::Blink {
                count: 0,
                period_ms: LINK_ADV_BLINK_PERIOD_MS,
            },
            LinkState::Connected => LedMode::On,
        }
    }
}

/// Outputs of the link state machine.
pub trait LinkActions {
    fn indicate(&mut self, led: Led, mode: LedMode);

    /// Ask the transport to begin pairing.
    fn request_pairing(&mut self);
}

pub struct LinkStateMachine {
    config: PairingConfig,
    state: LinkState,
    last_raw: Option<u32>,
    held: HeldKeys,
    combo: ComboTimer,
    pairing_requests: u32,
    /// A pairing request is outstanding.
    pairing: bool,
}

impl LinkStateMachine {
    pub const fn new(config: PairingConfig) -> Self {
        Self {
            config,
            state: LinkState::Disconnected,
            last_raw: None,
            held: HeldKeys::new(),
            combo: ComboTimer::new(),
            pairing_requests: 0,
            pairing: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Number of times the pairing combo fired.
    pub fn pairing_requests(&self) -> u32 {
        self.pairing_requests
    }

    /// `true` from a pairing request until the next connection.
    pub fn is_pairing(&self) -> bool {
        self.pairing
    }

    /// Link LED mode for `state`, taking an outstanding pairing request
    /// into account.
    fn link_indicator(&self, state: LinkState) -> LedMode {
        match state {
            LinkState::Advertising if self.pairing => LedMode::Blink {
                count: 0,
                period_ms: LINK_PAIRING_BLINK_PERIOD_MS,
            },
            _ => state.indicator(),
        }
    }

    /// Hold time accumulated for the current key mask (ms).
    pub fn combo_held_ms(&self) -> u32 {
        self.combo.held_ms()
    }

    /// Handle a transport notification.
    ///
    /// `classified` is the transport's reading of `raw`; `None` means the
    /// value is malformed. Repeats of the previous raw value are ignored.
    pub fn transport_state_changed(
        &mut self,
        raw: u32,
        classified: Option<LinkState>,
        out: &mut impl LinkActions,
    ) {
        if self.last_raw == Some(raw) {
            trace!("Link state {} unchanged", raw);
            return;
        }
        self.last_raw = Some(raw);

        let Some(next) = classified else {
            warn!("Unrecognised link state {}; keeping {}", raw, self.state);
            out.indicate(
                Led::Error,
                LedMode::Blink {
                    count: ERROR_BLINKS_BAD_LINK_STATE,
                    period_ms: ERROR_BLINK_PERIOD_MS,
                },
            );
            return;
        };

        if self.state == LinkState::Connected && next == LinkState::Disconnected {
            warn!("Link dropped unexpectedly");
            out.indicate(
                Led::Error,
                LedMode::Blink {
                    count: ERROR_BLINKS_DISCONNECT,
                    period_ms: ERROR_BLINK_PERIOD_MS,
                },
            );
        }

        info!("Link: {} -> {} (raw {})", self.state, next, raw);
        if next == LinkState::Connected {
            self.pairing = false;
        }
        self.state = next;
        out.indicate(Led::Link, self.link_indicator(next));
    }

    /// Feed a dequeued event to the combo detector.
    pub fn on_key_event(&mut self, event: &Event, out: &mut impl LinkActions) {
        let Some((index, down)) = event.key_transition() else {
            return;
        };
        self.held.apply(index, down);
        self.combo.update(self.held.mask(), event.stamp());
        self.evaluate(out);
    }

    /// Forget every held key as of `now`.
    ///
    /// Used when key events were lost; a combo must be pressed again.
    pub fn release_all(&mut self, now: u32) {
        self.held = HeldKeys::new();
        self.combo.update(0, now);
    }

    /// Re-evaluate the combo at `now` (ms) without a new key event.
    pub fn poll(&mut self, now: u32, out: &mut impl LinkActions) {
        self.combo.advance(now);
        self.evaluate(out);
    }

    fn evaluate(&mut self, out: &mut impl LinkActions) {
        if !self.combo.check(self.config.combo_mask, self.config.hold_ms) {
            return;
        }

        info!(
            "Connect combo held {} ms - entering pairing",
            self.combo.held_ms()
        );
        self.pairing_requests = self.pairing_requests.wrapping_add(1);
        out.request_pairing();

        self.state = LinkState::Advertising;
        self.pairing = true;
        // Apply the transport's next report even if its raw value repeats.
        self.last_raw = None;
        out.indicate(Led::Link, self.link_indicator(LinkState::Advertising));
    }
}
