//! Input events produced by the key scanner, the audio pipeline and user code.
//!
//! Every variant carries a millisecond `stamp` taken by the producer. Events
//! are plain `Copy` values so the queue can store them in a flat array of
//! equally sized slots.

use crate::config::MAX_EVENT_SIZE;

/// Length of the opaque payload carried by [`Event::Any`].
pub const ANY_PAYLOAD_LEN: usize = 8;

/// Length of the payload carried by [`Event::UserDefine`].
pub const USER_PAYLOAD_LEN: usize = 4;

/// `Info` code: microphone streaming started.
pub const AUDIO_START: u8 = 0x10;

/// `Info` code: microphone streaming stopped.
pub const AUDIO_STOP: u8 = 0x11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Generic header-only event.
    Info { code: u8, stamp: u32 },
    /// A discrete button changed state.
    ButtonStateChange { button: u8, pressed: bool, stamp: u32 },
    /// A key-matrix key went up or down.
    Key {
        index: u8,
        down: bool,
        modifiers: u8,
        stamp: u32,
    },
    /// Opaque payload for event kinds this core does not interpret.
    Any {
        code: u8,
        data: [u8; ANY_PAYLOAD_LEN],
        stamp: u32,
    },
    /// Application specific payload.
    UserDefine {
        data: [u8; USER_PAYLOAD_LEN],
        stamp: u32,
    },
}

// Slots are sized for the largest variant; keep that bounded.
const _: () = assert!(core::mem::size_of::<Event>() <= MAX_EVENT_SIZE);

impl Event {
    pub const fn key(index: u8, down: bool, stamp: u32) -> Self {
        Event::Key {
            index,
            down,
            modifiers: 0,
            stamp,
        }
    }

    pub const fn button(button: u8, pressed: bool, stamp: u32) -> Self {
        Event::ButtonStateChange {
            button,
            pressed,
            stamp,
        }
    }

    pub const fn info(code: u8, stamp: u32) -> Self {
        Event::Info { code, stamp }
    }

    /// Producer timestamp (ms).
    pub fn stamp(&self) -> u32 {
        match *self {
            Event::Info { stamp, .. }
            | Event::ButtonStateChange { stamp, .. }
            | Event::Key { stamp, .. }
            | Event::Any { stamp, .. }
            | Event::UserDefine { stamp, .. } => stamp,
        }
    }

    /// Key or button transition as `(index, down)`.
    ///
    /// Buttons share the key index space.
    pub fn key_transition(&self) -> Option<(u8, bool)> {
        match *self {
            Event::Key { index, down, .. } => Some((index, down)),
            Event::ButtonStateChange {
                button, pressed, ..
            } => Some((button, pressed)),
            _ => None,
        }
    }

    /// Returns `true` for `Info` audio stream tokens.
    pub fn is_audio_token(&self) -> bool {
        matches!(
            self,
            Event::Info {
                code: AUDIO_START | AUDIO_STOP,
                ..
            }
        )
    }
}
