//! Application-wide constants and compile-time configuration.
//!
//! Key indices, timing parameters and protocol limits live here so they
//! can be tuned in one place.

// BLE

/// Advertised device name.
pub const BT_LOCAL_NAME: &str = "BLE RCU";

// Event queue

/// Maximum number of events held by the application queue.
pub const APP_QUEUE_MAX: usize = 44;

/// Upper bound for the in-memory size of one queued event (bytes).
pub const MAX_EVENT_SIZE: usize = 20;

// Key scan

/// HOME button; holding it alone enters pairing mode.
pub const CONNECT_INDEX: u8 = 13;

/// Held-key bitmask that triggers pairing.
pub const CONNECT_COMBO: u32 = 1 << CONNECT_INDEX;

/// How long the connect combo must be held (seconds).
pub const CONNECT_COMBO_HOLD_TIME_SECS: u32 = 10;

// Set-Report

/// Largest accepted audio data/control payload (bytes).
pub const MAX_AUDIO_REPORT_LEN: usize = 64;

// LEDs
//
// nRF52840-DK defaults, both active-low:
//   LED_ERROR   (red role)   → P0.13
//   LED_LE_LINK (green role) → P0.14
//   HOME button              → P0.11

/// Blink period of the link LED while advertising (ms).
pub const LINK_ADV_BLINK_PERIOD_MS: u16 = 500;

/// Blink period of the link LED right after the pairing combo fired (ms).
pub const LINK_PAIRING_BLINK_PERIOD_MS: u16 = 200;

/// Blink period of error LED bursts (ms).
pub const ERROR_BLINK_PERIOD_MS: u16 = 100;

/// Error LED blinks for an unexpected disconnect.
pub const ERROR_BLINKS_DISCONNECT: u8 = 2;

/// Error LED blinks for a link state the transport could not classify.
pub const ERROR_BLINKS_BAD_LINK_STATE: u8 = 4;

// Firmware timing

/// Button debounce delay (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 20;

/// Consumer wake-up period when no event arrives; also the LED blink
/// resolution (ms).
pub const APP_TICK_MS: u64 = 20;

/// Runtime pairing-combo configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingConfig {
    /// Exact held-key bitmask that arms the pairing trigger.
    pub combo_mask: u32,
    /// Accumulated hold time required before firing (ms).
    pub hold_ms: u32,
}

impl PairingConfig {
    pub const fn new(combo_mask: u32, hold_ms: u32) -> Self {
        Self {
            combo_mask,
            hold_ms,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self::new(CONNECT_COMBO, CONNECT_COMBO_HOLD_TIME_SECS * 1000)
    }
}
