//! Set-Report routing.
//!
//! The host delivers output and feature data with a HID "Set Report"
//! control transfer. Each message is identified by a report type and a
//! report ID; IDs are only meaningful inside their type's namespace, so the
//! routing key is always the `(type, id)` pair:
//!
//! ```text
//! (Output,  0x01 KB_LED)      → key subsystem LED handler
//! (Output,  0xF7 AUDIO_DATA)  → audio
//! (Output,  0xF8 AUDIO_CTL)   → audio
//! (Feature, 0xCC CNT_CTL)     → battery / count control
//! (Feature, 0xF7 AUDIO_DATA)  → audio
//! (Feature, 0xF8 AUDIO_CTL)   → audio
//! ```
//!
//! Anything else is counted and ignored.

use crate::config::MAX_AUDIO_REPORT_LEN;
use crate::error::DispatchError;

/// Voice (audio data) report ID shared by all three namespaces.
pub const VOICE_REPORT_ID: u8 = 0xF7;

/// Voice control report ID shared by all three namespaces.
pub const VOICE_CTL_REPORT_ID: u8 = 0xF8;

/// Input report IDs (device → host).
pub mod input {
    pub const STD_KEY: u8 = 0x01;
    pub const BIT_MAPPED: u8 = 0x02;
    pub const BATTERY: u8 = 0x03;
    pub const MEDIA_KEY: u8 = 0x0A;
    pub const CNT_CTL: u8 = 0xCC;
    pub const AUDIO_DATA: u8 = super::VOICE_REPORT_ID;
    pub const AUDIO_CTL: u8 = super::VOICE_CTL_REPORT_ID;
    pub const NOT_USED: u8 = 0xFF;
    pub const CLIENT_CHAR_CONF: u8 = 0xFF;
}

/// Output report IDs (host → device).
pub mod output {
    pub const KB_LED: u8 = 0x01;
    pub const AUDIO_DATA: u8 = super::VOICE_REPORT_ID;
    pub const AUDIO_CTL: u8 = super::VOICE_CTL_REPORT_ID;
}

/// Feature report IDs.
pub mod feature {
    pub const CNT_CTL: u8 = 0xCC;
    pub const AUDIO_DATA: u8 = super::VOICE_REPORT_ID;
    pub const AUDIO_CTL: u8 = super::VOICE_CTL_REPORT_ID;
}

/// HID report type of a Set-Report message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportType {
    Input,
    Output,
    Feature,
}

impl ReportType {
    /// Decode the HID report type code (1 = input, 2 = output, 3 = feature).
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ReportType::Input),
            2 => Some(ReportType::Output),
            3 => Some(ReportType::Feature),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            ReportType::Input => 1,
            ReportType::Output => 2,
            ReportType::Feature => 3,
        }
    }
}

/// Destination of a routed Set-Report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// Keyboard LED state for the key subsystem.
    KeyboardLed,
    /// Audio data for the audio subsystem.
    AudioData,
    /// Audio control for the audio subsystem.
    AudioControl,
    /// Connection count control for the battery / count-control subsystem.
    CountControl,
}

impl Route {
    /// Whether a payload of `len` bytes is acceptable for this route.
    pub fn accepts_len(self, len: usize) -> bool {
        match self {
            Route::KeyboardLed => len == 1,
            Route::CountControl => len >= 1,
            Route::AudioData | Route::AudioControl => (1..=MAX_AUDIO_REPORT_LEN).contains(&len),
        }
    }
}

const ROUTES: [(ReportType, u8, Route); 6] = [
    (ReportType::Output, output::KB_LED, Route::KeyboardLed),
    (ReportType::Output, output::AUDIO_DATA, Route::AudioData),
    (ReportType::Output, output::AUDIO_CTL, Route::AudioControl),
    (ReportType::Feature, feature::CNT_CTL, Route::CountControl),
    (ReportType::Feature, feature::AUDIO_DATA, Route::AudioData),
    (ReportType::Feature, feature::AUDIO_CTL, Route::AudioControl),
];

/// Look up the route for a `(type, id)` pair.
pub fn route(report_type: ReportType, report_id: u8) -> Option<Route> {
    ROUTES
        .iter()
        .find(|(t, id, _)| *t == report_type && *id == report_id)
        .map(|(_, _, r)| *r)
}

/// Resolves Set-Report messages and keeps diagnostic counters.
#[derive(Debug, Default)]
pub struct ReportDispatcher {
    unroutable: u32,
    malformed: u32,
}

impl ReportDispatcher {
    pub const fn new() -> Self {
        Self {
            unroutable: 0,
            malformed: 0,
        }
    }

    /// Resolve a Set-Report into its route and validated payload.
    ///
    /// `payload_len` is the length announced by the transport; it must fit
    /// inside `payload` and satisfy the route's length rule.
    pub fn resolve<'p>(
        &mut self,
        report_type: ReportType,
        report_id: u8,
        payload: &'p [u8],
        payload_len: u16,
    ) -> Result<(Route, &'p [u8]), DispatchError> {
        let Some(route) = route(report_type, report_id) else {
            self.unroutable = self.unroutable.wrapping_add(1);
            warn!("Set-Report {} id {=u8:#x} has no handler", report_type, report_id);
            return Err(DispatchError::Unroutable {
                report_type,
                report_id,
            });
        };

        let len = payload_len as usize;
        match payload.get(..len) {
            Some(data) if route.accepts_len(len) => Ok((route, data)),
            _ => {
                self.malformed = self.malformed.wrapping_add(1);
                warn!(
                    "Set-Report {} rejected: len {} (buffer {})",
                    route,
                    len,
                    payload.len()
                );
                Err(DispatchError::Malformed { route, len })
            }
        }
    }

    /// Set-Reports dropped for lack of a handler.
    pub fn unroutable(&self) -> u32 {
        self.unroutable
    }

    /// Set-Reports dropped for a bad payload length.
    pub fn malformed(&self) -> u32 {
        self.malformed
    }
}
