//! Error types for the remote-control core.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Only [`StartupError`] ever leaves the core; the others are handled
//! (counted and logged) where they occur.

use crate::report::{ReportType, Route};
use crate::subsystem::SubsystemId;

/// The event queue was full; the event was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Why an inbound Set-Report was not forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    /// No handler is registered for this `(type, id)` pair.
    Unroutable {
        report_type: ReportType,
        report_id: u8,
    },
    /// The payload length is not acceptable for the addressed route.
    Malformed { route: Route, len: usize },
}

/// A subsystem failed to initialise during [`start`](crate::app::Application::start).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartupError {
    /// Which subsystem refused to start.
    pub subsystem: SubsystemId,
    /// Raw result code reported by that subsystem.
    pub code: u32,
}
