//! Interfaces of the collaborators the application coordinates.
//!
//! Battery monitoring, firmware update, key scanning, audio streaming and
//! the BLE transport live outside this crate. The application only needs
//! the calls below; the firmware binary (or a test) supplies the
//! implementations.

use crate::event::Event;
use crate::link::LinkState;
use crate::report::ReportType;

/// Identifies a collaborator in startup errors and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubsystemId {
    Battery,
    Ota,
    KeyScan,
    Audio,
    Transport,
}

/// Anything that must be initialised by `start()`.
pub trait Subsystem {
    const ID: SubsystemId;

    /// Bring the subsystem up. `Err` carries the subsystem's result code.
    fn init(&mut self) -> Result<(), u32>;
}

/// Battery monitor; also owns the connection count control feature report.
pub trait Battery: Subsystem {
    fn count_control(&mut self, payload: &[u8]);
}

/// Firmware-update service. Only its startup is coordinated here.
pub trait Ota: Subsystem {}

/// Key-scan matrix driver and HID key report generator.
pub trait KeyScan: Subsystem {
    /// A dequeued key or button event.
    fn handle_event(&mut self, event: &Event);

    /// Keyboard LED output report from the host.
    fn set_keyboard_led(&mut self, payload: &[u8]);

    /// Events were lost; report every key as released.
    fn release_all(&mut self);
}

/// Audio capture / voice streaming pipeline.
pub trait Audio: Subsystem {
    /// A dequeued audio token (`Info` audio codes or `Any` payloads).
    fn handle_event(&mut self, event: &Event);

    /// Audio data or control Set-Report.
    fn set_report(&mut self, report_type: ReportType, report_id: u8, payload: &[u8]);
}

/// BLE HID transport.
pub trait Transport: Subsystem {
    /// Start pairing (discoverable advertising).
    fn enter_pairing(&mut self);

    /// Interpret a raw link state notification.
    fn classify(&self, raw: u32) -> Option<LinkState> {
        LinkState::from_raw(raw)
    }
}
