//! Application coordination core of a BLE HID remote control.
//!
//! - [`queue`]: bounded event queue between interrupt producers and the
//!   single consumer loop
//! - [`report`]: `(report type, report id)` routing of host Set-Reports
//! - [`link`]: link indicator and the timed pairing key combo
//! - [`app`]: ordered startup and the consumer poll entry point
//!
//! Everything here is `no_std`, allocation free and testable on the host:
//! `cargo test`. The firmware binary in `main.rs` (feature `embedded`)
//! wires it to the nRF52840 and the SoftDevice.

#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every module.
mod fmt;

pub mod app;
pub mod combo;
pub mod config;
pub mod error;
pub mod event;
pub mod indicator;
pub mod link;
pub mod queue;
pub mod report;
pub mod subsystem;

pub use app::{Application, Subsystems, UserHandler};
pub use error::{DispatchError, QueueFull, StartupError};
pub use event::Event;
pub use queue::EventQueue;
pub use report::{ReportType, Route};
