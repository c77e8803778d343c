//! The session observer harness.
//!
//! WHY: Exercising a callback-driven session means checking what was called,
//! in which order, and with which values, while steering its decisions.
//!
//! WHAT: [`SessionObserver`] records every delegate callback into an
//! [`EventLog`], keeps the received bytes for [`JsonKey`] path lookups, and
//! runs one task at a time to completion through a blocking runner.
//!
//! HOW: Decision points are [`Hooks`] slots holding shared closures; each
//! receives the continuation the session handed over and completes it.

mod events;
mod hooks;
mod json_path;
mod observer;
mod retry;
mod runner;

pub use events::*;
pub use hooks::*;
pub use json_path::*;
pub use observer::{
    scenario_configuration, ObserverRecorder, SessionObserver, DEFAULT_GRACE_MARGIN,
    SESSION_CONFIG_ENV,
};
pub use retry::*;
pub use runner::*;
