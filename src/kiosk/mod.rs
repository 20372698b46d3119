//! Kiosk runtime — scan gating, event fan-out, WebSocket sessions, touch hardening.

pub mod events;
pub mod scan;
pub mod touch_guard;
pub mod ws;

pub use events::{AdminAction, AdminEvent, EventHub, KioskEvent};
pub use scan::{ScanOutcome, ScanProcessor, spawn_scan_consumer};
pub use touch_guard::{GestureEvent, TouchGuard, Verdict};
