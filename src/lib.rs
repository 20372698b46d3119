//! Vote Kiosk — NFC-card voting station with a kiosk UI and admin API.

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod kiosk;
pub mod nfc;
pub mod setup;
pub mod sheets;
pub mod store;
pub mod voting;
