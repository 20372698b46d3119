//! Event hub — broadcast fan-out of kiosk and admin events to WebSocket clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Events pushed to kiosk screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskEvent {
    /// A valid card was tapped; the screen should navigate to the ballot.
    CardValid { redirect_url: String },
    /// The tap was rejected; show the overlay.
    CardError { message: String },
    /// A ballot was recorded.
    VoteUpdate { session_id: i64, total: i64 },
}

/// Events pushed to admin panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminEvent {
    /// Every scan, so the enrollment page can pick up new UIDs.
    CardScanRaw { uid: String, already_enrolled: bool },
    /// Reply to an `enroll_card` action.
    EnrollSuccess { uid: String, label: String },
}

/// Actions sent by admin clients over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminAction {
    EnrollCard {
        #[serde(default)]
        uid: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
}

/// Two broadcast channels: one for kiosk screens, one for admin panels.
pub struct EventHub {
    kiosk_tx: broadcast::Sender<KioskEvent>,
    admin_tx: broadcast::Sender<AdminEvent>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        let (kiosk_tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        let (admin_tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { kiosk_tx, admin_tx })
    }

    pub fn subscribe_kiosk(&self) -> broadcast::Receiver<KioskEvent> {
        self.kiosk_tx.subscribe()
    }

    pub fn subscribe_admin(&self) -> broadcast::Receiver<AdminEvent> {
        self.admin_tx.subscribe()
    }

    pub fn emit_kiosk(&self, event: KioskEvent) {
        // ok if no screens are connected
        let _ = self.kiosk_tx.send(event);
    }

    pub fn emit_admin(&self, event: AdminEvent) {
        let _ = self.admin_tx.send(event);
    }
}
