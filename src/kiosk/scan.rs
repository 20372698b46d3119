//! Card scan gatekeeping — turns a tapped UID into a vote token or an error.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::events::{AdminEvent, EventHub, KioskEvent};
use crate::error::DatabaseError;
use crate::store::Database;
use crate::voting::schedule::local_now;
use crate::voting::{TokenSigner, VoteClaims};

pub const MSG_NOT_OPEN: &str = "Voting is not open right now.";
pub const MSG_NOT_REGISTERED: &str = "Card not registered. Please see an administrator.";
pub const MSG_ALREADY_VOTED: &str = "You have already voted this week!";

/// What happened to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// No session is open right now.
    VotingClosed,
    /// Unknown or deactivated card.
    NotRegistered,
    AlreadyVoted { session_id: i64 },
    /// A vote token was issued.
    Accepted { session_id: i64, token: String },
}

/// Runs the three gates for each scan and publishes the result.
pub struct ScanProcessor {
    db: Arc<dyn Database>,
    hub: Arc<EventHub>,
    signer: TokenSigner,
}

impl ScanProcessor {
    pub fn new(db: Arc<dyn Database>, hub: Arc<EventHub>, signer: TokenSigner) -> Self {
        Self { db, hub, signer }
    }

    /// Process a scan against the current local time.
    pub async fn process(&self, uid: &str) -> Result<ScanOutcome, DatabaseError> {
        self.process_at(uid, &local_now()).await
    }

    pub async fn process_at(&self, uid: &str, now: &str) -> Result<ScanOutcome, DatabaseError> {
        // Admin enrollment UI sees every scan, whatever the gates decide
        let already_enrolled = self.db.card_exists(uid).await?;
        self.hub.emit_admin(AdminEvent::CardScanRaw {
            uid: uid.to_string(),
            already_enrolled,
        });

        let Some(session) = self.db.active_session(now).await? else {
            self.reject(MSG_NOT_OPEN);
            return Ok(ScanOutcome::VotingClosed);
        };

        if !self.db.card_is_registered(uid).await? {
            self.reject(MSG_NOT_REGISTERED);
            return Ok(ScanOutcome::NotRegistered);
        }

        if self.db.card_has_voted(uid, session.id).await? {
            self.reject(MSG_ALREADY_VOTED);
            return Ok(ScanOutcome::AlreadyVoted {
                session_id: session.id,
            });
        }

        let token = self.signer.sign(&VoteClaims {
            uid: uid.to_string(),
            session_id: session.id,
        });
        self.hub.emit_kiosk(KioskEvent::CardValid {
            redirect_url: format!("/vote/{token}"),
        });
        info!(uid, session_id = session.id, "Vote token issued");

        Ok(ScanOutcome::Accepted {
            session_id: session.id,
            token,
        })
    }

    fn reject(&self, message: &str) {
        self.hub.emit_kiosk(KioskEvent::CardError {
            message: message.to_string(),
        });
    }
}

/// Spawn the task that feeds reader UIDs into the processor.
pub fn spawn_scan_consumer(
    mut rx: mpsc::Receiver<String>,
    processor: Arc<ScanProcessor>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(uid) = rx.recv().await {
            if let Err(e) = processor.process(&uid).await {
                error!(uid = %uid, error = %e, "Scan processing failed");
            }
        }
        info!("Card reader channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::voting::{NewSession, VoteOption};
    use secrecy::SecretString;
    use std::time::Duration;

    const NOW: &str = "2025-09-15 10:00:00";

    async fn setup() -> (Arc<dyn Database>, Arc<EventHub>, ScanProcessor, TokenSigner) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let hub = EventHub::new();
        let signer = TokenSigner::new(SecretString::from("test-secret".to_string()));
        let processor = ScanProcessor::new(Arc::clone(&db), Arc::clone(&hub), signer.clone());
        (db, hub, processor, signer)
    }

    async fn open_session(db: &Arc<dyn Database>) -> i64 {
        db.create_session(&NewSession {
            question: "Q".into(),
            option_a: "a".into(),
            option_b: "b".into(),
            start_time: "2025-09-15 08:00:00".into(),
            end_time: "2025-09-15 15:00:00".into(),
            ..Default::default()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn closed_voting_rejected_but_admin_still_notified() {
        let (_db, hub, processor, _) = setup().await;
        let mut admin = hub.subscribe_admin();
        let mut kiosk = hub.subscribe_kiosk();

        let outcome = processor.process_at("04:AA", NOW).await.unwrap();
        assert_eq!(outcome, ScanOutcome::VotingClosed);

        assert_eq!(
            admin.recv().await.unwrap(),
            AdminEvent::CardScanRaw {
                uid: "04:AA".into(),
                already_enrolled: false
            }
        );
        assert_eq!(
            kiosk.recv().await.unwrap(),
            KioskEvent::CardError {
                message: MSG_NOT_OPEN.into()
            }
        );
    }

    #[tokio::test]
    async fn unregistered_card_rejected() {
        let (db, hub, processor, _) = setup().await;
        open_session(&db).await;
        let mut kiosk = hub.subscribe_kiosk();

        assert_eq!(
            processor.process_at("04:AA", NOW).await.unwrap(),
            ScanOutcome::NotRegistered
        );
        assert_eq!(
            kiosk.recv().await.unwrap(),
            KioskEvent::CardError {
                message: MSG_NOT_REGISTERED.into()
            }
        );
    }

    #[tokio::test]
    async fn deactivated_card_rejected_as_unregistered() {
        let (db, _hub, processor, _) = setup().await;
        open_session(&db).await;
        db.enroll_card("04:AA", None).await.unwrap();
        let id = db.list_cards().await.unwrap()[0].id;
        db.deactivate_card(id).await.unwrap();

        assert_eq!(
            processor.process_at("04:AA", NOW).await.unwrap(),
            ScanOutcome::NotRegistered
        );
    }

    #[tokio::test]
    async fn second_vote_rejected() {
        let (db, hub, processor, _) = setup().await;
        let session_id = open_session(&db).await;
        db.enroll_card("04:AA", None).await.unwrap();
        db.record_vote(session_id, "04:AA", VoteOption::A).await.unwrap();
        let mut kiosk = hub.subscribe_kiosk();

        assert_eq!(
            processor.process_at("04:AA", NOW).await.unwrap(),
            ScanOutcome::AlreadyVoted { session_id }
        );
        assert_eq!(
            kiosk.recv().await.unwrap(),
            KioskEvent::CardError {
                message: MSG_ALREADY_VOTED.into()
            }
        );
    }

    #[tokio::test]
    async fn valid_card_gets_signed_token() {
        let (db, hub, processor, signer) = setup().await;
        let session_id = open_session(&db).await;
        db.enroll_card("04:AA", Some("Student")).await.unwrap();
        let mut kiosk = hub.subscribe_kiosk();
        let mut admin = hub.subscribe_admin();

        let ScanOutcome::Accepted { token, .. } = processor.process_at("04:AA", NOW).await.unwrap()
        else {
            panic!("expected Accepted");
        };

        let claims = signer.verify(&token, Duration::from_secs(300)).unwrap();
        assert_eq!(claims.uid, "04:AA");
        assert_eq!(claims.session_id, session_id);

        assert_eq!(
            kiosk.recv().await.unwrap(),
            KioskEvent::CardValid {
                redirect_url: format!("/vote/{token}")
            }
        );
        assert_eq!(
            admin.recv().await.unwrap(),
            AdminEvent::CardScanRaw {
                uid: "04:AA".into(),
                already_enrolled: true
            }
        );
    }

    #[tokio::test]
    async fn consumer_drains_channel() {
        let (db, hub, processor, _) = setup().await;
        open_session(&db).await;
        let mut admin = hub.subscribe_admin();

        let (tx, rx) = mpsc::channel(4);
        let handle = spawn_scan_consumer(rx, Arc::new(processor));
        tx.send("04:01".into()).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(matches!(
            admin.recv().await.unwrap(),
            AdminEvent::CardScanRaw { ref uid, .. } if uid == "04:01"
        ));
    }
}
