//! NFC card reader — PN532 driver and the background polling thread.
//!
//! Reading is blocking I2C, so it runs on a dedicated OS thread. The only
//! thing that thread produces is UIDs on an mpsc channel; everything else
//! happens on the async side.

#[cfg(feature = "nfc-hardware")]
pub mod i2c;
pub mod pn532;

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::KioskConfig;
use crate::error::NfcError;

/// How long each passive-target poll waits for a card.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

const UID_CHANNEL_CAPACITY: usize = 32;

/// A device that can detect ISO14443A cards.
pub trait CardReader: Send {
    /// (Re)initialise the device. Called before polling and after every error.
    fn init(&mut self) -> Result<(), NfcError>;

    /// Wait up to `timeout` for a card; return its raw UID.
    fn read_passive_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, NfcError>;

    /// False for readers that never produce scans.
    fn is_hardware(&self) -> bool {
        true
    }
}

/// Stand-in when no reader is attached. Never sees a card.
#[derive(Debug, Default)]
pub struct NullReader;

impl CardReader for NullReader {
    fn init(&mut self) -> Result<(), NfcError> {
        Ok(())
    }

    fn read_passive_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, NfcError> {
        std::thread::sleep(timeout);
        Ok(None)
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

/// Uppercase hex bytes joined by `:`, e.g. `04:A1:2B:3C`.
pub fn format_uid(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Suppresses repeat reads of a card that is still resting on the reader.
#[derive(Debug)]
pub struct ScanDebouncer {
    cooldown: Duration,
    last: Option<(String, Instant)>,
}

impl ScanDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// True if this scan should be processed.
    pub fn accept(&mut self, uid: &str, now: Instant) -> bool {
        if let Some((last_uid, at)) = &self.last {
            if last_uid == uid && now.saturating_duration_since(*at) < self.cooldown {
                return false;
            }
        }
        self.last = Some((uid.to_string(), now));
        true
    }
}

/// Open the configured reader, falling back to [`NullReader`].
pub fn open_reader(config: &KioskConfig) -> Box<dyn CardReader> {
    #[cfg(feature = "nfc-hardware")]
    {
        match i2c::open(&config.nfc_i2c_bus, config.nfc_i2c_address) {
            Ok(reader) => return Box::new(reader),
            Err(e) => warn!(error = %e, "NFC reader unavailable, running without it"),
        }
    }
    #[cfg(not(feature = "nfc-hardware"))]
    {
        let _ = config;
        warn!("Built without nfc-hardware, running without NFC reader");
    }
    Box::new(NullReader)
}

/// Start the reader thread. UIDs that pass the debouncer arrive on the
/// returned channel. The thread exits when the receiver is dropped.
pub fn spawn_reader(
    mut reader: Box<dyn CardReader>,
    retry_delay: Duration,
    cooldown: Duration,
) -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(UID_CHANNEL_CAPACITY);

    if reader.is_hardware() {
        info!("NFC reader thread started");
    } else {
        info!("NFC reader thread started (simulation mode, no hardware)");
    }

    std::thread::Builder::new()
        .name("nfc-reader".into())
        .spawn(move || {
            let mut debouncer = ScanDebouncer::new(cooldown);
            while !tx.is_closed() {
                if let Err(e) = poll_until_error(reader.as_mut(), &mut debouncer, &tx) {
                    error!(error = %e, retry_secs = retry_delay.as_secs(), "NFC reader error, reconnecting");
                    std::thread::sleep(retry_delay);
                }
            }
            info!("NFC reader thread stopped");
        })?;

    Ok(rx)
}

/// Init and poll until an error occurs or the receiver goes away.
fn poll_until_error(
    reader: &mut dyn CardReader,
    debouncer: &mut ScanDebouncer,
    tx: &mpsc::Sender<String>,
) -> Result<(), NfcError> {
    reader.init()?;
    if reader.is_hardware() {
        info!("NFC reader ready");
    }

    loop {
        let Some(bytes) = reader.read_passive_target(POLL_TIMEOUT)? else {
            if tx.is_closed() {
                return Ok(());
            }
            continue;
        };

        let uid = format_uid(&bytes);
        if !debouncer.accept(&uid, Instant::now()) {
            continue;
        }
        info!(uid = %uid, "Card scanned");
        if tx.blocking_send(uid).is_err() {
            return Ok(());
        }
    }
}
