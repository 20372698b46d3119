//! PN532 frame codec and command driver.
//!
//! Host-to-reader frames are `00 00 FF LEN LCS D4 CMD data.. DCS 00`.
//! The driver is generic over a [`Transport`] so the protocol can be
//! exercised without hardware.

use std::time::{Duration, Instant};

use tracing::debug;

use super::CardReader;
use crate::error::NfcError;

const HOST_TO_PN532: u8 = 0xD4;
const PN532_TO_HOST: u8 = 0xD5;

pub const CMD_SAM_CONFIGURATION: u8 = 0x14;
pub const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

/// ISO14443A, 106 kbps.
const BAUD_MIFARE_ISO14443A: u8 = 0x00;

pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Longest UID an ISO14443A target can report (triple size is 10, but the
/// reader only returns single and double size on this path).
const MAX_UID_LEN: usize = 7;

/// How often to poll the status byte while waiting.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Byte-level link to the PN532.
pub trait Transport: Send {
    /// True once the reader has data ready.
    fn ready(&mut self) -> Result<bool, NfcError>;
    fn write(&mut self, frame: &[u8]) -> Result<(), NfcError>;
    /// Read `len` bytes of frame data.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, NfcError>;
}

/// Encode a command frame.
pub fn build_frame(command: u8, params: &[u8]) -> Vec<u8> {
    // TFI + command + params
    let len = (params.len() + 2) as u8;
    let mut frame = Vec::with_capacity(params.len() + 9);
    frame.extend_from_slice(&[0x00, 0x00, 0xFF, len, len.wrapping_neg(), HOST_TO_PN532, command]);
    frame.extend_from_slice(params);

    let sum = params
        .iter()
        .fold(HOST_TO_PN532.wrapping_add(command), |acc, b| acc.wrapping_add(*b));
    frame.push(sum.wrapping_neg());
    frame.push(0x00);
    frame
}

pub fn is_ack(bytes: &[u8]) -> bool {
    bytes.starts_with(&ACK_FRAME)
}

/// Decode a response frame to `command`, returning the data after the
/// response code. Leading zero padding is skipped; trailing bytes are ignored.
pub fn parse_response(raw: &[u8], command: u8) -> Result<Vec<u8>, NfcError> {
    let start = raw
        .iter()
        .position(|b| *b != 0x00)
        .ok_or_else(|| NfcError::Frame("no preamble".into()))?;
    if start == 0 || raw[start] != 0xFF {
        return Err(NfcError::Frame("preamble does not contain 00 FF".into()));
    }

    let header = &raw[start + 1..];
    let (len, lcs) = match header {
        [len, lcs, ..] => (*len, *lcs),
        _ => return Err(NfcError::Frame("truncated header".into())),
    };
    if len.wrapping_add(lcs) != 0 {
        return Err(NfcError::Frame("length checksum mismatch".into()));
    }

    let len = len as usize;
    let body = header
        .get(2..2 + len + 1)
        .ok_or_else(|| NfcError::Frame("truncated body".into()))?;
    if body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) != 0 {
        return Err(NfcError::Frame("data checksum mismatch".into()));
    }

    let data = &body[..len];
    match data {
        [PN532_TO_HOST, code, rest @ ..] if *code == command.wrapping_add(1) => Ok(rest.to_vec()),
        _ => Err(NfcError::Frame(format!(
            "unexpected response to command 0x{command:02X}"
        ))),
    }
}

/// Extract the first target's UID from InListPassiveTarget response data:
/// `NbTg Tg SENS_RES(2) SEL_RES UIDLen UID..`.
pub fn parse_passive_target(data: &[u8]) -> Result<Option<Vec<u8>>, NfcError> {
    match data.first() {
        None | Some(0) => return Ok(None),
        Some(1) => {}
        Some(n) => return Err(NfcError::Frame(format!("expected one target, got {n}"))),
    }
    let uid_len = *data
        .get(5)
        .ok_or_else(|| NfcError::Frame("truncated target data".into()))? as usize;
    if uid_len > MAX_UID_LEN {
        return Err(NfcError::Frame(format!("unexpectedly long UID ({uid_len} bytes)")));
    }
    data.get(6..6 + uid_len)
        .map(|uid| Some(uid.to_vec()))
        .ok_or_else(|| NfcError::Frame("truncated UID".into()))
}

/// PN532 command driver over any transport.
pub struct Pn532<T: Transport> {
    transport: T,
}

impl<T: Transport> Pn532<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, NfcError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.transport.ready()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    /// Send a command and wait for its response. `Ok(None)` means the reader
    /// acknowledged but had no response within `timeout`.
    pub fn call(
        &mut self,
        command: u8,
        params: &[u8],
        response_len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, NfcError> {
        self.transport.write(&build_frame(command, params))?;

        if !self.wait_ready(timeout)? {
            return Err(NfcError::Timeout(timeout));
        }
        if !is_ack(&self.transport.read(ACK_FRAME.len())?) {
            return Err(NfcError::NoAck { command });
        }

        if !self.wait_ready(timeout)? {
            return Ok(None);
        }
        // preamble, start code, LEN, LCS, TFI, code, data, DCS, postamble
        let raw = self.transport.read(response_len + 9)?;
        parse_response(&raw, command).map(Some)
    }
}

impl<T: Transport> CardReader for Pn532<T> {
    fn init(&mut self) -> Result<(), NfcError> {
        let timeout = Duration::from_secs(1);
        // normal mode, 1 s virtual card timeout, use IRQ
        self.call(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01], 0, timeout)?
            .ok_or(NfcError::Timeout(timeout))?;
        debug!("PN532 SAM configured");
        Ok(())
    }

    fn read_passive_target(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, NfcError> {
        match self.call(
            CMD_IN_LIST_PASSIVE_TARGET,
            &[0x01, BAUD_MIFARE_ISO14443A],
            19,
            timeout,
        )? {
            Some(data) => parse_passive_target(&data),
            None => Ok(None),
        }
    }
}
