//! PN532 over Linux I2C (`/dev/i2c-N`).

use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use super::pn532::{Pn532, Transport};
use crate::error::NfcError;

/// Status byte bit set when the PN532 has a frame ready.
const STATUS_READY: u8 = 0x01;

pub struct I2cTransport {
    device: LinuxI2CDevice,
}

impl I2cTransport {
    pub fn open(bus: impl AsRef<Path>, address: u16) -> Result<Self, NfcError> {
        let device = LinuxI2CDevice::new(bus.as_ref(), address).map_err(|e| {
            NfcError::Unavailable(format!("{} @ 0x{address:02X}: {e}", bus.as_ref().display()))
        })?;
        Ok(Self { device })
    }
}

impl Transport for I2cTransport {
    fn ready(&mut self) -> Result<bool, NfcError> {
        let mut status = [0u8; 1];
        self.device
            .read(&mut status)
            .map_err(|e| NfcError::Transport(e.to_string()))?;
        Ok(status[0] & STATUS_READY != 0)
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), NfcError> {
        self.device
            .write(frame)
            .map_err(|e| NfcError::Transport(e.to_string()))
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, NfcError> {
        // every I2C read starts with the status byte
        let mut buf = vec![0u8; len + 1];
        self.device
            .read(&mut buf)
            .map_err(|e| NfcError::Transport(e.to_string()))?;
        Ok(buf.split_off(1))
    }
}

pub type I2cPn532 = Pn532<I2cTransport>;

pub fn open(bus: &str, address: u16) -> Result<I2cPn532, NfcError> {
    Ok(Pn532::new(I2cTransport::open(bus, address)?))
}
