//! Pairing wire messages: one command byte followed by a fixed
//! little-endian struct, at most [`PAIRING_PAYLOAD_MAX`] bytes on the air.

use crate::error::{Error, Result};

/// Largest pairing message, command byte included.
pub const PAIRING_PAYLOAD_MAX: usize = 16;

/// Command byte of each pairing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    AuthenticationMessage = 0x01,
    AuthenticationResponse = 0x02,
    IdentificationMessage = 0x03,
    AddressingMessage = 0x04,
    AddressingResponse = 0x05,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Command::AuthenticationMessage,
            0x02 => Command::AuthenticationResponse,
            0x03 => Command::IdentificationMessage,
            0x04 => Command::AddressingMessage,
            0x05 => Command::AddressingResponse,
            _ => return Err(Error::InvalidParameter),
        })
    }
}

/// Decoded pairing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Message {
    /// Coordinator opens with its application code.
    AuthenticationMessage { app_code: u64 },
    /// Node accepts or refuses the application code.
    AuthenticationResponse { accepted: bool },
    /// Node identifies itself with its radio serial and device role.
    IdentificationMessage { serial_number: u64, device_role: u8 },
    /// Coordinator assigns the network addresses.
    AddressingMessage { pan_id: u16, coordinator_address: u8, node_address: u8 },
    /// Node confirms it stored the assignment.
    AddressingResponse { accepted: bool },
}

impl Message {
    /// Serialize into `buf`, returning the used length.
    pub fn encode(&self, buf: &mut [u8; PAIRING_PAYLOAD_MAX]) -> usize {
        buf.fill(0);
        match *self {
            Message::AuthenticationMessage { app_code } => {
                buf[0] = Command::AuthenticationMessage as u8;
                buf[1..9].copy_from_slice(&app_code.to_le_bytes());
                9
            }
            Message::AuthenticationResponse { accepted } => {
                buf[0] = Command::AuthenticationResponse as u8;
                buf[1] = accepted as u8;
                2
            }
            Message::IdentificationMessage { serial_number, device_role } => {
                buf[0] = Command::IdentificationMessage as u8;
                buf[1..9].copy_from_slice(&serial_number.to_le_bytes());
                buf[9] = device_role;
                10
            }
            Message::AddressingMessage { pan_id, coordinator_address, node_address } => {
                buf[0] = Command::AddressingMessage as u8;
                buf[1..3].copy_from_slice(&pan_id.to_le_bytes());
                buf[3] = coordinator_address;
                buf[4] = node_address;
                5
            }
            Message::AddressingResponse { accepted } => {
                buf[0] = Command::AddressingResponse as u8;
                buf[1] = accepted as u8;
                2
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() || buf.len() > PAIRING_PAYLOAD_MAX {
            return Err(Error::InvalidParameter);
        }
        let need = |n: usize| if buf.len() < n { Err(Error::InvalidParameter) } else { Ok(()) };
        Ok(match Command::try_from(buf[0])? {
            Command::AuthenticationMessage => {
                need(9)?;
                let mut code = [0u8; 8];
                code.copy_from_slice(&buf[1..9]);
                Message::AuthenticationMessage { app_code: u64::from_le_bytes(code) }
            }
            Command::AuthenticationResponse => {
                need(2)?;
                Message::AuthenticationResponse { accepted: buf[1] != 0 }
            }
            Command::IdentificationMessage => {
                need(10)?;
                let mut serial = [0u8; 8];
                serial.copy_from_slice(&buf[1..9]);
                Message::IdentificationMessage {
                    serial_number: u64::from_le_bytes(serial),
                    device_role: buf[9],
                }
            }
            Command::AddressingMessage => {
                need(5)?;
                Message::AddressingMessage {
                    pan_id: u16::from_le_bytes([buf[1], buf[2]]),
                    coordinator_address: buf[3],
                    node_address: buf[4],
                }
            }
            Command::AddressingResponse => {
                need(2)?;
                Message::AddressingResponse { accepted: buf[1] != 0 }
            }
        })
    }
}
