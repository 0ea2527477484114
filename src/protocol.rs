/// Modbus/TCP protocol definitions
///
/// Only the two function codes the probe needs are modelled: Read Holding
/// Registers (0x03) and Write Single Register (0x06). Framing follows the
/// MBAP layout shared by the client transport and the server simulator:
///
/// ```text
/// | transaction id (2) | protocol id (2) | length (2) | unit id (1) | PDU ... |
/// ```

use std::fmt;

use crate::error::{ProbeError, ProbeResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus unit identifier
pub type UnitId = u8;

/// Unit identifier used by the client
pub const DEFAULT_UNIT_ID: UnitId = 1;

/// MBAP header size without the unit identifier
pub const MBAP_HEADER_SIZE: usize = 6;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Maximum number of registers in one Read Holding Registers request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
}

impl ModbusFunction {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x03 => Some(ModbusFunction::ReadHoldingRegisters),
            0x06 => Some(ModbusFunction::WriteSingleRegister),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Exception codes answered by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
}

impl ModbusException {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
        };
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), name)
    }
}

/// Modbus request PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusRequest {
    ReadHoldingRegisters {
        address: ModbusAddress,
        quantity: u16,
    },
    WriteSingleRegister {
        address: ModbusAddress,
        value: ModbusValue,
    },
}

impl ModbusRequest {
    pub fn function(&self) -> ModbusFunction {
        match self {
            ModbusRequest::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            ModbusRequest::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
        }
    }

    pub fn address(&self) -> ModbusAddress {
        match *self {
            ModbusRequest::ReadHoldingRegisters { address, .. }
            | ModbusRequest::WriteSingleRegister { address, .. } => address,
        }
    }

    /// Encode the PDU: function code followed by two big-endian words
    pub fn encode_pdu(&self) -> Vec<u8> {
        let (address, word) = match *self {
            ModbusRequest::ReadHoldingRegisters { address, quantity } => (address, quantity),
            ModbusRequest::WriteSingleRegister { address, value } => (address, value),
        };
        let mut pdu = Vec::with_capacity(5);
        pdu.push(self.function().to_u8());
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&word.to_be_bytes());
        pdu
    }

    /// Decode a request PDU on the server side
    ///
    /// Errors are the exception code the server should answer with.
    pub fn decode_pdu(pdu: &[u8]) -> Result<Self, ModbusException> {
        let function = pdu
            .first()
            .copied()
            .and_then(ModbusFunction::from_u8)
            .ok_or(ModbusException::IllegalFunction)?;
        if pdu.len() < 5 {
            return Err(ModbusException::IllegalDataValue);
        }
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let word = u16::from_be_bytes([pdu[3], pdu[4]]);
        match function {
            ModbusFunction::ReadHoldingRegisters => {
                if word == 0 || word > MAX_READ_REGISTERS {
                    return Err(ModbusException::IllegalDataValue);
                }
                Ok(ModbusRequest::ReadHoldingRegisters { address, quantity: word })
            }
            ModbusFunction::WriteSingleRegister => {
                Ok(ModbusRequest::WriteSingleRegister { address, value: word })
            }
        }
    }
}

/// Modbus response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    ReadHoldingRegisters(Vec<ModbusValue>),
    WriteSingleRegister {
        address: ModbusAddress,
        value: ModbusValue,
    },
    Exception {
        function: u8,
        code: u8,
    },
}

impl ModbusResponse {
    /// Build an exception response for the given request function code
    pub fn exception(function: u8, exception: ModbusException) -> Self {
        ModbusResponse::Exception {
            function,
            code: exception.to_u8(),
        }
    }

    pub fn encode_pdu(&self) -> Vec<u8> {
        match self {
            ModbusResponse::ReadHoldingRegisters(values) => {
                let mut pdu = Vec::with_capacity(2 + values.len() * 2);
                pdu.push(ModbusFunction::ReadHoldingRegisters.to_u8());
                pdu.push((values.len() * 2) as u8);
                for value in values {
                    pdu.extend_from_slice(&value.to_be_bytes());
                }
                pdu
            }
            ModbusResponse::WriteSingleRegister { address, value } => {
                let mut pdu = Vec::with_capacity(5);
                pdu.push(ModbusFunction::WriteSingleRegister.to_u8());
                pdu.extend_from_slice(&address.to_be_bytes());
                pdu.extend_from_slice(&value.to_be_bytes());
                pdu
            }
            ModbusResponse::Exception { function, code } => vec![function | 0x80, *code],
        }
    }

    /// Decode a response PDU against the request that produced it
    pub fn decode_pdu(request: &ModbusRequest, pdu: &[u8]) -> ProbeResult<Self> {
        let function_code = *pdu.first().ok_or_else(|| ProbeError::frame("Empty response PDU"))?;
        let expected = request.function().to_u8();

        if function_code & 0x80 != 0 {
            let code = *pdu.get(1).ok_or_else(|| ProbeError::frame("Invalid exception response"))?;
            return Ok(ModbusResponse::Exception {
                function: function_code & 0x7F,
                code,
            });
        }

        if function_code != expected {
            return Err(ProbeError::frame(format!(
                "Function code mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected, function_code
            )));
        }

        match request {
            ModbusRequest::ReadHoldingRegisters { quantity, .. } => {
                let byte_count = *pdu.get(1).ok_or_else(|| ProbeError::frame("Missing byte count"))? as usize;
                if byte_count == 0 {
                    return Err(ProbeError::frame("Empty register data"));
                }
                if byte_count != *quantity as usize * 2 || pdu.len() < 2 + byte_count {
                    return Err(ProbeError::frame(format!(
                        "Register data length mismatch: byte count {}, quantity {}, PDU {} bytes",
                        byte_count,
                        quantity,
                        pdu.len()
                    )));
                }
                let values = pdu[2..2 + byte_count]
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();
                Ok(ModbusResponse::ReadHoldingRegisters(values))
            }
            ModbusRequest::WriteSingleRegister { .. } => {
                if pdu.len() < 5 {
                    return Err(ProbeError::frame("Incomplete write response"));
                }
                Ok(ModbusResponse::WriteSingleRegister {
                    address: u16::from_be_bytes([pdu[1], pdu[2]]),
                    value: u16::from_be_bytes([pdu[3], pdu[4]]),
                })
            }
        }
    }
}

/// Decoded MBAP header (including the unit identifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count following the length field (unit id + PDU)
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    /// Parse the first seven bytes of a frame
    pub fn parse(bytes: &[u8]) -> ProbeResult<Self> {
        if bytes.len() < MBAP_HEADER_SIZE + 1 {
            return Err(ProbeError::frame("Frame too short"));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != 0 {
            return Err(ProbeError::frame("Invalid protocol ID"));
        }
        if header.length < 2 || MBAP_HEADER_SIZE + header.length as usize > MAX_TCP_FRAME_SIZE {
            return Err(ProbeError::frame(format!("Invalid MBAP length {}", header.length)));
        }
        Ok(header)
    }

    /// Number of PDU bytes that follow the header
    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

/// Wrap a PDU into a Modbus/TCP frame
pub fn encode_frame(transaction_id: u16, unit_id: UnitId, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16;
    let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + 1 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}
