//! Application data units: a header plus exactly one PDU.
//!
//! Two flavours share the same 6-byte header shape, a 16-bit identifier, a
//! 16-bit constant/reserved word and a big-endian length at offset 4..6,
//! followed by a one-byte unit address. The message codec relies on that
//! shared layout to find frame boundaries without knowing the flavour.
//!
//! - [`ModbusTcpAdu`]: the MBAP header. A protocol identifier other than
//!   `0x0000` rejects the frame.
//! - [`ModbusSerialAdu`]: the same layout with a reserved word. A non-zero
//!   reserved word is logged and otherwise ignored.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{PROTOCOL_IDENTIFIER, SERIAL_RESERVED};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;

/// Common interface of the ADU flavours, letting the message codec stay
/// generic over framing.
pub trait ModbusAdu: Clone + fmt::Debug + Send + Sync + Sized + 'static {
    /// Short tag used in packet logs.
    const PROTOCOL: &'static str;

    fn parse(buf: &mut ReadBuffer<'_>, response: bool) -> ModbusResult<Self>;

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()>;

    fn length_in_bytes(&self) -> usize;

    fn transaction_id(&self) -> u16;

    fn unit_id(&self) -> u8;

    fn pdu(&self) -> &ModbusPdu;

    fn from_bytes(data: &[u8], response: bool) -> ModbusResult<Self> {
        Self::parse(&mut ReadBuffer::new(data), response)
    }

    fn to_bytes(&self) -> ModbusResult<Bytes> {
        let mut buf = WriteBuffer::with_capacity(self.length_in_bytes());
        self.serialize(&mut buf)?;
        Ok(buf.into_bytes())
    }
}

fn length_field(pdu: &ModbusPdu) -> ModbusResult<u16> {
    u16::try_from(pdu.length_in_bytes() + 1)
        .map_err(|_| ModbusError::invalid_data("ADU length does not fit in 16 bits"))
}

/// Modbus/TCP frame: `[tid:16][pid:16 = 0][length:16][unit:8][pdu]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusTcpAdu {
    pub transaction_identifier: u16,
    pub unit_identifier: u8,
    pub pdu: ModbusPdu,
}

impl ModbusTcpAdu {
    pub fn new(transaction_identifier: u16, unit_identifier: u8, pdu: ModbusPdu) -> Self {
        Self {
            transaction_identifier,
            unit_identifier,
            pdu,
        }
    }

    /// Value of the length field: unit identifier plus PDU.
    pub fn length(&self) -> usize {
        self.pdu.length_in_bytes() + 1
    }
}

impl ModbusAdu for ModbusTcpAdu {
    const PROTOCOL: &'static str = "TCP";

    fn parse(buf: &mut ReadBuffer<'_>, response: bool) -> ModbusResult<Self> {
        let transaction_identifier = buf.read_u16(16)?;
        let protocol_identifier = buf.read_u16(16)?;
        if protocol_identifier != PROTOCOL_IDENTIFIER {
            return Err(ModbusError::const_mismatch(
                "protocolIdentifier",
                u64::from(PROTOCOL_IDENTIFIER),
                u64::from(protocol_identifier),
            ));
        }
        // Framing is done by the codec, the value is recomputed on serialize
        let _length = buf.read_u16(16)?;
        let unit_identifier = buf.read_u8(8)?;
        let pdu = ModbusPdu::parse(buf, response)?;

        debug!(
            "TCP ADU parsed: tid={}, unit={}, {}",
            transaction_identifier, unit_identifier, pdu
        );
        Ok(Self {
            transaction_identifier,
            unit_identifier,
            pdu,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.transaction_identifier)?;
        buf.write_u16(16, PROTOCOL_IDENTIFIER)?;
        buf.write_u16(16, length_field(&self.pdu)?)?;
        buf.write_u8(8, self.unit_identifier)?;
        self.pdu.serialize(buf)
    }

    fn length_in_bytes(&self) -> usize {
        6 + self.length()
    }

    fn transaction_id(&self) -> u16 {
        self.transaction_identifier
    }

    fn unit_id(&self) -> u8 {
        self.unit_identifier
    }

    fn pdu(&self) -> &ModbusPdu {
        &self.pdu
    }
}

impl fmt::Display for ModbusTcpAdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP[tid={}, unit={}] {}",
            self.transaction_identifier, self.unit_identifier, self.pdu
        )
    }
}

/// Serial frame: `[tid:16][reserved:16 = 0][length:16][address:8][pdu]`.
///
/// `length` is stored as received and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusSerialAdu {
    pub transaction_id: u16,
    pub length: u16,
    pub address: u8,
    pub pdu: ModbusPdu,
}

impl ModbusSerialAdu {
    /// Build a frame with `length` derived from the PDU.
    pub fn new(transaction_id: u16, address: u8, pdu: ModbusPdu) -> ModbusResult<Self> {
        Ok(Self {
            transaction_id,
            length: length_field(&pdu)?,
            address,
            pdu,
        })
    }
}

impl ModbusAdu for ModbusSerialAdu {
    const PROTOCOL: &'static str = "SERIAL";

    fn parse(buf: &mut ReadBuffer<'_>, response: bool) -> ModbusResult<Self> {
        let transaction_id = buf.read_u16(16)?;
        let reserved = buf.read_u16(16)?;
        if reserved != SERIAL_RESERVED {
            info!(
                "Expected constant value {:#06X} for reserved field but got {:#06X}",
                SERIAL_RESERVED, reserved
            );
        }
        let length = buf.read_u16(16)?;
        let address = buf.read_u8(8)?;
        let pdu = ModbusPdu::parse(buf, response)?;

        debug!(
            "Serial ADU parsed: tid={}, address={}, length={}, {}",
            transaction_id, address, length, pdu
        );
        Ok(Self {
            transaction_id,
            length,
            address,
            pdu,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.transaction_id)?;
        buf.write_u16(16, SERIAL_RESERVED)?;
        buf.write_u16(16, self.length)?;
        buf.write_u8(8, self.address)?;
        self.pdu.serialize(buf)
    }

    fn length_in_bytes(&self) -> usize {
        7 + self.pdu.length_in_bytes()
    }

    fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    fn unit_id(&self) -> u8 {
        self.address
    }

    fn pdu(&self) -> &ModbusPdu {
        &self.pdu
    }
}
