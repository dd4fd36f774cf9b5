//! Protocol enumerations and the sub-record items embedded in file record
//! and device identification PDUs.
//!
//! Items are parsed by their own parsers and never dispatched by function
//! code; the owning PDU bounds them by a byte length (file records) or an
//! element count (device information objects).

use std::fmt;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{
    EXCEPTION_ACKNOWLEDGE, EXCEPTION_GATEWAY_PATH_UNAVAILABLE, EXCEPTION_GATEWAY_TARGET_FAILED,
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_MEMORY_PARITY_ERROR, EXCEPTION_NEGATIVE_ACKNOWLEDGE, EXCEPTION_SERVER_DEVICE_BUSY,
    EXCEPTION_SERVER_DEVICE_FAILURE,
};
use crate::error::{ModbusError, ModbusResult};

// ============================================================================
// Enumerations
// ============================================================================

/// Exception code carried by an error PDU.
///
/// Parsing is lenient: codes outside the standard table are kept as
/// [`ModbusErrorCode::Unknown`] so the frame still round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModbusErrorCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    Unknown(u8),
}

impl ModbusErrorCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            EXCEPTION_SERVER_DEVICE_FAILURE => Self::ServerDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => Self::Acknowledge,
            EXCEPTION_SERVER_DEVICE_BUSY => Self::ServerDeviceBusy,
            EXCEPTION_NEGATIVE_ACKNOWLEDGE => Self::NegativeAcknowledge,
            EXCEPTION_MEMORY_PARITY_ERROR => Self::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Self::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayTargetDeviceFailedToRespond,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            Self::ServerDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
            Self::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            Self::ServerDeviceBusy => EXCEPTION_SERVER_DEVICE_BUSY,
            Self::NegativeAcknowledge => EXCEPTION_NEGATIVE_ACKNOWLEDGE,
            Self::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            Self::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            Self::GatewayTargetDeviceFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
            Self::Unknown(code) => *code,
        }
    }
}

impl From<u8> for ModbusErrorCode {
    fn from(code: u8) -> Self {
        Self::from_u8(code)
    }
}

impl fmt::Display for ModbusErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#04X})", self, self.code())
    }
}

/// Read device identification access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceInformationLevel {
    Basic = 0x01,
    Regular = 0x02,
    Extended = 0x03,
    Individual = 0x04,
}

impl TryFrom<u8> for DeviceInformationLevel {
    type Error = ModbusError;

    fn try_from(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(Self::Basic),
            0x02 => Ok(Self::Regular),
            0x03 => Ok(Self::Extended),
            0x04 => Ok(Self::Individual),
            other => Err(ModbusError::invalid_data(format!(
                "Unknown device information level: {:#04X}",
                other
            ))),
        }
    }
}

/// Conformity level reported by a device. Encoded in 7 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceInformationConformityLevel {
    BasicStreamOnly = 0x01,
    RegularStreamOnly = 0x02,
    ExtendedStreamOnly = 0x03,
}

impl TryFrom<u8> for DeviceInformationConformityLevel {
    type Error = ModbusError;

    fn try_from(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(Self::BasicStreamOnly),
            0x02 => Ok(Self::RegularStreamOnly),
            0x03 => Ok(Self::ExtendedStreamOnly),
            other => Err(ModbusError::invalid_data(format!(
                "Unknown conformity level: {:#04X}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceInformationMoreFollows {
    NoMoreObjectsAvailable = 0x00,
    MoreObjectsAvailable = 0xFF,
}

impl TryFrom<u8> for DeviceInformationMoreFollows {
    type Error = ModbusError;

    fn try_from(value: u8) -> ModbusResult<Self> {
        match value {
            0x00 => Ok(Self::NoMoreObjectsAvailable),
            0xFF => Ok(Self::MoreObjectsAvailable),
            other => Err(ModbusError::invalid_data(format!(
                "Invalid more-follows marker: {:#04X}",
                other
            ))),
        }
    }
}

// ============================================================================
// Sub-record items
// ============================================================================

/// Common shape of an embedded record item.
pub trait RecordItem: Sized {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self>;
    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()>;
    fn length_in_bytes(&self) -> usize;
}

/// Parse items until `byte_length` bytes have been consumed.
pub(crate) fn parse_by_length<T: RecordItem>(
    buf: &mut ReadBuffer<'_>,
    byte_length: usize,
) -> ModbusResult<Vec<T>> {
    let end = buf.pos() + byte_length * 8;
    let mut items = Vec::new();
    while buf.pos() < end {
        items.push(T::parse(buf)?);
    }
    if buf.pos() != end {
        return Err(ModbusError::invalid_data(format!(
            "Record items overran their byte count by {} bits",
            buf.pos() - end
        )));
    }
    Ok(items)
}

/// Total serialized size of a list of items.
pub(crate) fn items_length<T: RecordItem>(items: &[T]) -> usize {
    items.iter().map(RecordItem::length_in_bytes).sum()
}

fn u8_length(len: usize, field: &str) -> ModbusResult<u8> {
    u8::try_from(len).map_err(|_| {
        ModbusError::invalid_data(format!("{} of {} does not fit in one byte", field, len))
    })
}

/// One sub-request of Read File Record (FC 0x14).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRecordRequestItem {
    pub reference_type: u8,
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
}

impl RecordItem for ReadFileRecordRequestItem {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            reference_type: buf.read_u8(8)?,
            file_number: buf.read_u16(16)?,
            record_number: buf.read_u16(16)?,
            record_length: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, self.reference_type)?;
        buf.write_u16(16, self.file_number)?;
        buf.write_u16(16, self.record_number)?;
        buf.write_u16(16, self.record_length)
    }

    fn length_in_bytes(&self) -> usize {
        7
    }
}

/// One sub-response of Read File Record.
///
/// The leading length byte counts the reference type plus the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRecordResponseItem {
    pub reference_type: u8,
    pub data: Vec<u8>,
}

impl RecordItem for ReadFileRecordResponseItem {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let data_length = buf.read_u8(8)?;
        let data_bytes = usize::from(data_length).checked_sub(1).ok_or_else(|| {
            ModbusError::invalid_data("File record response length must include the reference type")
        })?;
        let reference_type = buf.read_u8(8)?;
        let data = buf.read_byte_array(data_bytes)?;
        Ok(Self {
            reference_type,
            data,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, u8_length(self.data.len() + 1, "File record response length")?)?;
        buf.write_u8(8, self.reference_type)?;
        buf.write_byte_array(&self.data)
    }

    fn length_in_bytes(&self) -> usize {
        2 + self.data.len()
    }
}

/// One sub-request of Write File Record (FC 0x15). The device echoes the
/// same layout back, see [`WriteFileRecordResponseItem`].
///
/// `record_data` holds whole registers, so its length must be even.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileRecordItem {
    pub reference_type: u8,
    pub file_number: u16,
    pub record_number: u16,
    pub record_data: Vec<u8>,
}

pub type WriteFileRecordRequestItem = WriteFileRecordItem;
pub type WriteFileRecordResponseItem = WriteFileRecordItem;

impl WriteFileRecordItem {
    /// Build an item from register values.
    pub fn from_registers(
        reference_type: u8,
        file_number: u16,
        record_number: u16,
        registers: &[u16],
    ) -> Self {
        Self {
            reference_type,
            file_number,
            record_number,
            record_data: registers.iter().flat_map(|r| r.to_be_bytes()).collect(),
        }
    }

    /// Record length in registers.
    pub fn record_length(&self) -> usize {
        self.record_data.len() / 2
    }
}

impl RecordItem for WriteFileRecordItem {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let reference_type = buf.read_u8(8)?;
        let file_number = buf.read_u16(16)?;
        let record_number = buf.read_u16(16)?;
        let record_length = buf.read_u16(16)?;
        let record_data = buf.read_byte_array(usize::from(record_length) * 2)?;
        Ok(Self {
            reference_type,
            file_number,
            record_number,
            record_data,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        if self.record_data.len() % 2 != 0 {
            return Err(ModbusError::invalid_data(format!(
                "File record data must be whole registers, got {} bytes",
                self.record_data.len()
            )));
        }
        let record_length = u16::try_from(self.record_length()).map_err(|_| {
            ModbusError::invalid_data("File record length does not fit in 16 bits")
        })?;
        buf.write_u8(8, self.reference_type)?;
        buf.write_u16(16, self.file_number)?;
        buf.write_u16(16, self.record_number)?;
        buf.write_u16(16, record_length)?;
        buf.write_byte_array(&self.record_data)
    }

    fn length_in_bytes(&self) -> usize {
        7 + self.record_data.len()
    }
}

/// One object of a Read Device Identification response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformationObject {
    pub object_id: u8,
    pub data: Vec<u8>,
}

impl DeviceInformationObject {
    /// Object value as text (vendor name, product code, ...), lossily decoded.
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl RecordItem for DeviceInformationObject {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let object_id = buf.read_u8(8)?;
        let object_length = buf.read_u8(8)?;
        let data = buf.read_byte_array(usize::from(object_length))?;
        Ok(Self { object_id, data })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, self.object_id)?;
        buf.write_u8(8, u8_length(self.data.len(), "Object length")?)?;
        buf.write_byte_array(&self.data)
    }

    fn length_in_bytes(&self) -> usize {
        2 + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_is_lenient() {
        assert_eq!(ModbusErrorCode::from_u8(0x02), ModbusErrorCode::IllegalDataAddress);
        assert_eq!(ModbusErrorCode::from_u8(0x07), ModbusErrorCode::NegativeAcknowledge);
        assert_eq!(ModbusErrorCode::from_u8(0x42), ModbusErrorCode::Unknown(0x42));
        assert_eq!(ModbusErrorCode::Unknown(0x42).code(), 0x42);
        for code in [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0A, 0x0B] {
            assert_eq!(ModbusErrorCode::from_u8(code).code(), code);
        }
    }

    #[test]
    fn test_error_codes_follow_protocol_constants() {
        use crate::constants::*;
        assert_eq!(ModbusErrorCode::IllegalFunction.code(), EXCEPTION_ILLEGAL_FUNCTION);
        assert_eq!(
            ModbusErrorCode::from_u8(EXCEPTION_GATEWAY_TARGET_FAILED),
            ModbusErrorCode::GatewayTargetDeviceFailedToRespond
        );
        assert_eq!(
            ModbusErrorCode::from_u8(EXCEPTION_MEMORY_PARITY_ERROR).code(),
            EXCEPTION_MEMORY_PARITY_ERROR
        );
        assert_eq!(ModbusErrorCode::from_u8(0x09), ModbusErrorCode::Unknown(0x09));
    }

    #[test]
    fn test_strict_enums_reject_unknown_values() {
        assert_eq!(
            DeviceInformationLevel::try_from(0x04).unwrap(),
            DeviceInformationLevel::Individual
        );
        assert!(DeviceInformationLevel::try_from(0x05).is_err());
        assert!(DeviceInformationConformityLevel::try_from(0x00).is_err());
        assert!(DeviceInformationMoreFollows::try_from(0x01).is_err());
        assert_eq!(
            DeviceInformationMoreFollows::try_from(0xFF).unwrap(),
            DeviceInformationMoreFollows::MoreObjectsAvailable
        );
    }

    #[test]
    fn test_read_file_record_response_item() {
        let bytes = [0x05, 0x06, 0x0D, 0xFE, 0x00, 0x20];
        let mut rb = ReadBuffer::new(&bytes);
        let item = ReadFileRecordResponseItem::parse(&mut rb).unwrap();
        assert_eq!(item.reference_type, 0x06);
        assert_eq!(item.data, vec![0x0D, 0xFE, 0x00, 0x20]);
        assert_eq!(item.length_in_bytes(), bytes.len());

        let mut wb = WriteBuffer::new();
        item.serialize(&mut wb).unwrap();
        assert_eq!(wb.as_slice(), &bytes);
    }

    #[test]
    fn test_read_file_record_response_item_zero_length() {
        let mut rb = ReadBuffer::new(&[0x00, 0x06]);
        assert!(matches!(
            ReadFileRecordResponseItem::parse(&mut rb),
            Err(ModbusError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_write_file_record_item_length_in_registers() {
        let item = WriteFileRecordItem::from_registers(6, 4, 7, &[0x06AF, 0x04BE, 0x100D]);
        assert_eq!(item.record_length(), 3);
        let mut wb = WriteBuffer::new();
        item.serialize(&mut wb).unwrap();
        assert_eq!(
            wb.as_slice(),
            &[0x06, 0x00, 0x04, 0x00, 0x07, 0x00, 0x03, 0x06, 0xAF, 0x04, 0xBE, 0x10, 0x0D]
        );
        assert_eq!(item.length_in_bytes(), wb.as_slice().len());

        let odd = WriteFileRecordItem {
            reference_type: 6,
            file_number: 1,
            record_number: 1,
            record_data: vec![0x01],
        };
        assert!(odd.serialize(&mut WriteBuffer::new()).is_err());
    }

    #[test]
    fn test_parse_by_length_stops_on_boundary() {
        let bytes = [
            0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02, // item 1
            0x06, 0x00, 0x03, 0x00, 0x09, 0x00, 0x02, // item 2
            0xAA, // trailing byte belongs to someone else
        ];
        let mut rb = ReadBuffer::new(&bytes);
        let items: Vec<ReadFileRecordRequestItem> = parse_by_length(&mut rb, 14).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].record_number, 9);
        assert_eq!(items_length(&items), 14);
        assert_eq!(rb.pos(), 14 * 8);
    }

    #[test]
    fn test_parse_by_length_detects_overrun() {
        let bytes = [0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02];
        let mut rb = ReadBuffer::new(&bytes);
        let res: ModbusResult<Vec<ReadFileRecordRequestItem>> = parse_by_length(&mut rb, 5);
        assert!(res.is_err());
    }
}
