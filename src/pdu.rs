//! Modbus PDU data model and codec
//!
//! A PDU is a discriminated union keyed on three things: the error flag
//! (top bit of the first byte), the 7-bit function flag, and the direction
//! of travel. The direction is not on the wire, so every parse entry point
//! takes it explicitly: Read Coils request and Read Coils response share
//! function flag `0x01` but carry completely different fields.
//!
//! Parsing dispatches through [`PARSE_TABLE`], one entry per
//! `(function_flag, response)` pair. Serialization writes the discriminator
//! from the variant and then its payload, recomputing byte counts and other
//! implicit fields from the collections they describe.
//!
//! ```rust
//! use voltage_modbus_driver::pdu::{AddressRange, ModbusPdu};
//!
//! let pdu = ModbusPdu::from_bytes(&[0x03, 0x00, 0x6B, 0x00, 0x03], false).unwrap();
//! assert_eq!(
//!     pdu,
//!     ModbusPdu::ReadHoldingRegistersRequest(AddressRange::new(0x006B, 3))
//! );
//! assert_eq!(pdu.length_in_bytes(), 5);
//! ```

use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::records::{
    items_length, parse_by_length, DeviceInformationConformityLevel, DeviceInformationLevel,
    DeviceInformationMoreFollows, DeviceInformationObject, ModbusErrorCode,
    ReadFileRecordRequestItem, ReadFileRecordResponseItem, RecordItem,
    WriteFileRecordRequestItem, WriteFileRecordResponseItem,
};

/// Fields of one PDU variant, everything after the discriminator byte.
pub trait PduPayload {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self>
    where
        Self: Sized;

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()>;

    fn length_in_bits(&self) -> usize;
}

fn implicit_u8(len: usize, field: &str) -> ModbusResult<u8> {
    u8::try_from(len).map_err(|_| {
        ModbusError::invalid_data(format!("{} of {} does not fit in 8 bits", field, len))
    })
}

fn implicit_u16(len: usize, field: &str) -> ModbusResult<u16> {
    u16::try_from(len).map_err(|_| {
        ModbusError::invalid_data(format!("{} of {} does not fit in 16 bits", field, len))
    })
}

fn check_mei_type(buf: &mut ReadBuffer<'_>) -> ModbusResult<()> {
    let mei_type = buf.read_u8(8)?;
    if mei_type != MEI_TYPE_READ_DEVICE_IDENTIFICATION {
        return Err(ModbusError::const_mismatch(
            "meiType",
            u64::from(MEI_TYPE_READ_DEVICE_IDENTIFICATION),
            u64::from(mei_type),
        ));
    }
    Ok(())
}

// ============================================================================
// Payloads
// ============================================================================

/// Exception response. The function flag is kept so the frame round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPdu {
    pub function_flag: u8,
    pub exception_code: ModbusErrorCode,
}

impl PduPayload for ErrorPdu {
    /// Reads only the exception code; the caller fills in the function flag.
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            function_flag: 0,
            exception_code: ModbusErrorCode::from_u8(buf.read_u8(8)?),
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, self.exception_code.code())
    }

    fn length_in_bits(&self) -> usize {
        8
    }
}

/// `start:16, quantity:16`. Read requests (FC 0x01-0x04) and the echo of
/// multiple-write responses (FC 0x0F, 0x10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub starting_address: u16,
    pub quantity: u16,
}

impl AddressRange {
    pub fn new(starting_address: u16, quantity: u16) -> Self {
        Self {
            starting_address,
            quantity,
        }
    }
}

impl PduPayload for AddressRange {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            starting_address: buf.read_u16(16)?,
            quantity: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.starting_address)?;
        buf.write_u16(16, self.quantity)
    }

    fn length_in_bits(&self) -> usize {
        32
    }
}

/// `byteCount:8, value[byteCount]`. Read responses, Report Server Id and
/// Read/Write Multiple Registers responses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataResponse {
    pub value: Vec<u8>,
}

impl DataResponse {
    pub fn new(value: Vec<u8>) -> Self {
        Self { value }
    }

    /// Interpret the payload as big-endian registers. A trailing odd byte is ignored.
    pub fn registers(&self) -> Vec<u16> {
        self.value
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Unpack `quantity` coil states, least significant bit first.
    pub fn coils(&self, quantity: usize) -> Vec<bool> {
        (0..quantity)
            .map(|i| {
                self.value
                    .get(i / 8)
                    .is_some_and(|byte| (byte >> (i % 8)) & 0x01 != 0)
            })
            .collect()
    }
}

impl PduPayload for DataResponse {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let byte_count = buf.read_u8(8)?;
        Ok(Self {
            value: buf.read_byte_array(usize::from(byte_count))?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, implicit_u8(self.value.len(), "byteCount")?)?;
        buf.write_byte_array(&self.value)
    }

    fn length_in_bits(&self) -> usize {
        8 + self.value.len() * 8
    }
}

/// `address:16, value:16`. Single coil / single register writes, both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleWrite {
    pub address: u16,
    pub value: u16,
}

impl PduPayload for SingleWrite {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            address: buf.read_u16(16)?,
            value: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.address)?;
        buf.write_u16(16, self.value)
    }

    fn length_in_bits(&self) -> usize {
        32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionStatus {
    pub value: u8,
}

impl PduPayload for ExceptionStatus {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            value: buf.read_u8(8)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, self.value)
    }

    fn length_in_bits(&self) -> usize {
        8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    pub sub_function: u16,
    pub data: u16,
}

impl PduPayload for Diagnostic {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            sub_function: buf.read_u16(16)?,
            data: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.sub_function)?;
        buf.write_u16(16, self.data)
    }

    fn length_in_bits(&self) -> usize {
        32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComEventCounter {
    pub status: u16,
    pub event_count: u16,
}

impl PduPayload for ComEventCounter {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            status: buf.read_u16(16)?,
            event_count: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.status)?;
        buf.write_u16(16, self.event_count)
    }

    fn length_in_bits(&self) -> usize {
        32
    }
}

/// Get Com Event Log response. The byte count covers the three counters
/// (6 bytes) plus the events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComEventLog {
    pub status: u16,
    pub event_count: u16,
    pub message_count: u16,
    pub events: Vec<u8>,
}

impl PduPayload for ComEventLog {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let byte_count = buf.read_u8(8)?;
        let events_len = usize::from(byte_count).checked_sub(6).ok_or_else(|| {
            ModbusError::invalid_data(format!(
                "Com event log byte count {} is smaller than its fixed fields",
                byte_count
            ))
        })?;
        Ok(Self {
            status: buf.read_u16(16)?,
            event_count: buf.read_u16(16)?,
            message_count: buf.read_u16(16)?,
            events: buf.read_byte_array(events_len)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, implicit_u8(self.events.len() + 6, "byteCount")?)?;
        buf.write_u16(16, self.status)?;
        buf.write_u16(16, self.event_count)?;
        buf.write_u16(16, self.message_count)?;
        buf.write_byte_array(&self.events)
    }

    fn length_in_bits(&self) -> usize {
        8 + 48 + self.events.len() * 8
    }
}

/// Write Multiple Coils / Registers request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipleWrite {
    pub starting_address: u16,
    pub quantity: u16,
    pub value: Vec<u8>,
}

impl PduPayload for MultipleWrite {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let starting_address = buf.read_u16(16)?;
        let quantity = buf.read_u16(16)?;
        let byte_count = buf.read_u8(8)?;
        Ok(Self {
            starting_address,
            quantity,
            value: buf.read_byte_array(usize::from(byte_count))?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.starting_address)?;
        buf.write_u16(16, self.quantity)?;
        buf.write_u8(8, implicit_u8(self.value.len(), "byteCount")?)?;
        buf.write_byte_array(&self.value)
    }

    fn length_in_bits(&self) -> usize {
        40 + self.value.len() * 8
    }
}

/// Items of a file record PDU, bounded on the wire by a byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecords<T> {
    pub items: Vec<T>,
}

impl<T> FileRecords<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T: RecordItem> PduPayload for FileRecords<T> {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let byte_count = buf.read_u8(8)?;
        Ok(Self {
            items: parse_by_length(buf, usize::from(byte_count))?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, implicit_u8(items_length(&self.items), "byteCount")?)?;
        for item in &self.items {
            item.serialize(buf)?;
        }
        Ok(())
    }

    fn length_in_bits(&self) -> usize {
        8 + items_length(&self.items) * 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskWrite {
    pub reference_address: u16,
    pub and_mask: u16,
    pub or_mask: u16,
}

impl PduPayload for MaskWrite {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            reference_address: buf.read_u16(16)?,
            and_mask: buf.read_u16(16)?,
            or_mask: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.reference_address)?;
        buf.write_u16(16, self.and_mask)?;
        buf.write_u16(16, self.or_mask)
    }

    fn length_in_bits(&self) -> usize {
        48
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteMultiple {
    pub read_starting_address: u16,
    pub read_quantity: u16,
    pub write_starting_address: u16,
    pub write_quantity: u16,
    pub value: Vec<u8>,
}

impl PduPayload for ReadWriteMultiple {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let read_starting_address = buf.read_u16(16)?;
        let read_quantity = buf.read_u16(16)?;
        let write_starting_address = buf.read_u16(16)?;
        let write_quantity = buf.read_u16(16)?;
        let byte_count = buf.read_u8(8)?;
        Ok(Self {
            read_starting_address,
            read_quantity,
            write_starting_address,
            write_quantity,
            value: buf.read_byte_array(usize::from(byte_count))?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.read_starting_address)?;
        buf.write_u16(16, self.read_quantity)?;
        buf.write_u16(16, self.write_starting_address)?;
        buf.write_u16(16, self.write_quantity)?;
        buf.write_u8(8, implicit_u8(self.value.len(), "byteCount")?)?;
        buf.write_byte_array(&self.value)
    }

    fn length_in_bits(&self) -> usize {
        72 + self.value.len() * 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoPointer {
    pub fifo_pointer_address: u16,
}

impl PduPayload for FifoPointer {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        Ok(Self {
            fifo_pointer_address: buf.read_u16(16)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, self.fifo_pointer_address)
    }

    fn length_in_bits(&self) -> usize {
        16
    }
}

/// Read FIFO Queue response: `byteCount:16 = len*2+2, fifoCount:16, values`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FifoQueue {
    pub fifo_value: Vec<u16>,
}

impl PduPayload for FifoQueue {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        let _byte_count = buf.read_u16(16)?;
        let fifo_count = buf.read_u16(16)?;
        let mut fifo_value = Vec::with_capacity(usize::from(fifo_count));
        for _ in 0..fifo_count {
            fifo_value.push(buf.read_u16(16)?);
        }
        Ok(Self { fifo_value })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u16(16, implicit_u16(self.fifo_value.len() * 2 + 2, "byteCount")?)?;
        buf.write_u16(16, implicit_u16(self.fifo_value.len(), "fifoCount")?)?;
        for &value in &self.fifo_value {
            buf.write_u16(16, value)?;
        }
        Ok(())
    }

    fn length_in_bits(&self) -> usize {
        32 + self.fifo_value.len() * 16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentificationRequest {
    pub level: DeviceInformationLevel,
    pub object_id: u8,
}

impl PduPayload for DeviceIdentificationRequest {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        check_mei_type(buf)?;
        Ok(Self {
            level: DeviceInformationLevel::try_from(buf.read_u8(8)?)?,
            object_id: buf.read_u8(8)?,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, MEI_TYPE_READ_DEVICE_IDENTIFICATION)?;
        buf.write_u8(8, self.level as u8)?;
        buf.write_u8(8, self.object_id)
    }

    fn length_in_bits(&self) -> usize {
        24
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub level: DeviceInformationLevel,
    pub individual_access: bool,
    pub conformity_level: DeviceInformationConformityLevel,
    pub more_follows: DeviceInformationMoreFollows,
    pub next_object_id: u8,
    pub objects: Vec<DeviceInformationObject>,
}

impl PduPayload for DeviceIdentification {
    fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<Self> {
        check_mei_type(buf)?;
        let level = DeviceInformationLevel::try_from(buf.read_u8(8)?)?;
        let individual_access = buf.read_bit()?;
        let conformity_level = DeviceInformationConformityLevel::try_from(buf.read_u8(7)?)?;
        let more_follows = DeviceInformationMoreFollows::try_from(buf.read_u8(8)?)?;
        let next_object_id = buf.read_u8(8)?;
        let number_of_objects = buf.read_u8(8)?;
        let mut objects = Vec::with_capacity(usize::from(number_of_objects));
        for _ in 0..number_of_objects {
            objects.push(DeviceInformationObject::parse(buf)?);
        }
        Ok(Self {
            level,
            individual_access,
            conformity_level,
            more_follows,
            next_object_id,
            objects,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_u8(8, MEI_TYPE_READ_DEVICE_IDENTIFICATION)?;
        buf.write_u8(8, self.level as u8)?;
        buf.write_bit(self.individual_access)?;
        buf.write_u8(7, self.conformity_level as u8)?;
        buf.write_u8(8, self.more_follows as u8)?;
        buf.write_u8(8, self.next_object_id)?;
        buf.write_u8(8, implicit_u8(self.objects.len(), "numberOfObjects")?)?;
        for object in &self.objects {
            object.serialize(buf)?;
        }
        Ok(())
    }

    fn length_in_bits(&self) -> usize {
        48 + items_length(&self.objects) * 8
    }
}

// ============================================================================
// PDU
// ============================================================================

/// Every PDU this driver understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusPdu {
    Error(ErrorPdu),

    ReadCoilsRequest(AddressRange),
    ReadCoilsResponse(DataResponse),
    ReadDiscreteInputsRequest(AddressRange),
    ReadDiscreteInputsResponse(DataResponse),
    ReadHoldingRegistersRequest(AddressRange),
    ReadHoldingRegistersResponse(DataResponse),
    ReadInputRegistersRequest(AddressRange),
    ReadInputRegistersResponse(DataResponse),

    WriteSingleCoilRequest(SingleWrite),
    WriteSingleCoilResponse(SingleWrite),
    WriteSingleRegisterRequest(SingleWrite),
    WriteSingleRegisterResponse(SingleWrite),

    ReadExceptionStatusRequest,
    ReadExceptionStatusResponse(ExceptionStatus),
    DiagnosticRequest(Diagnostic),
    DiagnosticResponse(Diagnostic),
    GetComEventCounterRequest,
    GetComEventCounterResponse(ComEventCounter),
    GetComEventLogRequest,
    GetComEventLogResponse(ComEventLog),

    WriteMultipleCoilsRequest(MultipleWrite),
    WriteMultipleCoilsResponse(AddressRange),
    WriteMultipleRegistersRequest(MultipleWrite),
    WriteMultipleRegistersResponse(AddressRange),

    ReportServerIdRequest,
    ReportServerIdResponse(DataResponse),

    ReadFileRecordRequest(FileRecords<ReadFileRecordRequestItem>),
    ReadFileRecordResponse(FileRecords<ReadFileRecordResponseItem>),
    WriteFileRecordRequest(FileRecords<WriteFileRecordRequestItem>),
    WriteFileRecordResponse(FileRecords<WriteFileRecordResponseItem>),

    MaskWriteRegisterRequest(MaskWrite),
    MaskWriteRegisterResponse(MaskWrite),
    ReadWriteMultipleRegistersRequest(ReadWriteMultiple),
    ReadWriteMultipleRegistersResponse(DataResponse),
    ReadFifoQueueRequest(FifoPointer),
    ReadFifoQueueResponse(FifoQueue),

    ReadDeviceIdentificationRequest(DeviceIdentificationRequest),
    ReadDeviceIdentificationResponse(DeviceIdentification),
}

/// Parser for the payload of one variant.
pub type ParseFn = fn(&mut ReadBuffer<'_>) -> ModbusResult<ModbusPdu>;

macro_rules! entry {
    ($fc:expr, $response:expr, $variant:ident, $payload:ty) => {{
        fn parse(buf: &mut ReadBuffer<'_>) -> ModbusResult<ModbusPdu> {
            Ok(ModbusPdu::$variant(<$payload as PduPayload>::parse(buf)?))
        }
        ($fc, $response, parse as ParseFn)
    }};
    ($fc:expr, $response:expr, $variant:ident) => {{
        fn parse(_buf: &mut ReadBuffer<'_>) -> ModbusResult<ModbusPdu> {
            Ok(ModbusPdu::$variant)
        }
        ($fc, $response, parse as ParseFn)
    }};
}

/// Dispatch table for non-error PDUs: `(function_flag, response, parser)`.
///
/// Each `(function_flag, response)` pair appears at most once.
pub static PARSE_TABLE: &[(u8, bool, ParseFn)] = &[
    entry!(FC_READ_COILS, false, ReadCoilsRequest, AddressRange),
    entry!(FC_READ_COILS, true, ReadCoilsResponse, DataResponse),
    entry!(FC_READ_DISCRETE_INPUTS, false, ReadDiscreteInputsRequest, AddressRange),
    entry!(FC_READ_DISCRETE_INPUTS, true, ReadDiscreteInputsResponse, DataResponse),
    entry!(FC_READ_HOLDING_REGISTERS, false, ReadHoldingRegistersRequest, AddressRange),
    entry!(FC_READ_HOLDING_REGISTERS, true, ReadHoldingRegistersResponse, DataResponse),
    entry!(FC_READ_INPUT_REGISTERS, false, ReadInputRegistersRequest, AddressRange),
    entry!(FC_READ_INPUT_REGISTERS, true, ReadInputRegistersResponse, DataResponse),
    entry!(FC_WRITE_SINGLE_COIL, false, WriteSingleCoilRequest, SingleWrite),
    entry!(FC_WRITE_SINGLE_COIL, true, WriteSingleCoilResponse, SingleWrite),
    entry!(FC_WRITE_SINGLE_REGISTER, false, WriteSingleRegisterRequest, SingleWrite),
    entry!(FC_WRITE_SINGLE_REGISTER, true, WriteSingleRegisterResponse, SingleWrite),
    entry!(FC_READ_EXCEPTION_STATUS, false, ReadExceptionStatusRequest),
    entry!(FC_READ_EXCEPTION_STATUS, true, ReadExceptionStatusResponse, ExceptionStatus),
    entry!(FC_DIAGNOSTIC, false, DiagnosticRequest, Diagnostic),
    entry!(FC_DIAGNOSTIC, true, DiagnosticResponse, Diagnostic),
    entry!(FC_GET_COM_EVENT_COUNTER, false, GetComEventCounterRequest),
    entry!(FC_GET_COM_EVENT_COUNTER, true, GetComEventCounterResponse, ComEventCounter),
    entry!(FC_GET_COM_EVENT_LOG, false, GetComEventLogRequest),
    entry!(FC_GET_COM_EVENT_LOG, true, GetComEventLogResponse, ComEventLog),
    entry!(FC_WRITE_MULTIPLE_COILS, false, WriteMultipleCoilsRequest, MultipleWrite),
    entry!(FC_WRITE_MULTIPLE_COILS, true, WriteMultipleCoilsResponse, AddressRange),
    entry!(FC_WRITE_MULTIPLE_REGISTERS, false, WriteMultipleRegistersRequest, MultipleWrite),
    entry!(FC_WRITE_MULTIPLE_REGISTERS, true, WriteMultipleRegistersResponse, AddressRange),
    entry!(FC_REPORT_SERVER_ID, false, ReportServerIdRequest),
    entry!(FC_REPORT_SERVER_ID, true, ReportServerIdResponse, DataResponse),
    entry!(
        FC_READ_FILE_RECORD,
        false,
        ReadFileRecordRequest,
        FileRecords<ReadFileRecordRequestItem>
    ),
    entry!(
        FC_READ_FILE_RECORD,
        true,
        ReadFileRecordResponse,
        FileRecords<ReadFileRecordResponseItem>
    ),
    entry!(
        FC_WRITE_FILE_RECORD,
        false,
        WriteFileRecordRequest,
        FileRecords<WriteFileRecordRequestItem>
    ),
    entry!(
        FC_WRITE_FILE_RECORD,
        true,
        WriteFileRecordResponse,
        FileRecords<WriteFileRecordResponseItem>
    ),
    entry!(FC_MASK_WRITE_REGISTER, false, MaskWriteRegisterRequest, MaskWrite),
    entry!(FC_MASK_WRITE_REGISTER, true, MaskWriteRegisterResponse, MaskWrite),
    entry!(
        FC_READ_WRITE_MULTIPLE_REGISTERS,
        false,
        ReadWriteMultipleRegistersRequest,
        ReadWriteMultiple
    ),
    entry!(
        FC_READ_WRITE_MULTIPLE_REGISTERS,
        true,
        ReadWriteMultipleRegistersResponse,
        DataResponse
    ),
    entry!(FC_READ_FIFO_QUEUE, false, ReadFifoQueueRequest, FifoPointer),
    entry!(FC_READ_FIFO_QUEUE, true, ReadFifoQueueResponse, FifoQueue),
    entry!(
        FC_READ_DEVICE_IDENTIFICATION,
        false,
        ReadDeviceIdentificationRequest,
        DeviceIdentificationRequest
    ),
    entry!(
        FC_READ_DEVICE_IDENTIFICATION,
        true,
        ReadDeviceIdentificationResponse,
        DeviceIdentification
    ),
];

impl ModbusPdu {
    /// Parse one PDU starting at the buffer cursor.
    pub fn parse(buf: &mut ReadBuffer<'_>, response: bool) -> ModbusResult<Self> {
        let error_flag = buf.read_bit()?;
        let function_flag = buf.read_u8(7)?;

        if error_flag {
            let mut error = ErrorPdu::parse(buf)?;
            error.function_flag = function_flag;
            debug!(
                "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                function_flag,
                Self::function_code_description(function_flag),
                error.exception_code.code()
            );
            return Ok(Self::Error(error));
        }

        let parse = PARSE_TABLE
            .iter()
            .find(|(fc, dir, _)| *fc == function_flag && *dir == response)
            .map(|(_, _, parse)| *parse)
            .ok_or_else(|| ModbusError::unknown_variant(false, function_flag, response))?;

        let pdu = parse(buf)?;
        debug!(
            "PDU parsed: FC={:02X} ({}), response={}, bits={}",
            function_flag,
            Self::function_code_description(function_flag),
            response,
            pdu.length_in_bits()
        );
        Ok(pdu)
    }

    /// Write the discriminator byte and the payload.
    pub fn serialize(&self, buf: &mut WriteBuffer) -> ModbusResult<()> {
        buf.write_bit(self.error_flag())?;
        buf.write_u8(7, self.function_flag())?;
        if let Some(payload) = self.payload() {
            payload.serialize(buf)?;
        }
        Ok(())
    }

    /// Parse a standalone PDU. Trailing bytes are ignored.
    pub fn from_bytes(data: &[u8], response: bool) -> ModbusResult<Self> {
        let mut buf = ReadBuffer::new(data);
        let pdu = Self::parse(&mut buf, response)?;
        if buf.remaining_bits() > 0 {
            debug!(
                "PDU FC={:02X} left {} trailing bits unread",
                pdu.function_flag(),
                buf.remaining_bits()
            );
        }
        Ok(pdu)
    }

    /// Serialize into a fresh byte buffer.
    pub fn to_bytes(&self) -> ModbusResult<Bytes> {
        let mut buf = WriteBuffer::with_capacity(self.length_in_bytes());
        self.serialize(&mut buf)?;
        Ok(buf.into_bytes())
    }

    pub fn error_flag(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// 7-bit function code. For an error PDU, the code it answers.
    pub fn function_flag(&self) -> u8 {
        self.discriminator().0
    }

    /// Direction this variant travels in. Error PDUs are responses.
    pub fn is_response(&self) -> bool {
        self.discriminator().1
    }

    pub fn is_exception(&self) -> bool {
        self.error_flag()
    }

    pub fn exception_code(&self) -> Option<ModbusErrorCode> {
        match self {
            Self::Error(error) => Some(error.exception_code),
            _ => None,
        }
    }

    /// Discriminator byte plus every field, in bits.
    pub fn length_in_bits(&self) -> usize {
        PDU_DISCRIMINATOR_BITS + self.payload().map_or(0, |p| p.length_in_bits())
    }

    pub fn length_in_bytes(&self) -> usize {
        self.length_in_bits().div_ceil(8)
    }

    fn discriminator(&self) -> (u8, bool) {
        match self {
            Self::Error(e) => (e.function_flag & 0x7F, true),
            Self::ReadCoilsRequest(_) => (FC_READ_COILS, false),
            Self::ReadCoilsResponse(_) => (FC_READ_COILS, true),
            Self::ReadDiscreteInputsRequest(_) => (FC_READ_DISCRETE_INPUTS, false),
            Self::ReadDiscreteInputsResponse(_) => (FC_READ_DISCRETE_INPUTS, true),
            Self::ReadHoldingRegistersRequest(_) => (FC_READ_HOLDING_REGISTERS, false),
            Self::ReadHoldingRegistersResponse(_) => (FC_READ_HOLDING_REGISTERS, true),
            Self::ReadInputRegistersRequest(_) => (FC_READ_INPUT_REGISTERS, false),
            Self::ReadInputRegistersResponse(_) => (FC_READ_INPUT_REGISTERS, true),
            Self::WriteSingleCoilRequest(_) => (FC_WRITE_SINGLE_COIL, false),
            Self::WriteSingleCoilResponse(_) => (FC_WRITE_SINGLE_COIL, true),
            Self::WriteSingleRegisterRequest(_) => (FC_WRITE_SINGLE_REGISTER, false),
            Self::WriteSingleRegisterResponse(_) => (FC_WRITE_SINGLE_REGISTER, true),
            Self::ReadExceptionStatusRequest => (FC_READ_EXCEPTION_STATUS, false),
            Self::ReadExceptionStatusResponse(_) => (FC_READ_EXCEPTION_STATUS, true),
            Self::DiagnosticRequest(_) => (FC_DIAGNOSTIC, false),
            Self::DiagnosticResponse(_) => (FC_DIAGNOSTIC, true),
            Self::GetComEventCounterRequest => (FC_GET_COM_EVENT_COUNTER, false),
            Self::GetComEventCounterResponse(_) => (FC_GET_COM_EVENT_COUNTER, true),
            Self::GetComEventLogRequest => (FC_GET_COM_EVENT_LOG, false),
            Self::GetComEventLogResponse(_) => (FC_GET_COM_EVENT_LOG, true),
            Self::WriteMultipleCoilsRequest(_) => (FC_WRITE_MULTIPLE_COILS, false),
            Self::WriteMultipleCoilsResponse(_) => (FC_WRITE_MULTIPLE_COILS, true),
            Self::WriteMultipleRegistersRequest(_) => (FC_WRITE_MULTIPLE_REGISTERS, false),
            Self::WriteMultipleRegistersResponse(_) => (FC_WRITE_MULTIPLE_REGISTERS, true),
            Self::ReportServerIdRequest => (FC_REPORT_SERVER_ID, false),
            Self::ReportServerIdResponse(_) => (FC_REPORT_SERVER_ID, true),
            Self::ReadFileRecordRequest(_) => (FC_READ_FILE_RECORD, false),
            Self::ReadFileRecordResponse(_) => (FC_READ_FILE_RECORD, true),
            Self::WriteFileRecordRequest(_) => (FC_WRITE_FILE_RECORD, false),
            Self::WriteFileRecordResponse(_) => (FC_WRITE_FILE_RECORD, true),
            Self::MaskWriteRegisterRequest(_) => (FC_MASK_WRITE_REGISTER, false),
            Self::MaskWriteRegisterResponse(_) => (FC_MASK_WRITE_REGISTER, true),
            Self::ReadWriteMultipleRegistersRequest(_) => (FC_READ_WRITE_MULTIPLE_REGISTERS, false),
            Self::ReadWriteMultipleRegistersResponse(_) => (FC_READ_WRITE_MULTIPLE_REGISTERS, true),
            Self::ReadFifoQueueRequest(_) => (FC_READ_FIFO_QUEUE, false),
            Self::ReadFifoQueueResponse(_) => (FC_READ_FIFO_QUEUE, true),
            Self::ReadDeviceIdentificationRequest(_) => (FC_READ_DEVICE_IDENTIFICATION, false),
            Self::ReadDeviceIdentificationResponse(_) => (FC_READ_DEVICE_IDENTIFICATION, true),
        }
    }

    fn payload(&self) -> Option<&dyn PduPayload> {
        match self {
            Self::Error(p) => Some(p),
            Self::ReadCoilsRequest(p)
            | Self::ReadDiscreteInputsRequest(p)
            | Self::ReadHoldingRegistersRequest(p)
            | Self::ReadInputRegistersRequest(p)
            | Self::WriteMultipleCoilsResponse(p)
            | Self::WriteMultipleRegistersResponse(p) => Some(p),
            Self::ReadCoilsResponse(p)
            | Self::ReadDiscreteInputsResponse(p)
            | Self::ReadHoldingRegistersResponse(p)
            | Self::ReadInputRegistersResponse(p)
            | Self::ReportServerIdResponse(p)
            | Self::ReadWriteMultipleRegistersResponse(p) => Some(p),
            Self::WriteSingleCoilRequest(p)
            | Self::WriteSingleCoilResponse(p)
            | Self::WriteSingleRegisterRequest(p)
            | Self::WriteSingleRegisterResponse(p) => Some(p),
            Self::ReadExceptionStatusResponse(p) => Some(p),
            Self::DiagnosticRequest(p) | Self::DiagnosticResponse(p) => Some(p),
            Self::GetComEventCounterResponse(p) => Some(p),
            Self::GetComEventLogResponse(p) => Some(p),
            Self::WriteMultipleCoilsRequest(p) | Self::WriteMultipleRegistersRequest(p) => Some(p),
            Self::ReadFileRecordRequest(p) => Some(p),
            Self::ReadFileRecordResponse(p) => Some(p),
            Self::WriteFileRecordRequest(p) | Self::WriteFileRecordResponse(p) => Some(p),
            Self::MaskWriteRegisterRequest(p) | Self::MaskWriteRegisterResponse(p) => Some(p),
            Self::ReadWriteMultipleRegistersRequest(p) => Some(p),
            Self::ReadFifoQueueRequest(p) => Some(p),
            Self::ReadFifoQueueResponse(p) => Some(p),
            Self::ReadDeviceIdentificationRequest(p) => Some(p),
            Self::ReadDeviceIdentificationResponse(p) => Some(p),
            Self::ReadExceptionStatusRequest
            | Self::GetComEventCounterRequest
            | Self::GetComEventLogRequest
            | Self::ReportServerIdRequest => None,
        }
    }

    /// Get function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            FC_READ_COILS => "Read Coils",
            FC_READ_DISCRETE_INPUTS => "Read Discrete Inputs",
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_READ_INPUT_REGISTERS => "Read Input Registers",
            FC_WRITE_SINGLE_COIL => "Write Single Coil",
            FC_WRITE_SINGLE_REGISTER => "Write Single Register",
            FC_READ_EXCEPTION_STATUS => "Read Exception Status",
            FC_DIAGNOSTIC => "Diagnostic",
            FC_GET_COM_EVENT_COUNTER => "Get Com Event Counter",
            FC_GET_COM_EVENT_LOG => "Get Com Event Log",
            FC_WRITE_MULTIPLE_COILS => "Write Multiple Coils",
            FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
            FC_REPORT_SERVER_ID => "Report Server Id",
            FC_READ_FILE_RECORD => "Read File Record",
            FC_WRITE_FILE_RECORD => "Write File Record",
            FC_MASK_WRITE_REGISTER => "Mask Write Register",
            FC_READ_WRITE_MULTIPLE_REGISTERS => "Read/Write Multiple Registers",
            FC_READ_FIFO_QUEUE => "Read FIFO Queue",
            FC_READ_DEVICE_IDENTIFICATION => "Read Device Identification",
            _ => "Unknown Function",
        }
    }
}

// ============================================================================
// Request constructors
// ============================================================================

impl ModbusPdu {
    /// Build a read request PDU for FC01-04
    ///
    /// # Arguments
    /// * `fc` - Function code (1, 2, 3, or 4)
    /// * `start_address` - Starting address for the read operation
    /// * `quantity` - Number of coils (FC01/02) or registers (FC03/04) to read
    pub fn read_request(fc: u8, start_address: u16, quantity: u16) -> ModbusResult<Self> {
        let range = AddressRange::new(start_address, quantity);
        match fc {
            FC_READ_COILS => Ok(Self::ReadCoilsRequest(range)),
            FC_READ_DISCRETE_INPUTS => Ok(Self::ReadDiscreteInputsRequest(range)),
            FC_READ_HOLDING_REGISTERS => Ok(Self::ReadHoldingRegistersRequest(range)),
            FC_READ_INPUT_REGISTERS => Ok(Self::ReadInputRegistersRequest(range)),
            _ => Err(ModbusError::invalid_function(fc)),
        }
    }

    /// Write single coil (FC05). ON is encoded as `0xFF00`.
    pub fn write_single_coil(address: u16, value: bool) -> Self {
        Self::WriteSingleCoilRequest(SingleWrite {
            address,
            value: if value { 0xFF00 } else { 0x0000 },
        })
    }

    /// Write single register (FC06).
    pub fn write_single_register(address: u16, value: u16) -> Self {
        Self::WriteSingleRegisterRequest(SingleWrite { address, value })
    }

    /// Write multiple coils (FC15). Coils are packed least significant bit first.
    pub fn write_multiple_coils(address: u16, values: &[bool]) -> ModbusResult<Self> {
        let quantity = implicit_u16(values.len(), "coil quantity")?;
        let mut packed = vec![0u8; values.len().div_ceil(8)];
        for (i, &value) in values.iter().enumerate() {
            if value {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(Self::WriteMultipleCoilsRequest(MultipleWrite {
            starting_address: address,
            quantity,
            value: packed,
        }))
    }

    /// Write multiple registers (FC16), big-endian.
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> ModbusResult<Self> {
        let quantity = implicit_u16(values.len(), "register quantity")?;
        Ok(Self::WriteMultipleRegistersRequest(MultipleWrite {
            starting_address: address,
            quantity,
            value: values.iter().flat_map(|v| v.to_be_bytes()).collect(),
        }))
    }

    /// Mask write register (FC22).
    pub fn mask_write_register(address: u16, and_mask: u16, or_mask: u16) -> Self {
        Self::MaskWriteRegisterRequest(MaskWrite {
            reference_address: address,
            and_mask,
            or_mask,
        })
    }

    /// Read/write multiple registers (FC23). The write happens before the read.
    pub fn read_write_multiple_registers(
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<Self> {
        Ok(Self::ReadWriteMultipleRegistersRequest(ReadWriteMultiple {
            read_starting_address: read_address,
            read_quantity,
            write_starting_address: write_address,
            write_quantity: implicit_u16(values.len(), "register quantity")?,
            value: values.iter().flat_map(|v| v.to_be_bytes()).collect(),
        }))
    }

    /// Read device identification (FC43 / MEI 0x0E).
    pub fn read_device_identification(level: DeviceInformationLevel, object_id: u8) -> Self {
        Self::ReadDeviceIdentificationRequest(DeviceIdentificationRequest { level, object_id })
    }
}

impl fmt::Display for ModbusPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(
                f,
                "{} exception {}",
                Self::function_code_description(e.function_flag),
                e.exception_code
            ),
            other => write!(
                f,
                "{} {}",
                Self::function_code_description(other.function_flag()),
                if other.is_response() { "response" } else { "request" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(bytes: &[u8], response: bool) -> ModbusPdu {
        let pdu = ModbusPdu::from_bytes(bytes, response).unwrap();
        assert_eq!(pdu.to_bytes().unwrap().as_ref(), bytes);
        assert_eq!(pdu.length_in_bytes(), bytes.len());
        assert_eq!(pdu.is_response(), response);
        pdu
    }

    #[test]
    fn test_read_coils_response() {
        let pdu = roundtrip(&[0x01, 0x02, 0xCD, 0x01], true);
        match &pdu {
            ModbusPdu::ReadCoilsResponse(data) => {
                assert_eq!(data.value, vec![0xCD, 0x01]);
                assert_eq!(
                    data.coils(10),
                    vec![true, false, true, true, false, false, true, true, true, false]
                );
            }
            other => panic!("unexpected variant {other:?}"),
        }
        assert_eq!(pdu.length_in_bytes(), 4);
    }

    #[test]
    fn test_direction_selects_variant() {
        let bytes = [0x03, 0x00, 0x6B, 0x00, 0x03];
        let request = ModbusPdu::from_bytes(&bytes, false).unwrap();
        assert_eq!(
            request,
            ModbusPdu::ReadHoldingRegistersRequest(AddressRange::new(0x006B, 3))
        );

        // Same bytes as a response: byteCount 0 followed by trailing data
        let response = ModbusPdu::from_bytes(&bytes, true).unwrap();
        assert_eq!(
            response,
            ModbusPdu::ReadHoldingRegistersResponse(DataResponse::default())
        );
    }

    #[test]
    fn test_error_flag_overrides_function() {
        let pdu = roundtrip(&[0x83, 0x02], true);
        assert!(pdu.is_exception());
        assert_eq!(pdu.function_flag(), 0x03);
        assert_eq!(pdu.exception_code(), Some(ModbusErrorCode::IllegalDataAddress));

        // Error parsing ignores the direction flag and unknown function codes
        let pdu = ModbusPdu::from_bytes(&[0xC2, 0x42], false).unwrap();
        assert_eq!(pdu.function_flag(), 0x42);
        assert_eq!(pdu.exception_code(), Some(ModbusErrorCode::Unknown(0x42)));
        assert_eq!(pdu.to_bytes().unwrap().as_ref(), &[0xC2, 0x42]);
    }

    #[test]
    fn test_unknown_variant() {
        let err = ModbusPdu::from_bytes(&[0x42, 0x00], false).unwrap_err();
        assert_eq!(err, ModbusError::unknown_variant(false, 0x42, false));
    }

    #[test]
    fn test_truncated_pdu_underflows() {
        let err = ModbusPdu::from_bytes(&[0x03, 0x00], false).unwrap_err();
        assert!(matches!(err, ModbusError::BufferUnderflow { .. }));

        let err = ModbusPdu::from_bytes(&[], true).unwrap_err();
        assert!(matches!(err, ModbusError::BufferUnderflow { .. }));
    }

    #[test]
    fn test_parse_table_has_unique_discriminators() {
        for (i, (fc, dir, _)) in PARSE_TABLE.iter().enumerate() {
            let dupes = PARSE_TABLE[i + 1..]
                .iter()
                .filter(|(other_fc, other_dir, _)| other_fc == fc && other_dir == dir)
                .count();
            assert_eq!(dupes, 0, "duplicate entry for FC {fc:#04X} response={dir}");
        }
        assert_eq!(PARSE_TABLE.len(), 38);
    }

    #[test]
    fn test_field_less_requests() {
        for fc in [0x07u8, 0x0B, 0x0C, 0x11] {
            let pdu = roundtrip(&[fc], false);
            assert_eq!(pdu.length_in_bits(), 8);
        }
    }

    #[test]
    fn test_com_event_log_response() {
        let bytes = [0x0C, 0x08, 0x00, 0x00, 0x01, 0x08, 0x01, 0x21, 0x20, 0x00];
        let pdu = roundtrip(&bytes, true);
        match pdu {
            ModbusPdu::GetComEventLogResponse(log) => {
                assert_eq!(log.event_count, 0x0108);
                assert_eq!(log.message_count, 0x0121);
                assert_eq!(log.events, vec![0x20, 0x00]);
            }
            other => panic!("unexpected variant {other:?}"),
        }

        let err = ModbusPdu::from_bytes(&[0x0C, 0x05, 0, 0, 0, 0, 0, 0], true).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
    }

    #[test]
    fn test_fifo_queue_response() {
        let bytes = [0x18, 0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84];
        let pdu = roundtrip(&bytes, true);
        assert_eq!(
            pdu,
            ModbusPdu::ReadFifoQueueResponse(FifoQueue {
                fifo_value: vec![0x01B8, 0x1284]
            })
        );
    }

    #[test]
    fn test_read_file_record_request() {
        let bytes = [
            0x14, 0x0E, 0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02, 0x06, 0x00, 0x03, 0x00, 0x09,
            0x00, 0x02,
        ];
        let pdu = roundtrip(&bytes, false);
        match pdu {
            ModbusPdu::ReadFileRecordRequest(records) => {
                assert_eq!(records.items.len(), 2);
                assert_eq!(records.items[0].file_number, 4);
                assert_eq!(records.items[1].record_number, 9);
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_read_file_record_response() {
        let bytes = [
            0x14, 0x0C, 0x05, 0x06, 0x0D, 0xFE, 0x00, 0x20, 0x05, 0x06, 0x33, 0xCD, 0x00, 0x40,
        ];
        let pdu = roundtrip(&bytes, true);
        match pdu {
            ModbusPdu::ReadFileRecordResponse(records) => {
                assert_eq!(records.items.len(), 2);
                assert_eq!(records.items[1].data, vec![0x33, 0xCD, 0x00, 0x40]);
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_write_file_record_request() {
        let bytes = [
            0x15, 0x0D, 0x06, 0x00, 0x04, 0x00, 0x07, 0x00, 0x03, 0x06, 0xAF, 0x04, 0xBE, 0x10,
            0x0D,
        ];
        roundtrip(&bytes, false);
        roundtrip(&bytes, true);
    }

    #[test]
    fn test_device_identification_response() {
        let bytes = [
            0x2B, 0x0E, 0x01, 0x81, 0x00, 0x00, 0x02, 0x00, 0x03, b'A', b'C', b'M', 0x01, 0x02,
            b'P', b'1',
        ];
        let pdu = roundtrip(&bytes, true);
        match pdu {
            ModbusPdu::ReadDeviceIdentificationResponse(id) => {
                assert_eq!(id.level, DeviceInformationLevel::Basic);
                assert!(id.individual_access);
                assert_eq!(
                    id.conformity_level,
                    DeviceInformationConformityLevel::BasicStreamOnly
                );
                assert_eq!(id.more_follows, DeviceInformationMoreFollows::NoMoreObjectsAvailable);
                assert_eq!(id.objects.len(), 2);
                assert_eq!(id.objects[0].as_str_lossy(), "ACM");
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_device_identification_mei_type_mismatch() {
        let err = ModbusPdu::from_bytes(&[0x2B, 0x0D, 0x01, 0x00], false).unwrap_err();
        assert_eq!(err, ModbusError::const_mismatch("meiType", 0x0E, 0x0D));
    }

    #[test]
    fn test_build_read_request() {
        let pdu = ModbusPdu::read_request(0x03, 0x006B, 3).unwrap();
        assert_eq!(pdu.to_bytes().unwrap().as_ref(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert!(ModbusPdu::read_request(0x05, 0, 1).is_err());
    }

    #[test]
    fn test_build_write_single_coil() {
        let pdu = ModbusPdu::write_single_coil(0x00AC, true);
        assert_eq!(pdu.to_bytes().unwrap().as_ref(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);
    }

    #[test]
    fn test_build_write_multiple_coils() {
        let coils = [true, false, true, true, false, false, true, true, true, false];
        let pdu = ModbusPdu::write_multiple_coils(0x0013, &coils).unwrap();
        assert_eq!(
            pdu.to_bytes().unwrap().as_ref(),
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn test_build_write_multiple_registers() {
        let pdu = ModbusPdu::write_multiple_registers(0x0001, &[0x000A, 0x0102]).unwrap();
        assert_eq!(
            pdu.to_bytes().unwrap().as_ref(),
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_oversized_byte_count_rejected() {
        let pdu = ModbusPdu::ReadHoldingRegistersResponse(DataResponse::new(vec![0; 256]));
        assert!(matches!(pdu.to_bytes(), Err(ModbusError::InvalidData { .. })));
    }
}
