//! Modbus protocol constants based on official specification
//!
//! These constants are derived from the official Modbus specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - Both ADU flavours handled here share a 6 byte header whose last two bytes
//!   carry the number of bytes that follow

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Header bytes that precede the length-counted part of a frame.
/// Format: Transaction ID(2) + Protocol ID / Reserved(2) + Length(2) = 6 bytes
/// The unit identifier is counted by the length field, not by the header.
pub const MBAP_HEADER_LEN: usize = 6;

/// Byte offset of the big-endian length field inside the header
pub const MBAP_LENGTH_OFFSET: usize = 4;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum length field value (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Largest frame the message codec will ever reassemble (6 + 254 = 260 bytes)
pub const MAX_FRAME_SIZE: usize = MBAP_HEADER_LEN + MAX_MBAP_LENGTH;

/// Value of the constant protocol identifier in a Modbus/TCP header
pub const PROTOCOL_IDENTIFIER: u16 = 0x0000;

/// Value expected in the reserved word of a serial ADU
pub const SERIAL_RESERVED: u16 = 0x0000;

/// MEI type carried by Read Device Identification (FC 0x2B)
pub const MEI_TYPE_READ_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// Bits taken by the error flag + function flag discriminator
pub const PDU_DISCRIMINATOR_BITS: usize = 8;

// ============================================================================
// Per-request quantity limits
// ============================================================================

/// Maximum coils / discrete inputs per read (FC01, FC02)
pub const MAX_READ_COILS: u16 = 2000;

/// Maximum registers per read (FC03, FC04, read half of FC23)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum coils per write (FC15)
pub const MAX_WRITE_COILS: u16 = 1968;

/// Maximum registers per write (FC16)
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum registers in the write half of FC23
pub const MAX_READ_WRITE_WRITE_REGISTERS: u16 = 121;

// ============================================================================
// Scheduling / polling defaults
// ============================================================================

/// Idle poll interval of the message codec receive loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default number of requests in flight per transaction manager
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 1;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Read Exception Status (FC07, serial line only)
pub const FC_READ_EXCEPTION_STATUS: u8 = 0x07;

/// Diagnostics (FC08, serial line only)
pub const FC_DIAGNOSTIC: u8 = 0x08;

/// Get Comm Event Counter (FC11, serial line only)
pub const FC_GET_COM_EVENT_COUNTER: u8 = 0x0B;

/// Get Comm Event Log (FC12, serial line only)
pub const FC_GET_COM_EVENT_LOG: u8 = 0x0C;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Report Server ID (FC17, serial line only)
pub const FC_REPORT_SERVER_ID: u8 = 0x11;

/// Read File Record (FC20)
pub const FC_READ_FILE_RECORD: u8 = 0x14;

/// Write File Record (FC21)
pub const FC_WRITE_FILE_RECORD: u8 = 0x15;

/// Mask Write Register (FC22)
pub const FC_MASK_WRITE_REGISTER: u8 = 0x16;

/// Read/Write Multiple Registers (FC23)
pub const FC_READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

/// Read FIFO Queue (FC24)
pub const FC_READ_FIFO_QUEUE: u8 = 0x18;

/// Encapsulated Interface Transport / Read Device Identification (FC43)
pub const FC_READ_DEVICE_IDENTIFICATION: u8 = 0x2B;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Negative Acknowledge
pub const EXCEPTION_NEGATIVE_ACKNOWLEDGE: u8 = 0x07;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 6);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
        assert_eq!(MAX_FRAME_SIZE, 260);
        assert_eq!(MBAP_LENGTH_OFFSET + 2, MBAP_HEADER_LEN);
    }

    #[test]
    fn test_function_codes_fit_in_seven_bits() {
        let codes = [
            FC_READ_COILS,
            FC_READ_DISCRETE_INPUTS,
            FC_READ_HOLDING_REGISTERS,
            FC_READ_INPUT_REGISTERS,
            FC_WRITE_SINGLE_COIL,
            FC_WRITE_SINGLE_REGISTER,
            FC_READ_EXCEPTION_STATUS,
            FC_DIAGNOSTIC,
            FC_GET_COM_EVENT_COUNTER,
            FC_GET_COM_EVENT_LOG,
            FC_WRITE_MULTIPLE_COILS,
            FC_WRITE_MULTIPLE_REGISTERS,
            FC_REPORT_SERVER_ID,
            FC_READ_FILE_RECORD,
            FC_WRITE_FILE_RECORD,
            FC_MASK_WRITE_REGISTER,
            FC_READ_WRITE_MULTIPLE_REGISTERS,
            FC_READ_FIFO_QUEUE,
            FC_READ_DEVICE_IDENTIFICATION,
        ];
        for code in codes {
            assert_eq!(code & 0x80, 0, "function code {code:#04X} collides with the error flag");
        }
    }
}
