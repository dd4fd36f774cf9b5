//! # Error Handling
//!
//! Error types for the driver core, covering the bit buffer, the PDU/ADU
//! codec, the transaction manager and the transport boundary.
//!
//! ## Error Categories
//!
//! ### Codec Errors
//! - **Buffer Underflow**: a read needs more bits than the frame holds
//! - **Const Mismatch**: a constant field (protocol id, MEI type) has the wrong value
//! - **Unknown Variant**: no PDU variant for `(error_flag, function_flag, direction)`
//!
//! ### Scheduling Errors
//! - **Transaction**: misuse of a transaction (double submit, ending an unknown one)
//! - **Shutdown**: the manager or worker pool was closed
//!
//! ### Transport Errors
//! - **I/O / Connection / Timeout**: surfaced from the byte-stream transport
//!
//! ### Device Errors
//! - **Exception**: the device answered with an exception PDU
//!
//! ## Classification
//!
//! ```rust
//! use voltage_modbus_driver::ModbusError;
//!
//! let err = ModbusError::timeout("read holding registers", 5000);
//! assert!(err.is_recoverable());
//! assert!(err.is_transport_error());
//!
//! let err = ModbusError::unknown_variant(false, 0x42, true);
//! assert!(err.is_protocol_error());
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for all driver operations.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Driver error type.
///
/// `Clone` so a single failure can be handed to every party waiting on a
/// completion future.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (socket, serial line)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or loss
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Operation exceeded its deadline
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// General protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// A read needed more bits than remain in the buffer.
    ///
    /// Always propagated to the caller of the parse function.
    #[error("Buffer underflow: requested {requested} bits, {remaining} remaining")]
    BufferUnderflow { requested: usize, remaining: usize },

    /// A constant field carried an unexpected value
    #[error("Expected constant value {expected:#06X} for '{field}' but got {actual:#06X}")]
    ConstMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    /// No PDU variant is registered for this discriminator combination
    #[error(
        "No matching PDU variant: error_flag={error_flag}, function_flag={function_flag:#04X}, response={response}"
    )]
    UnknownVariant {
        error_flag: bool,
        function_flag: u8,
        response: bool,
    },

    /// Invalid function code
    #[error("Invalid function code: {code:#04X}")]
    InvalidFunction { code: u8 },

    /// Invalid data value or field width
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Modbus exception response from the device
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Frame boundary could not be established
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Transaction misuse: double submit, acting on an unknown or finished transaction
    #[error("Transaction {id} misuse: {message}")]
    Transaction { id: u32, message: String },

    /// The manager, worker pool or codec has been shut down
    #[error("Shut down: {message}")]
    Shutdown { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a buffer underflow error
    pub fn underflow(requested: usize, remaining: usize) -> Self {
        Self::BufferUnderflow {
            requested,
            remaining,
        }
    }

    /// Create a const mismatch error
    pub fn const_mismatch(field: &'static str, expected: u64, actual: u64) -> Self {
        Self::ConstMismatch {
            field,
            expected,
            actual,
        }
    }

    /// Create an unknown variant error
    pub fn unknown_variant(error_flag: bool, function_flag: u8, response: bool) -> Self {
        Self::UnknownVariant {
            error_flag,
            function_flag,
            response,
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a Modbus exception error.
    ///
    /// Standard exception codes are mapped to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x07 => "Negative Acknowledge",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception {
            function,
            code,
            message,
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a transaction misuse error
    pub fn transaction<S: Into<String>>(id: u32, message: S) -> Self {
        Self::Transaction {
            id,
            message: message.into(),
        }
    }

    /// Create a shutdown error
    pub fn shutdown<S: Into<String>>(message: S) -> Self {
        Self::Shutdown {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (a retry might succeed).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            // Acknowledge, Busy
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error comes from the transport boundary.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a wire-level protocol issue.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::BufferUnderflow { .. }
                | Self::ConstMismatch { .. }
                | Self::UnknownVariant { .. }
                | Self::InvalidFunction { .. }
                | Self::Exception { .. }
                | Self::Frame { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read_registers", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());

        let err = ModbusError::exception(0x03, 0x02);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        let err = ModbusError::exception(0x03, 0x06);
        assert!(err.is_recoverable());

        let err = ModbusError::underflow(16, 8);
        assert!(err.is_protocol_error());
        assert!(!err.is_transport_error());

        let err = ModbusError::transaction(7, "submitted twice");
        assert!(!err.is_protocol_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let msg = ModbusError::const_mismatch("protocolIdentifier", 0, 0x1234).to_string();
        assert!(msg.contains("protocolIdentifier"));
        assert!(msg.contains("0x1234"));

        let msg = ModbusError::unknown_variant(false, 0x42, true).to_string();
        assert!(msg.contains("0x42"));
        assert!(msg.contains("response=true"));

        let msg = ModbusError::exception(0x01, 0x02).to_string();
        assert!(msg.contains("Illegal Data Address"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io { .. }));
        assert!(err.to_string().contains("pipe closed"));
    }
}
