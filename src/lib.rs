//! # Voltage Modbus Driver - Modbus protocol driver core
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! The layers a Modbus client or gateway needs below its application logic:
//! a bit-precise codec for every standard PDU, TCP and serial ADU framing,
//! a fair scheduler limiting requests in flight per device, and a receive
//! loop that matches responses to the requests waiting for them.
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`buffer`] | MSB-first bit reader/writer |
//! | [`pdu`], [`records`] | The PDU catalogue and its sub-records |
//! | [`adu`] | Modbus/TCP and serial framing |
//! | [`transport`] | Byte-stream transports (TCP, in-memory) |
//! | [`pool`] | Worker pool and completion futures |
//! | [`transaction`] | FIFO-fair, bounded-concurrency request scheduling |
//! | [`codec`] | Frame reassembly and response correlation |
//! | [`client`] | High-level client built on all of the above |
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Codec | Client |
//! |------|----------|-------|--------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x07 | Read Exception Status | ✅ | `execute` |
//! | 0x08 | Diagnostics | ✅ | `execute` |
//! | 0x0B | Get Comm Event Counter | ✅ | `execute` |
//! | 0x0C | Get Comm Event Log | ✅ | `execute` |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x11 | Report Server ID | ✅ | `execute` |
//! | 0x14 | Read File Record | ✅ | `execute` |
//! | 0x15 | Write File Record | ✅ | `execute` |
//! | 0x16 | Mask Write Register | ✅ | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ | ✅ |
//! | 0x18 | Read FIFO Queue | ✅ | `execute` |
//! | 0x2B | Read Device Identification | ✅ | `execute` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_driver::{ClientConfig, ModbusClient, ModbusResult, ModbusTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = ModbusTcpClient::from_address("127.0.0.1:502", ClientConfig::default()).await?;
//!
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Codec only
//!
//! ```rust
//! use voltage_modbus_driver::{ModbusAdu, ModbusPdu, ModbusTcpAdu};
//!
//! let frame = [0x00, 0x0A, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x04];
//! let adu = ModbusTcpAdu::from_bytes(&frame, false).unwrap();
//! assert_eq!(adu.transaction_id(), 0x0A);
//! assert!(matches!(adu.pdu, ModbusPdu::ReadHoldingRegistersRequest(_)));
//! assert_eq!(adu.to_bytes().unwrap().as_ref(), &frame);
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// Bit-granular read/write buffers
pub mod buffer;

/// Sub-records and enumerations carried inside PDUs
pub mod records;

/// The protocol data unit catalogue
pub mod pdu;

/// TCP and serial application data units
pub mod adu;

/// Byte-stream transports
pub mod transport;

/// Packet logging helpers
pub mod logging;

// ============================================================================
// Scheduling and correlation
// ============================================================================

/// Worker pool executing request operations
pub mod pool;

/// Request transaction manager
pub mod transaction;

/// Message codec: framing, receive loop, expectations
pub mod codec;

/// High-level Modbus/TCP client
pub mod client;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_modbus_driver::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{ClientConfig, ModbusClient, ModbusTcpClient, UnitId};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Codec ===
pub use adu::{ModbusAdu, ModbusSerialAdu, ModbusTcpAdu};
pub use buffer::{ReadBuffer, WriteBuffer};
pub use pdu::ModbusPdu;
pub use records::ModbusErrorCode;

// === Scheduling and correlation ===
pub use codec::{CodecConfig, MessageCodec};
pub use pool::{CompletionFuture, WorkerPool};
pub use transaction::{
    RequestTransaction, RequestTransactionManager, TransactionManagerConfig, TransactionState,
};

// === Transport ===
pub use transport::{TcpTransport, TestTransport, Transport, TransportStats};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{LoggingMode, PacketLogger};

/// Default timeout for operations (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage Modbus Driver v{} - Modbus protocol driver core by Evan Liu",
        VERSION
    )
}
