//! High-level Modbus/TCP client
//!
//! Ties the pieces together: each call becomes one transaction on a
//! [`RequestTransactionManager`], whose operation sends the request through
//! a [`MessageCodec`] and waits for the frame carrying the same MBAP
//! transaction identifier and unit.
//!
//! # API Naming Convention
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x01 | `read_01()` | `read_coils()` |
//! | 0x02 | `read_02()` | `read_discrete_inputs()` |
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x04 | `read_04()` | `read_input_registers()` |
//! | 0x05 | `write_05()` | `write_single_coil()` |
//! | 0x06 | `write_06()` | `write_single_register()` |
//! | 0x0F | `write_0f()` | `write_multiple_coils()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//! | 0x16 | `mask_write_16()` | `mask_write_register()` |
//! | 0x17 | `read_write_17()` | `read_write_multiple_registers()` |
//!
//! Anything else goes through [`ModbusTcpClient::execute`] with a PDU built
//! by hand.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_driver::{ClientConfig, ModbusClient, ModbusResult, ModbusTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let client = ModbusTcpClient::from_address("127.0.0.1:502", ClientConfig::default()).await?;
//!
//!     // Read 10 holding registers from unit 1, starting at address 0
//!     let registers = client.read_03(1, 0, 10).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::adu::{ModbusAdu, ModbusTcpAdu};
use crate::codec::{CodecConfig, MessageCodec};
use crate::constants::{
    FC_MASK_WRITE_REGISTER, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS, FC_WRITE_MULTIPLE_COILS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS,
    MAX_READ_REGISTERS, MAX_READ_WRITE_WRITE_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::pool::WorkerPool;
use crate::transaction::{RequestTransactionManager, TransactionManagerConfig};
use crate::transport::{TcpTransport, Transport};
use crate::DEFAULT_TIMEOUT_MS;

/// Modbus unit identifier (slave address)
pub type UnitId = u8;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for one request, queueing included
    pub timeout: Duration,
    /// Requests in flight at once on this connection
    pub concurrency_limit: usize,
    /// How long an unanswered expectation stays registered in the codec
    pub expectation_ttl: Duration,
    pub codec: CodecConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        Self {
            timeout,
            concurrency_limit: 1,
            expectation_ttl: timeout,
            codec: CodecConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Set the request timeout. The expectation ttl follows it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.expectation_ttl = timeout;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_expectation_ttl(mut self, ttl: Duration) -> Self {
        self.expectation_ttl = ttl;
        self
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }
}

fn check_quantity(what: &str, quantity: usize, max: u16) -> ModbusResult<()> {
    if quantity == 0 || quantity > usize::from(max) {
        return Err(ModbusError::invalid_data(format!(
            "Invalid {} quantity {} (allowed 1-{})",
            what, quantity, max
        )));
    }
    Ok(())
}

fn unexpected_response(function: u8, pdu: &ModbusPdu) -> ModbusError {
    ModbusError::protocol(format!(
        "Unexpected response to function {:#04X}: {}",
        function, pdu
    ))
}

/// Trait defining the interface for Modbus client operations.
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Coils (0x01) | 2000 coils |
/// | Read Discrete Inputs (0x02) | 2000 bits |
/// | Read Holding Registers (0x03) | 125 registers |
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Coils (0x0F) | 1968 coils |
/// | Write Multiple Registers (0x10) | 123 registers |
/// | Read/Write Multiple Registers (0x17) | 125 read, 121 written |
///
/// Calls take `&self`; concurrent calls are queued by the client's
/// transaction manager.
pub trait ModbusClient: Send + Sync {
    /// Read coils (function code 0x01).
    ///
    /// # Arguments
    ///
    /// * `unit` - The Modbus unit ID (1-247)
    /// * `address` - Starting coil address (0-65535)
    /// * `quantity` - Number of coils to read (1-2000)
    fn read_01(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read discrete inputs (function code 0x02).
    fn read_02(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send;

    /// Read holding registers (function code 0x03).
    ///
    /// # Arguments
    ///
    /// * `unit` - The Modbus unit ID (1-247)
    /// * `address` - Starting register address (0-65535)
    /// * `quantity` - Number of registers to read (1-125)
    fn read_03(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Read input registers (function code 0x04).
    fn read_04(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05). `true` is sent as 0xFF00.
    fn write_05(
        &self,
        unit: UnitId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write single register (function code 0x06).
    fn write_06(
        &self,
        unit: UnitId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple coils (function code 0x0F), 1-1968 values.
    fn write_0f(
        &self,
        unit: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write multiple registers (function code 0x10), 1-123 values.
    fn write_10(
        &self,
        unit: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Mask write register (function code 0x16).
    ///
    /// The device stores `(current AND and_mask) OR (or_mask AND NOT and_mask)`.
    fn mask_write_16(
        &self,
        unit: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Read/write multiple registers (function code 0x17). The write is
    /// performed before the read.
    fn read_write_17(
        &self,
        unit: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Stop accepting requests and close the connection.
    fn close(&self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    // ===== Semantic name aliases (for readability) =====

    /// Alias for `read_01` - Read coils
    #[inline]
    fn read_coils(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_01(unit, address, quantity)
    }

    /// Alias for `read_02` - Read discrete inputs
    #[inline]
    fn read_discrete_inputs(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<bool>>> + Send {
        self.read_02(unit, address, quantity)
    }

    /// Alias for `read_03` - Read holding registers
    #[inline]
    fn read_holding_registers(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(unit, address, quantity)
    }

    /// Alias for `read_04` - Read input registers
    #[inline]
    fn read_input_registers(
        &self,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_04(unit, address, quantity)
    }

    /// Alias for `write_05` - Write single coil
    #[inline]
    fn write_single_coil(
        &self,
        unit: UnitId,
        address: u16,
        value: bool,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_05(unit, address, value)
    }

    /// Alias for `write_06` - Write single register
    #[inline]
    fn write_single_register(
        &self,
        unit: UnitId,
        address: u16,
        value: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_06(unit, address, value)
    }

    /// Alias for `write_0f` - Write multiple coils
    #[inline]
    fn write_multiple_coils(
        &self,
        unit: UnitId,
        address: u16,
        values: &[bool],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_0f(unit, address, values)
    }

    /// Alias for `write_10` - Write multiple registers
    #[inline]
    fn write_multiple_registers(
        &self,
        unit: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_10(unit, address, values)
    }

    /// Alias for `mask_write_16` - Mask write register
    #[inline]
    fn mask_write_register(
        &self,
        unit: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.mask_write_16(unit, address, and_mask, or_mask)
    }

    /// Alias for `read_write_17` - Read/write multiple registers
    #[inline]
    fn read_write_multiple_registers(
        &self,
        unit: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_write_17(unit, read_address, read_quantity, write_address, values)
    }
}

/// Modbus/TCP client over any [`Transport`].
pub struct ModbusTcpClient<T: Transport> {
    codec: Arc<MessageCodec<T, ModbusTcpAdu>>,
    manager: RequestTransactionManager,
    next_transaction_id: AtomicU16,
    config: ClientConfig,
}

impl ModbusTcpClient<TcpTransport> {
    /// Connect to a device at `address`.
    pub async fn connect_tcp(address: SocketAddr, config: ClientConfig) -> ModbusResult<Self> {
        let transport = TcpTransport::new(address, config.timeout);
        let client = Self::new(transport, config)?;
        client.connect().await?;
        Ok(client)
    }

    /// Connect to a device given as `"host:port"`.
    pub async fn from_address(address: &str, config: ClientConfig) -> ModbusResult<Self> {
        let address: SocketAddr = address
            .parse()
            .map_err(|e| ModbusError::invalid_data(format!("Invalid address {}: {}", address, e)))?;
        Self::connect_tcp(address, config).await
    }
}

impl<T: Transport> ModbusTcpClient<T> {
    /// Build a client whose requests run on the shared worker pool.
    /// Call [`connect`](Self::connect) before issuing requests.
    pub fn new(transport: T, config: ClientConfig) -> ModbusResult<Self> {
        Ok(Self::with_pool(transport, config, WorkerPool::shared()?))
    }

    pub fn with_pool(transport: T, config: ClientConfig, pool: Arc<WorkerPool>) -> Self {
        let manager = RequestTransactionManager::with_pool(
            TransactionManagerConfig::default().with_concurrency_limit(config.concurrency_limit),
            pool,
        );
        Self {
            codec: Arc::new(MessageCodec::new(transport, config.codec.clone())),
            manager,
            next_transaction_id: AtomicU16::new(1),
            config,
        }
    }

    pub async fn connect(&self) -> ModbusResult<()> {
        self.codec.connect().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codec(&self) -> &MessageCodec<T, ModbusTcpAdu> {
        &self.codec
    }

    pub fn transaction_manager(&self) -> &RequestTransactionManager {
        &self.manager
    }

    /// MBAP transaction identifier for the next request; wraps at 65535.
    fn next_transaction_id(&self) -> u16 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `pdu` to `unit` and return the response PDU.
    ///
    /// The request is queued behind earlier ones when the concurrency limit
    /// is reached; `timeout` covers queueing and the round trip. An
    /// exception response is returned as [`ModbusError::Exception`].
    pub async fn execute(&self, unit: UnitId, pdu: ModbusPdu) -> ModbusResult<ModbusPdu> {
        let tid = self.next_transaction_id();
        let function = pdu.function_flag();
        let request = ModbusTcpAdu::new(tid, unit, pdu);

        let (response_tx, response_rx) = oneshot::channel();
        let codec = Arc::clone(&self.codec);
        let ttl = self.config.expectation_ttl;

        let transaction = self.manager.start_transaction();
        transaction.submit(async move {
            let expected = codec
                .send_request(
                    &request,
                    move |adu: &ModbusTcpAdu| {
                        adu.transaction_identifier == tid && adu.unit_identifier == unit
                    },
                    Some(ttl),
                )
                .await?;
            let response = expected.await.map_err(|_| {
                ModbusError::connection("codec stopped before the response arrived")
            })??;
            // The caller may have timed out already
            let _ = response_tx.send(response);
            Ok(())
        })?;

        match tokio::time::timeout(self.config.timeout, transaction.await_completion()).await {
            Ok(result) => result?,
            Err(_) => {
                let err = ModbusError::timeout(
                    format!(
                        "{} (unit {}, tid {})",
                        ModbusPdu::function_code_description(function),
                        unit,
                        tid
                    ),
                    self.config.timeout.as_millis() as u64,
                );
                // Already terminal if it finished right at the deadline
                let _ = transaction.fail_request(err.clone());
                return Err(err);
            }
        }

        let response = response_rx
            .await
            .map_err(|_| ModbusError::internal("response dropped after completion"))?;
        debug!("Response for tid {}: {}", tid, response.pdu());

        match response.pdu {
            ModbusPdu::Error(error) => Err(ModbusError::exception(
                error.function_flag,
                error.exception_code.code(),
            )),
            pdu if pdu.function_flag() != function => Err(unexpected_response(function, &pdu)),
            pdu => Ok(pdu),
        }
    }

    async fn read_bits(
        &self,
        function: u8,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<bool>> {
        check_quantity("coil", usize::from(quantity), MAX_READ_COILS)?;
        let pdu = ModbusPdu::read_request(function, address, quantity)?;
        match self.execute(unit, pdu).await? {
            ModbusPdu::ReadCoilsResponse(data) | ModbusPdu::ReadDiscreteInputsResponse(data) => {
                if data.value.len() < usize::from(quantity).div_ceil(8) {
                    return Err(ModbusError::protocol(format!(
                        "Short response: {} bytes for {} bits",
                        data.value.len(),
                        quantity
                    )));
                }
                Ok(data.coils(usize::from(quantity)))
            }
            other => Err(unexpected_response(function, &other)),
        }
    }

    async fn read_registers(
        &self,
        function: u8,
        unit: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        check_quantity("register", usize::from(quantity), MAX_READ_REGISTERS)?;
        let pdu = ModbusPdu::read_request(function, address, quantity)?;
        match self.execute(unit, pdu).await? {
            ModbusPdu::ReadHoldingRegistersResponse(data)
            | ModbusPdu::ReadInputRegistersResponse(data) => {
                let registers = data.registers();
                if registers.len() != usize::from(quantity) {
                    return Err(ModbusError::protocol(format!(
                        "Expected {} registers, got {}",
                        quantity,
                        registers.len()
                    )));
                }
                Ok(registers)
            }
            other => Err(unexpected_response(function, &other)),
        }
    }
}

impl<T: Transport> ModbusClient for ModbusTcpClient<T> {
    async fn read_01(&self, unit: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(FC_READ_COILS, unit, address, quantity).await
    }

    async fn read_02(&self, unit: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(FC_READ_DISCRETE_INPUTS, unit, address, quantity)
            .await
    }

    async fn read_03(&self, unit: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(FC_READ_HOLDING_REGISTERS, unit, address, quantity)
            .await
    }

    async fn read_04(&self, unit: UnitId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(FC_READ_INPUT_REGISTERS, unit, address, quantity)
            .await
    }

    async fn write_05(&self, unit: UnitId, address: u16, value: bool) -> ModbusResult<()> {
        match self
            .execute(unit, ModbusPdu::write_single_coil(address, value))
            .await?
        {
            ModbusPdu::WriteSingleCoilResponse(_) => Ok(()),
            other => Err(unexpected_response(FC_WRITE_SINGLE_COIL, &other)),
        }
    }

    async fn write_06(&self, unit: UnitId, address: u16, value: u16) -> ModbusResult<()> {
        match self
            .execute(unit, ModbusPdu::write_single_register(address, value))
            .await?
        {
            ModbusPdu::WriteSingleRegisterResponse(_) => Ok(()),
            other => Err(unexpected_response(FC_WRITE_SINGLE_REGISTER, &other)),
        }
    }

    async fn write_0f(&self, unit: UnitId, address: u16, values: &[bool]) -> ModbusResult<()> {
        check_quantity("coil", values.len(), MAX_WRITE_COILS)?;
        let pdu = ModbusPdu::write_multiple_coils(address, values)?;
        match self.execute(unit, pdu).await? {
            ModbusPdu::WriteMultipleCoilsResponse(_) => Ok(()),
            other => Err(unexpected_response(FC_WRITE_MULTIPLE_COILS, &other)),
        }
    }

    async fn write_10(&self, unit: UnitId, address: u16, values: &[u16]) -> ModbusResult<()> {
        check_quantity("register", values.len(), MAX_WRITE_REGISTERS)?;
        let pdu = ModbusPdu::write_multiple_registers(address, values)?;
        match self.execute(unit, pdu).await? {
            ModbusPdu::WriteMultipleRegistersResponse(_) => Ok(()),
            other => Err(unexpected_response(FC_WRITE_MULTIPLE_REGISTERS, &other)),
        }
    }

    async fn mask_write_16(
        &self,
        unit: UnitId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> ModbusResult<()> {
        let pdu = ModbusPdu::mask_write_register(address, and_mask, or_mask);
        match self.execute(unit, pdu).await? {
            ModbusPdu::MaskWriteRegisterResponse(_) => Ok(()),
            other => Err(unexpected_response(FC_MASK_WRITE_REGISTER, &other)),
        }
    }

    async fn read_write_17(
        &self,
        unit: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<Vec<u16>> {
        check_quantity("register", usize::from(read_quantity), MAX_READ_REGISTERS)?;
        check_quantity("register", values.len(), MAX_READ_WRITE_WRITE_REGISTERS)?;
        let pdu = ModbusPdu::read_write_multiple_registers(
            read_address,
            read_quantity,
            write_address,
            values,
        )?;
        match self.execute(unit, pdu).await? {
            ModbusPdu::ReadWriteMultipleRegistersResponse(data) => Ok(data.registers()),
            other => Err(unexpected_response(FC_READ_WRITE_MULTIPLE_REGISTERS, &other)),
        }
    }

    async fn close(&self) -> ModbusResult<()> {
        self.manager.close();
        self.codec.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{AddressRange, DataResponse, ErrorPdu, SingleWrite};
    use crate::records::ModbusErrorCode;
    use crate::transport::TestTransport;

    /// Answer every request with the PDU `respond` builds for it, echoing
    /// the MBAP header.
    fn device<F>(transport: &TestTransport, respond: F)
    where
        F: Fn(&ModbusPdu) -> ModbusPdu + Send + Sync + 'static,
    {
        transport.set_responder(move |frame| {
            let request = ModbusTcpAdu::from_bytes(frame, false).ok()?;
            let response = ModbusTcpAdu::new(
                request.transaction_identifier,
                request.unit_identifier,
                respond(&request.pdu),
            );
            Some(response.to_bytes().ok()?.to_vec())
        });
    }

    async fn client(transport: &TestTransport) -> ModbusTcpClient<TestTransport> {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_millis(500))
            .with_codec(CodecConfig::default().with_poll_interval(Duration::from_millis(1)));
        let client = ModbusTcpClient::with_pool(transport.clone(), config, WorkerPool::new(2));
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_read_holding_registers() {
        let transport = TestTransport::new();
        device(&transport, |_| {
            ModbusPdu::ReadHoldingRegistersResponse(DataResponse::new(vec![0x12, 0x34, 0x00, 0x01]))
        });
        let client = client(&transport).await;

        let registers = client.read_03(1, 0, 2).await.unwrap();
        assert_eq!(registers, vec![0x1234, 0x0001]);

        let written = transport.written();
        assert_eq!(
            written[0].as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[tokio::test]
    async fn test_read_coils_unpacks_bits() {
        let transport = TestTransport::new();
        device(&transport, |_| {
            ModbusPdu::ReadCoilsResponse(DataResponse::new(vec![0xCD, 0x01]))
        });
        let client = client(&transport).await;

        let coils = client.read_coils(1, 19, 10).await.unwrap();
        assert_eq!(
            coils,
            vec![true, false, true, true, false, false, true, true, true, false]
        );
    }

    #[tokio::test]
    async fn test_transaction_ids_increment() {
        let transport = TestTransport::new();
        device(&transport, |request| match request {
            ModbusPdu::WriteSingleRegisterRequest(write) => {
                ModbusPdu::WriteSingleRegisterResponse(*write)
            }
            _ => unreachable!(),
        });
        let client = client(&transport).await;

        client.write_06(1, 10, 7).await.unwrap();
        client.write_single_register(1, 11, 8).await.unwrap();
        let written = transport.written();
        assert_eq!(&written[0][0..2], &[0x00, 0x01]);
        assert_eq!(&written[1][0..2], &[0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_exception_response() {
        let transport = TestTransport::new();
        device(&transport, |request| {
            ModbusPdu::Error(ErrorPdu {
                function_flag: request.function_flag(),
                exception_code: ModbusErrorCode::IllegalDataAddress,
            })
        });
        let client = client(&transport).await;

        let err = client.read_04(1, 0xFFFF, 1).await.unwrap_err();
        assert_eq!(err, ModbusError::exception(0x04, 0x02));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let transport = TestTransport::new();
        let client = client(&transport).await;

        let err = client.read_03(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
        assert_eq!(client.transaction_manager().active_requests(), 0);

        device(&transport, |_| ModbusPdu::WriteSingleCoilResponse(SingleWrite {
            address: 1,
            value: 0xFF00,
        }));
        client.write_05(1, 1, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_function_is_rejected() {
        let transport = TestTransport::new();
        device(&transport, |_| {
            ModbusPdu::WriteMultipleRegistersResponse(AddressRange::new(0, 1))
        });
        let client = client(&transport).await;

        let err = client.mask_write_16(1, 0, 0xFF00, 0x0012).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_quantity_limits() {
        let transport = TestTransport::new();
        let client = client(&transport).await;

        assert!(client.read_01(1, 0, 0).await.is_err());
        assert!(client.read_01(1, 0, 2001).await.is_err());
        assert!(client.read_03(1, 0, 126).await.is_err());
        assert!(client.write_0f(1, 0, &[true; 1969]).await.is_err());
        assert!(client.write_10(1, 0, &[0u16; 124]).await.is_err());
        assert!(client.read_write_17(1, 0, 1, 0, &[0u16; 122]).await.is_err());
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_connection() {
        let transport = TestTransport::new();
        device(&transport, |request| match request {
            ModbusPdu::ReadInputRegistersRequest(range) => {
                let value = range.starting_address.to_be_bytes().to_vec();
                ModbusPdu::ReadInputRegistersResponse(DataResponse::new(value))
            }
            _ => unreachable!(),
        });
        let client = Arc::new(client(&transport).await);

        let tasks: Vec<_> = (0..4u16)
            .map(|i| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.read_04(1, i, 1).await })
            })
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), vec![i as u16]);
        }
        assert_eq!(transport.written().len(), 4);
    }

    #[tokio::test]
    async fn test_close_refuses_new_requests() {
        let transport = TestTransport::new();
        let client = client(&transport).await;
        client.close().await.unwrap();
        let err = client.read_03(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Shutdown { .. }));
    }
}
