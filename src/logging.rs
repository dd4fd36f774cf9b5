//! Packet-level logging for frames crossing the transport.
//!
//! Everything goes through `tracing`; installing a subscriber is left to
//! the application. Packet dumps are off by default and enabled per codec
//! through [`CodecConfig::with_packet_logging`](crate::codec::CodecConfig::with_packet_logging).

use tracing::info;

use crate::adu::ModbusAdu;

/// What a packet log line shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Hex dump only
    #[default]
    Raw,
    /// Decoded header and PDU summary only
    Interpreted,
    /// Hex dump followed by the decoded summary
    Both,
}

/// Format bytes as space separated upper-case hex, `00 0A 00 00`.
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Summary line for a decoded frame.
pub fn interpret_adu<A: ModbusAdu>(adu: &A) -> String {
    format!(
        "tid:{} unit:{} {}",
        adu.transaction_id(),
        adu.unit_id(),
        adu.pdu()
    )
}

/// Logs sent and received frames as `[MODBUS-TCP] >>> 00 0A ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketLogger {
    enabled: bool,
    mode: LoggingMode,
}

impl PacketLogger {
    pub fn new(enabled: bool, mode: LoggingMode) -> Self {
        Self { enabled, mode }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log an outgoing frame.
    pub fn log_sent<A: ModbusAdu>(&self, raw: &[u8], adu: &A) {
        self.log(">>>", raw, Some(adu));
    }

    /// Log an incoming frame. `adu` is `None` when the frame failed to decode.
    pub fn log_received<A: ModbusAdu>(&self, raw: &[u8], adu: Option<&A>) {
        self.log("<<<", raw, adu);
    }

    fn log<A: ModbusAdu>(&self, direction: &str, raw: &[u8], adu: Option<&A>) {
        if !self.enabled {
            return;
        }
        let protocol = A::PROTOCOL;
        match (self.mode, adu) {
            (LoggingMode::Raw, _) | (_, None) => {
                info!("[MODBUS-{}] {} {}", protocol, direction, format_hex_packet(raw));
            }
            (LoggingMode::Interpreted, Some(adu)) => {
                info!("[MODBUS-{}] {} {}", protocol, direction, interpret_adu(adu));
            }
            (LoggingMode::Both, Some(adu)) => {
                info!(
                    "[MODBUS-{}] {} {} | {}",
                    protocol,
                    direction,
                    format_hex_packet(raw),
                    interpret_adu(adu)
                );
            }
        }
    }
}
