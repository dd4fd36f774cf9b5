//! Typed PDU constructors fed with arbitrary arguments: whatever they build
//! must serialize, parse back to itself and report its length correctly.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_modbus_driver::ModbusPdu;

#[derive(Debug, Arbitrary)]
enum Build {
    Read { fc: u8, address: u16, quantity: u16 },
    WriteCoil { address: u16, value: bool },
    WriteRegister { address: u16, value: u16 },
    WriteCoils { address: u16, values: Vec<bool> },
    WriteRegisters { address: u16, values: Vec<u16> },
    MaskWrite { address: u16, and_mask: u16, or_mask: u16 },
    ReadWrite { read_address: u16, read_quantity: u16, write_address: u16, values: Vec<u16> },
}

fuzz_target!(|build: Build| {
    let pdu = match build {
        Build::Read { fc, address, quantity } => ModbusPdu::read_request(fc, address, quantity),
        Build::WriteCoil { address, value } => Ok(ModbusPdu::write_single_coil(address, value)),
        Build::WriteRegister { address, value } => {
            Ok(ModbusPdu::write_single_register(address, value))
        }
        Build::WriteCoils { address, values } => ModbusPdu::write_multiple_coils(address, &values),
        Build::WriteRegisters { address, values } => {
            ModbusPdu::write_multiple_registers(address, &values)
        }
        Build::MaskWrite { address, and_mask, or_mask } => {
            Ok(ModbusPdu::mask_write_register(address, and_mask, or_mask))
        }
        Build::ReadWrite { read_address, read_quantity, write_address, values } => {
            ModbusPdu::read_write_multiple_registers(read_address, read_quantity, write_address, &values)
        }
    };
    let Ok(pdu) = pdu else {
        return;
    };
    // Oversized payloads are rejected by serialize, not by the builders
    let Ok(bytes) = pdu.to_bytes() else {
        return;
    };
    assert_eq!(bytes.len(), pdu.length_in_bytes());
    let parsed = ModbusPdu::from_bytes(&bytes, false).expect("built PDU must parse");
    assert_eq!(parsed, pdu);
});
