//! Arbitrary bytes through both ADU flavours in both directions. Parsing
//! must never panic, and whatever parses must serialize to a frame that
//! parses back to the same value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use voltage_modbus_driver::{ModbusAdu, ModbusSerialAdu, ModbusTcpAdu};

fn check<A: ModbusAdu + PartialEq>(data: &[u8], response: bool) {
    let Ok(adu) = A::from_bytes(data, response) else {
        return;
    };
    let bytes = adu.to_bytes().expect("parsed ADU must serialize");
    assert_eq!(bytes.len(), adu.length_in_bytes());
    // The unit identifier and everything after it survive unchanged
    assert_eq!(&bytes[..2], &data[..2]);
    assert_eq!(bytes[6], data[6]);

    let reparsed = A::from_bytes(&bytes, response).expect("serialized ADU must parse");
    assert!(reparsed == adu);
}

fuzz_target!(|data: &[u8]| {
    for response in [false, true] {
        check::<ModbusTcpAdu>(data, response);
        check::<ModbusSerialAdu>(data, response);
    }
});
