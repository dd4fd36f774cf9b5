//! Property tests over the whole PDU catalogue.

use proptest::collection::vec;
use proptest::prelude::*;

use voltage_modbus_driver::pdu::{
    AddressRange, ComEventCounter, ComEventLog, DataResponse, DeviceIdentification,
    DeviceIdentificationRequest, Diagnostic, ErrorPdu, ExceptionStatus, FifoPointer, FifoQueue,
    FileRecords, MaskWrite, MultipleWrite, ReadWriteMultiple, SingleWrite,
};
use voltage_modbus_driver::records::{
    DeviceInformationConformityLevel, DeviceInformationLevel, DeviceInformationMoreFollows,
    DeviceInformationObject, ModbusErrorCode, ReadFileRecordRequestItem,
    ReadFileRecordResponseItem, WriteFileRecordItem,
};
use voltage_modbus_driver::{
    ModbusAdu, ModbusPdu, ModbusSerialAdu, ModbusTcpAdu, ReadBuffer, WriteBuffer,
};

fn bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 0..max)
}

fn registers(max: usize) -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u16>(), 0..max).prop_map(|regs| regs.iter().flat_map(|r| r.to_be_bytes()).collect())
}

fn range() -> impl Strategy<Value = AddressRange> {
    (any::<u16>(), any::<u16>()).prop_map(|(start, quantity)| AddressRange::new(start, quantity))
}

fn data() -> impl Strategy<Value = DataResponse> {
    bytes(64).prop_map(DataResponse::new)
}

fn single() -> impl Strategy<Value = SingleWrite> {
    (any::<u16>(), any::<u16>()).prop_map(|(address, value)| SingleWrite { address, value })
}

fn diagnostic() -> impl Strategy<Value = Diagnostic> {
    (any::<u16>(), any::<u16>()).prop_map(|(sub_function, data)| Diagnostic { sub_function, data })
}

fn multiple_write() -> impl Strategy<Value = MultipleWrite> {
    (any::<u16>(), any::<u16>(), bytes(64)).prop_map(|(starting_address, quantity, value)| {
        MultipleWrite {
            starting_address,
            quantity,
            value,
        }
    })
}

fn mask_write() -> impl Strategy<Value = MaskWrite> {
    (any::<u16>(), any::<u16>(), any::<u16>()).prop_map(|(reference_address, and_mask, or_mask)| {
        MaskWrite {
            reference_address,
            and_mask,
            or_mask,
        }
    })
}

fn level() -> impl Strategy<Value = DeviceInformationLevel> {
    prop_oneof![
        Just(DeviceInformationLevel::Basic),
        Just(DeviceInformationLevel::Regular),
        Just(DeviceInformationLevel::Extended),
        Just(DeviceInformationLevel::Individual),
    ]
}

fn access_pdus() -> BoxedStrategy<ModbusPdu> {
    prop_oneof![
        (0u8..0x80, any::<u8>()).prop_map(|(function_flag, code)| {
            ModbusPdu::Error(ErrorPdu {
                function_flag,
                exception_code: ModbusErrorCode::from_u8(code),
            })
        }),
        range().prop_map(ModbusPdu::ReadCoilsRequest),
        data().prop_map(ModbusPdu::ReadCoilsResponse),
        range().prop_map(ModbusPdu::ReadDiscreteInputsRequest),
        data().prop_map(ModbusPdu::ReadDiscreteInputsResponse),
        range().prop_map(ModbusPdu::ReadHoldingRegistersRequest),
        data().prop_map(ModbusPdu::ReadHoldingRegistersResponse),
        range().prop_map(ModbusPdu::ReadInputRegistersRequest),
        data().prop_map(ModbusPdu::ReadInputRegistersResponse),
    ]
    .boxed()
}

fn serial_line_pdus() -> BoxedStrategy<ModbusPdu> {
    prop_oneof![
        single().prop_map(ModbusPdu::WriteSingleCoilRequest),
        single().prop_map(ModbusPdu::WriteSingleCoilResponse),
        single().prop_map(ModbusPdu::WriteSingleRegisterRequest),
        single().prop_map(ModbusPdu::WriteSingleRegisterResponse),
        Just(ModbusPdu::ReadExceptionStatusRequest),
        any::<u8>().prop_map(|value| ModbusPdu::ReadExceptionStatusResponse(ExceptionStatus { value })),
        diagnostic().prop_map(ModbusPdu::DiagnosticRequest),
        diagnostic().prop_map(ModbusPdu::DiagnosticResponse),
        Just(ModbusPdu::GetComEventCounterRequest),
        (any::<u16>(), any::<u16>()).prop_map(|(status, event_count)| {
            ModbusPdu::GetComEventCounterResponse(ComEventCounter {
                status,
                event_count,
            })
        }),
    ]
    .boxed()
}

fn write_pdus() -> BoxedStrategy<ModbusPdu> {
    prop_oneof![
        Just(ModbusPdu::GetComEventLogRequest),
        (any::<u16>(), any::<u16>(), any::<u16>(), bytes(64)).prop_map(
            |(status, event_count, message_count, events)| {
                ModbusPdu::GetComEventLogResponse(ComEventLog {
                    status,
                    event_count,
                    message_count,
                    events,
                })
            }
        ),
        multiple_write().prop_map(ModbusPdu::WriteMultipleCoilsRequest),
        range().prop_map(ModbusPdu::WriteMultipleCoilsResponse),
        multiple_write().prop_map(ModbusPdu::WriteMultipleRegistersRequest),
        range().prop_map(ModbusPdu::WriteMultipleRegistersResponse),
        Just(ModbusPdu::ReportServerIdRequest),
        data().prop_map(ModbusPdu::ReportServerIdResponse),
        mask_write().prop_map(ModbusPdu::MaskWriteRegisterRequest),
        mask_write().prop_map(ModbusPdu::MaskWriteRegisterResponse),
    ]
    .boxed()
}

fn write_file_item() -> impl Strategy<Value = WriteFileRecordItem> {
    (any::<u8>(), any::<u16>(), any::<u16>(), registers(8)).prop_map(
        |(reference_type, file_number, record_number, record_data)| WriteFileRecordItem {
            reference_type,
            file_number,
            record_number,
            record_data,
        },
    )
}

fn extended_pdus() -> BoxedStrategy<ModbusPdu> {
    prop_oneof![
        vec(
            (any::<u8>(), any::<u16>(), any::<u16>(), any::<u16>()).prop_map(
                |(reference_type, file_number, record_number, record_length)| {
                    ReadFileRecordRequestItem {
                        reference_type,
                        file_number,
                        record_number,
                        record_length,
                    }
                }
            ),
            0..4
        )
        .prop_map(|items| ModbusPdu::ReadFileRecordRequest(FileRecords::new(items))),
        vec(
            (any::<u8>(), registers(8)).prop_map(|(reference_type, data)| {
                ReadFileRecordResponseItem {
                    reference_type,
                    data,
                }
            }),
            0..4
        )
        .prop_map(|items| ModbusPdu::ReadFileRecordResponse(FileRecords::new(items))),
        vec(write_file_item(), 0..4)
            .prop_map(|items| ModbusPdu::WriteFileRecordRequest(FileRecords::new(items))),
        vec(write_file_item(), 0..4)
            .prop_map(|items| ModbusPdu::WriteFileRecordResponse(FileRecords::new(items))),
        (any::<u16>(), any::<u16>(), any::<u16>(), any::<u16>(), bytes(64)).prop_map(
            |(read_starting_address, read_quantity, write_starting_address, write_quantity, value)| {
                ModbusPdu::ReadWriteMultipleRegistersRequest(ReadWriteMultiple {
                    read_starting_address,
                    read_quantity,
                    write_starting_address,
                    write_quantity,
                    value,
                })
            }
        ),
        data().prop_map(ModbusPdu::ReadWriteMultipleRegistersResponse),
        any::<u16>().prop_map(|fifo_pointer_address| {
            ModbusPdu::ReadFifoQueueRequest(FifoPointer {
                fifo_pointer_address,
            })
        }),
        vec(any::<u16>(), 0..31)
            .prop_map(|fifo_value| ModbusPdu::ReadFifoQueueResponse(FifoQueue { fifo_value })),
        (level(), any::<u8>()).prop_map(|(level, object_id)| {
            ModbusPdu::ReadDeviceIdentificationRequest(DeviceIdentificationRequest {
                level,
                object_id,
            })
        }),
        device_identification().prop_map(ModbusPdu::ReadDeviceIdentificationResponse),
    ]
    .boxed()
}

fn device_identification() -> impl Strategy<Value = DeviceIdentification> {
    let conformity = prop_oneof![
        Just(DeviceInformationConformityLevel::BasicStreamOnly),
        Just(DeviceInformationConformityLevel::RegularStreamOnly),
        Just(DeviceInformationConformityLevel::ExtendedStreamOnly),
    ];
    let more_follows = prop_oneof![
        Just(DeviceInformationMoreFollows::NoMoreObjectsAvailable),
        Just(DeviceInformationMoreFollows::MoreObjectsAvailable),
    ];
    let objects = vec(
        (any::<u8>(), bytes(24)).prop_map(|(object_id, data)| DeviceInformationObject { object_id, data }),
        0..5,
    );
    (level(), any::<bool>(), conformity, more_follows, any::<u8>(), objects).prop_map(
        |(level, individual_access, conformity_level, more_follows, next_object_id, objects)| {
            DeviceIdentification {
                level,
                individual_access,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            }
        },
    )
}

fn any_pdu() -> impl Strategy<Value = ModbusPdu> {
    prop_oneof![access_pdus(), serial_line_pdus(), write_pdus(), extended_pdus()]
}

proptest! {
    #[test]
    fn pdu_survives_serialize_then_parse(pdu in any_pdu()) {
        let mut buf = WriteBuffer::new();
        pdu.serialize(&mut buf).unwrap();
        prop_assert_eq!(buf.pos(), pdu.length_in_bits());

        let bytes = buf.to_vec();
        prop_assert_eq!(bytes.len(), pdu.length_in_bytes());

        let parsed = ModbusPdu::from_bytes(&bytes, pdu.is_response()).unwrap();
        prop_assert_eq!(&parsed, &pdu);
        let reserialized = parsed.to_bytes().unwrap();
        prop_assert_eq!(reserialized.as_ref(), bytes.as_slice());
    }

    #[test]
    fn parse_consumes_exactly_what_serialize_wrote(pdu in any_pdu(), trailer in bytes(8)) {
        let mut bytes = pdu.to_bytes().unwrap().to_vec();
        let len = bytes.len();
        bytes.extend_from_slice(&trailer);

        let mut buf = ReadBuffer::new(&bytes);
        ModbusPdu::parse(&mut buf, pdu.is_response()).unwrap();
        prop_assert_eq!(buf.pos(), len * 8);
    }

    #[test]
    fn tcp_adu_round_trip(tid in any::<u16>(), unit in any::<u8>(), pdu in any_pdu()) {
        let adu = ModbusTcpAdu::new(tid, unit, pdu);
        let bytes = adu.to_bytes().unwrap();
        prop_assert_eq!(bytes.len(), adu.length_in_bytes());
        let length = usize::from(u16::from_be_bytes([bytes[4], bytes[5]]));
        prop_assert_eq!(length + 6, bytes.len());

        let parsed = ModbusTcpAdu::from_bytes(&bytes, adu.pdu.is_response()).unwrap();
        prop_assert_eq!(&parsed, &adu);
    }

    #[test]
    fn serial_adu_round_trip(tid in any::<u16>(), address in any::<u8>(), pdu in any_pdu()) {
        let adu = ModbusSerialAdu::new(tid, address, pdu).unwrap();
        let bytes = adu.to_bytes().unwrap();
        let parsed = ModbusSerialAdu::from_bytes(&bytes, adu.pdu.is_response()).unwrap();
        prop_assert_eq!(parsed, adu);
    }

    #[test]
    fn arbitrary_input_never_panics(data in bytes(300), response in any::<bool>()) {
        let _ = ModbusPdu::from_bytes(&data, response);
        let _ = ModbusTcpAdu::from_bytes(&data, response);
        let _ = ModbusSerialAdu::from_bytes(&data, response);
    }

    #[test]
    fn bit_fields_round_trip(fields in vec((1u8..=64, any::<u64>()), 1..16)) {
        let mut out = WriteBuffer::new();
        let mut expected = Vec::new();
        for (bits, raw) in &fields {
            let value = if *bits == 64 { *raw } else { raw & ((1u64 << *bits) - 1) };
            out.write_u64(*bits, value).unwrap();
            expected.push((*bits, value));
        }
        let total: usize = fields.iter().map(|(bits, _)| usize::from(*bits)).sum();
        prop_assert_eq!(out.pos(), total);

        let bytes = out.to_vec();
        let mut input = ReadBuffer::new(&bytes);
        for (bits, value) in expected {
            prop_assert_eq!(input.read_u64(bits).unwrap(), value);
        }
        prop_assert_eq!(input.pos(), total);
    }
}
