use crate::info::{AppInfo, AppStatus, FirmwareMode, IdentifyInfo};
use crate::packet::{Command, MessageCode, MessageHeader, RawMessage, command_body};
use bytes::Bytes;
use num_enum::FromPrimitive;

#[test]
fn test_parse_message_a5010000_5a() {
    let hex_data = "a50100005a";
    let bytes_data = hex::decode(hex_data).expect("Failed to decode hex");
    let bytes = Bytes::from(bytes_data);

    let message = RawMessage::try_from(bytes).expect("Failed to parse message");
    assert_eq!(
        message.header,
        MessageHeader::new()
            .with_marker(0xa5)
            .with_code(0x01)
            .with_length(0),
        "Parsed header does not match expected header"
    );
    assert_eq!(message.code(), MessageCode::Ok);
    assert!(message.payload.is_empty());
}

#[test]
fn test_parse_identify_report() {
    let hex_data = "a51018000201533339303850310000000000000000002a000000\
                    00015a";
    let bytes_data = hex::decode(hex_data).expect("Failed to decode hex");
    let message = RawMessage::try_from(Bytes::from(bytes_data)).expect("Failed to parse message");

    assert_eq!(message.code(), MessageCode::Identify);
    assert!(message.code().is_report());

    let identity = IdentifyInfo::parse(&message.payload);
    assert_eq!(identity.version, 2);
    assert_eq!(identity.mode, FirmwareMode::Application);
    assert_eq!(identity.part_number, "S3908P1");
    assert_eq!(identity.build_id, 42);
    assert_eq!(identity.max_write_size, 256);
}

#[test]
fn test_payload_trailing_bytes_ignored() {
    // reads are often longer than the message they carry
    let bytes = Bytes::from_static(&[0xa5, 0x11, 0x02, 0x00, 0xaa, 0xbb, 0x5a, 0x00, 0x00]);
    let message = RawMessage::try_from(bytes).expect("Failed to parse message");
    assert_eq!(message.code(), MessageCode::Touch);
    assert_eq!(message.payload.as_ref(), &[0xaa, 0xbb]);
    assert_eq!(message.total_length(), 7);
}

#[test]
fn test_message_to_bytes() {
    let message = RawMessage::new(MessageCode::Log, Bytes::from_static(&[1, 2, 3]));
    let bytes = Bytes::from(message);
    assert_eq!(hex::encode(&bytes), "a51d03000102035a");
}

#[test]
fn test_command_body_length_prefix() {
    assert_eq!(command_body(&[]).as_ref(), &[0x00, 0x00]);
    assert_eq!(
        command_body(&[0xd8, 0x02, 0x03]).as_ref(),
        &[0x03, 0x00, 0xd8, 0x02, 0x03]
    );

    let large = vec![0u8; 300];
    assert_eq!(&command_body(&large)[..2], &[0x2c, 0x01]);
}

#[test]
fn test_status_and_report_ranges() {
    for code in [0x00, 0x01, 0x03, 0x0f, 0xff] {
        let code = MessageCode::from_primitive(code);
        assert!(code.is_status(), "{code} should be a status code");
        assert!(!code.is_report());
    }
    for code in [0x10, 0x11, 0x1d, 0x82, 0xd4] {
        let code = MessageCode::from_primitive(code);
        assert!(code.is_report(), "{code} should be a report code");
    }
    assert_eq!(MessageCode::from_primitive(0x42), MessageCode::Unknown(0x42));
}

#[test]
fn test_message_code_byte_conversions() {
    // 0xff is the INVALID status and has no named variant
    let invalid = MessageCode::from_primitive(0xff);
    assert_eq!(invalid, MessageCode::Unknown(0xff));
    assert!(invalid.is_status());
    assert_eq!(u8::from(invalid), 0xff);

    assert_eq!(MessageCode::from_primitive(0xfe), MessageCode::Hdl);
    assert_eq!(u8::from(MessageCode::Hdl), 0xfe);
    assert_eq!(u8::from(MessageCode::TouchHold), 0xd4);
}

#[test]
fn test_commands_acknowledged_by_identify() {
    assert!(Command::Reset.restarts_device());
    assert!(Command::RunApplicationFirmware.restarts_device());
    assert!(Command::RunBootloaderFirmware.restarts_device());
    assert!(!Command::Identify.restarts_device());
    assert_eq!(u8::from(Command::SetTouchReportConfig), 0x26);
}

#[test]
fn test_app_info_short_payload_zero_filled() {
    let mut payload = vec![0u8; 6];
    payload[2] = 0x01;
    let info = AppInfo::parse(&payload);
    assert_eq!(info.status, AppStatus::Booting);
    assert_eq!(info.max_x, 0);
}
