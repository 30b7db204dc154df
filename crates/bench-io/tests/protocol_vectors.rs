use bench_core::{Command, DeviceId};
use bench_io::protocol::{IncomingMessage, ProtocolError};

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "client_id":"dashboard"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert_eq!(hello.client_id.as_deref(), Some("dashboard"));
        }
        _ => panic!("expected hello message"),
    }
}

#[test]
fn parses_command_vectors() {
    let vectors = [
        (
            r#"{"type":"command","device_id":1,"channel":"desiredSpeed","value":0.5}"#,
            DeviceId(1),
            Command::Speed(0.5),
        ),
        (
            r#"{"type":"command","device_id":2,"channel":"newPosition","value":"12.5"}"#,
            DeviceId(2),
            Command::Position(12.5),
        ),
        (
            r#"{"type":"command","device_id":3,"channel":"stop","value":true}"#,
            DeviceId(3),
            Command::Stop(true),
        ),
        (
            r#"{"type":"command","device_id":4,"channel":"reset","value":"false"}"#,
            DeviceId(4),
            Command::Reset(false),
        ),
    ];

    for (raw, device, command) in vectors {
        let msg = IncomingMessage::parse(raw).expect("command should parse");
        let IncomingMessage::Command(msg) = msg else {
            panic!("expected command message for {raw}");
        };
        assert_eq!(msg.to_command().unwrap(), (device, command), "{raw}");
    }
}

#[test]
fn parses_estop_message() {
    let msg = IncomingMessage::parse(r#"{"type":"estop","value":true}"#).unwrap();
    assert!(matches!(msg, IncomingMessage::Estop(estop) if estop.value));
}

#[test]
fn rejects_malformed_messages() {
    assert!(matches!(
        IncomingMessage::parse(r#"{"type":"command","channel":"stop","value":true}"#),
        Err(ProtocolError::Malformed {
            msg_type: "command",
            ..
        })
    ));
    assert!(matches!(
        IncomingMessage::parse(r#"{"type":"estop","value":"yes"}"#),
        Err(ProtocolError::Malformed { msg_type: "estop", .. })
    ));
}
