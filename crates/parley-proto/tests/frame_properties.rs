//! Property-based tests for Frame encoding/decoding
//!
//! Round trips for every frame shape the public constructors can build, plus
//! robustness of the decoder against arbitrary input.

use parley_proto::{
    DirectMessage, Frame, NotifyEvent, NotifyKind, ProtocolError, RoomBody, RoomMessage,
    wire::ChatMessage,
};
use prost::Message as _;
use proptest::prelude::*;

fn arbitrary_payloads() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec(".{0,32}", 0..4), 0..4)
}

fn arbitrary_notify() -> impl Strategy<Value = NotifyEvent> {
    (prop_oneof![Just(NotifyKind::Left), Just(NotifyKind::Joined)], any::<i32>())
        .prop_map(|(kind, operator)| NotifyEvent { kind, operator })
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    let direct = (any::<i32>(), any::<Option<i32>>(), arbitrary_payloads()).prop_map(
        |(target, sender, payloads)| Frame::Direct(DirectMessage { target, sender, payloads }),
    );

    let data = (any::<i32>(), any::<Option<i32>>(), arbitrary_payloads()).prop_map(
        |(room, sender, payloads)| {
            Frame::Room(RoomMessage { room, sender, body: RoomBody::Data(payloads) })
        },
    );

    let notify = (any::<i32>(), any::<Option<i32>>(), arbitrary_notify()).prop_map(
        |(room, sender, event)| {
            Frame::Room(RoomMessage { room, sender, body: RoomBody::Notify(event) })
        },
    );

    prop_oneof![direct, data, notify]
}

#[test]
fn prop_frame_encode_decode_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let bytes = frame.to_bytes().expect("encode should succeed");
        let decoded = Frame::decode(&bytes).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded, frame);
    });
}

#[test]
fn prop_is_user_always_present_on_wire() {
    proptest!(|(frame in arbitrary_frame())| {
        let bytes = frame.to_bytes().expect("encode should succeed");
        let wire = ChatMessage::decode(bytes.as_ref()).expect("wire decode should succeed");

        prop_assert_eq!(wire.is_user, Some(frame.is_user()));
        prop_assert_eq!(wire.target_id, frame.target_id());
    });
}

#[test]
fn prop_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..512))| {
        // Any outcome is fine as long as it is a value, not a panic
        let _ = Frame::decode(&bytes);
    });
}

#[test]
fn prop_unknown_message_type_rejected() {
    proptest!(|(room in any::<i32>(), message_type in 2i32..)| {
        let wire = ChatMessage {
            target_id: room,
            is_user: Some(false),
            message_type: Some(message_type),
            ..Default::default()
        };

        prop_assert_eq!(
            Frame::decode(&wire.encode_to_vec()),
            Err(ProtocolError::UnknownMessageType(message_type))
        );
    });
}

#[test]
fn prop_data_texts_preserve_order() {
    proptest!(|(room in any::<i32>(), payloads in arbitrary_payloads())| {
        let frame =
            Frame::Room(RoomMessage { room, sender: None, body: RoomBody::Data(payloads.clone()) });
        let decoded = Frame::decode(&frame.to_bytes().expect("encode")).expect("decode");

        let Frame::Room(msg) = decoded else {
            return Err(TestCaseError::fail("room frame decoded as direct"));
        };

        let expected: Vec<&str> = payloads.iter().flatten().map(String::as_str).collect();
        let actual: Vec<&str> = msg.body.texts().collect();
        prop_assert_eq!(actual, expected);
    });
}
