//! Raw protobuf schema.
//!
//! Equivalent `.proto`:
//!
//! ```text
//! message Content {
//!   repeated string content = 1;
//! }
//!
//! message NotifyMessage {
//!   int32 notify_type = 1;   // 0 = Quit, 1 = Join
//!   int32 operator_id = 2;
//! }
//!
//! message ChatMessage {
//!   int32 target_id = 1;
//!   optional bool is_user = 2;
//!   repeated Content contents = 3;
//!   optional int32 message_type = 4;   // 0 = Data, 1 = Notify
//!   optional NotifyMessage notify_message = 5;
//!   optional int32 sender_id = 6;
//! }
//! ```
//!
//! `is_user` uses explicit presence so that `false` survives the round trip.
//! With a plain proto3 `bool` a room message would serialize without the
//! field at all and be indistinguishable from a broken direct message.

/// One batch of payload strings.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Content {
    /// Payload strings in send order
    #[prost(string, repeated, tag = "1")]
    pub content: Vec<String>,
}

/// Membership change carried by a Notify frame.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NotifyMessage {
    /// 0 = Quit, 1 = Join
    #[prost(int32, tag = "1")]
    pub notify_type: i32,
    /// Identity that joined or left
    #[prost(int32, tag = "2")]
    pub operator_id: i32,
}

/// Top-level wire message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatMessage {
    /// Identity id when `is_user`, room id otherwise
    #[prost(int32, tag = "1")]
    pub target_id: i32,
    /// Addressing discriminator
    #[prost(bool, optional, tag = "2")]
    pub is_user: Option<bool>,
    /// Payload batches
    #[prost(message, repeated, tag = "3")]
    pub contents: Vec<Content>,
    /// 0 = Data, 1 = Notify; absent means Data
    #[prost(int32, optional, tag = "4")]
    pub message_type: Option<i32>,
    /// Present on Notify frames
    #[prost(message, optional, tag = "5")]
    pub notify_message: Option<NotifyMessage>,
    /// Originating identity, when the backend fills it in
    #[prost(int32, optional, tag = "6")]
    pub sender_id: Option<i32>,
}
