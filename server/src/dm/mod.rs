//! Conversation messaging: resolution, persistence and live delivery.

pub mod conversations;
pub mod form;
pub mod messages;
pub mod payload;
pub mod resolver;
pub mod send;
pub mod store;

pub use payload::{MessageKind, MessagePayload};
pub use send::{send_direct_or_group_message, SendReceipt, SendRequest};
