pub mod group;
pub mod messages;

pub use group::{send_group_message, GroupSendRequest};
