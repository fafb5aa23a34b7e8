//! Cross-session publish/subscribe.

mod client;
mod hub;

pub use client::PubSubClient;
pub use hub::{Handler, Hub, TopicHandler};
