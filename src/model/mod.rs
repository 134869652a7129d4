//! Core data types flowing through a session

mod event;
mod message;

pub use event::{Color, Event, ALIAS_EVENT, LOG_EVENT};
pub use message::Message;
