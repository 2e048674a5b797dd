pub mod chat_controller;

pub use chat_controller::{ChatController, GENERIC_TURN_ERROR, QUOTA_TURN_ERROR};
