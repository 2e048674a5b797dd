pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;

pub use controllers::ChatController;
pub use models::{ChatMessage, ChatMode, ChatSession, MessageStatus, Role, SessionStore};
pub use repositories::MemoryVault;
pub use services::{GatewayConfig, GeminiGateway, ModelGateway};
