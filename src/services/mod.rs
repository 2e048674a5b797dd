pub mod gateway;
pub mod gemini;

pub use gateway::{GatewayError, GeneratedImage, ModelGateway, ReplyFragment, ReplyStream};
pub use gemini::{GatewayConfig, GeminiGateway};
