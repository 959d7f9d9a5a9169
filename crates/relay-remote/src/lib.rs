//! HTTP-backed collaborators: an OpenAI-compatible classifier and remote
//! capability handlers.

pub mod capability;
pub mod classifier;
pub mod error;

pub use capability::HttpCapability;
pub use classifier::{ChatClassifier, ChatClassifierConfig};
pub use error::RemoteError;
