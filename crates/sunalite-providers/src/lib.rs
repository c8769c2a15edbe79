//! Model backend layer for Sunalite.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — trait every backend implements
//! - [`error::ProviderError`] — why a backend call failed
//! - [`http_provider::HttpProvider`] — OpenAI-compatible `/chat/completions` client

pub mod error;
pub mod http_provider;
pub mod traits;

pub use error::ProviderError;
pub use http_provider::HttpProvider;
pub use traits::{LlmProvider, LlmRequestConfig};
