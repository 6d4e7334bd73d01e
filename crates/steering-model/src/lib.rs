//! The runtime that injects steering into generation: loads a causal LM
//! (really or synthetically), tracks which layers currently carry a
//! steering vector, and exposes both a persistent and a scoped one-shot
//! application API.

pub mod activation_source;
pub mod blocks;
pub mod error;
pub mod interceptor;
pub mod model;
pub mod options;
pub mod tokenizer;

pub use blocks::TransformerBlock;
pub use error::SteeringModelError;
pub use interceptor::ActiveSteeringEntry;
pub use model::SteeringModel;
pub use options::{FromPretrainedOptions, GenerationOptions};
pub use tokenizer::PromptTokenizer;
