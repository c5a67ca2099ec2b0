//! HTTP relay that forwards chat prompts to an OpenAI-style Responses API and
//! threads each conversation's continuation token between turns.

pub mod config;
pub mod conversation_store;
pub mod error;
pub mod io_struct;
pub mod relay;
pub mod server;
pub mod upstream;

pub use config::{Args, RelayConfig};
pub use conversation_store::{BoundedConversationStore, ConversationStore, MemoryConversationStore};
pub use error::{ConfigError, RelayError, UpstreamError};
pub use relay::{ChatRelay, ChatReply, SamplingConfig};
pub use upstream::{CompletionClient, OpenAIResponsesClient};
