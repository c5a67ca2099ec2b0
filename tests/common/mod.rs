// These modules are used by the integration tests
#![allow(dead_code)]

pub mod mock_responses_server;

use std::sync::Arc;
use std::time::Duration;

use chat_relay::conversation_store::MemoryConversationStore;
use chat_relay::relay::{ChatRelay, SamplingConfig};
use chat_relay::upstream::OpenAIResponsesClient;

pub const CONV: &str = "11111111-1111-1111-1111-111111111111";

/// Relay wired to `base_url` with an in-memory store the test can inspect.
pub fn create_test_relay(
    base_url: &str,
    api_key: &str,
) -> (ChatRelay, Arc<MemoryConversationStore>) {
    let client =
        OpenAIResponsesClient::new(api_key, base_url, Some(Duration::from_secs(5))).unwrap();
    let store = Arc::new(MemoryConversationStore::new());
    let relay = ChatRelay::new(store.clone(), Arc::new(client), SamplingConfig::default());
    (relay, store)
}

/// A base URL nothing is listening on.
pub fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
