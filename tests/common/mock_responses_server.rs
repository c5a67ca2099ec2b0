//! Mock Responses API server for testing

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::dev::ServerHandle;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const TEST_API_KEY: &str = "sk-test-key";

/// Prompt that makes the mock answer with a 500.
pub const FAILING_PROMPT: &str = "fail";

#[derive(Default)]
pub struct MockState {
    requests: Mutex<Vec<Value>>,
    counter: AtomicUsize,
}

/// Answers `POST /v1/responses` with ids `resp_1`, `resp_2`, ... and the text
/// `You said: <input>`. Every accepted request body is recorded.
pub struct MockResponsesServer {
    addr: SocketAddr,
    state: web::Data<MockState>,
    handle: ServerHandle,
}

impl MockResponsesServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = web::Data::new(MockState::default());

        let app_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .route("/v1/responses", web::post().to(mock_responses))
        })
        .workers(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

async fn mock_responses(
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<MockState>,
) -> HttpResponse {
    let expected = format!("Bearer {}", TEST_API_KEY);
    let auth = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return HttpResponse::Unauthorized().json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        }));
    }

    let body = body.into_inner();
    state.requests.lock().push(body.clone());

    let input = body["input"].as_str().unwrap_or_default().to_string();
    if input == FAILING_PROMPT {
        return HttpResponse::InternalServerError().json(json!({
            "error": {"message": "The server had an error", "type": "server_error"}
        }));
    }

    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("resp_{}", n);
    let text = format!("You said: {}", input);

    if body["stream"] == true {
        let events = vec![
            json!({"type": "response.created", "response": {"id": id, "status": "in_progress"}}),
            json!({"type": "response.output_text.delta", "delta": "You said: "}),
            json!({"type": "response.output_text.delta", "delta": input}),
            json!({"type": "response.output_text.done", "text": text}),
            json!({"type": "response.completed", "response": {"id": id, "status": "completed"}}),
        ];
        let sse = events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap(), e))
            .collect::<String>();
        return HttpResponse::Ok()
            .content_type("text/event-stream")
            .body(sse);
    }

    HttpResponse::Ok().json(json!({
        "id": id,
        "object": "response",
        "status": "completed",
        "model": body["model"],
        "previous_response_id": body["previous_response_id"],
        "output": [{
            "type": "message",
            "id": format!("msg_{}", n),
            "role": "assistant",
            "status": "completed",
            "content": [{"type": "output_text", "text": text, "annotations": []}]
        }]
    }))
}
