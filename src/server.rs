use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::io_struct::{ChatReqInput, ChatRespOutput, ValidationErrors};
use crate::relay::ChatRelay;
use actix_web::{HttpRequest, HttpResponse, HttpServer, get, post, web};
use std::io::Write;

#[get("/")]
pub async fn index(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[post("/api/chat")]
pub async fn chat(
    req: web::Json<ChatReqInput>,
    relay: web::Data<ChatRelay>,
) -> Result<HttpResponse, RelayError> {
    let msg = req.into_inner().validate()?;
    let reply = relay
        .send_message(&msg.prompt, &msg.conversation_id)
        .await?;
    Ok(HttpResponse::Ok().json(ChatRespOutput {
        message: reply.message,
    }))
}

#[post("/api/chat/stream")]
pub async fn chat_stream(
    req: web::Json<ChatReqInput>,
    relay: web::Data<ChatRelay>,
) -> Result<HttpResponse, RelayError> {
    let msg = req.into_inner().validate()?;
    let body = relay
        .send_message_stream(&msg.prompt, &msg.conversation_id)
        .await?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(body))
}

/// Undecodable bodies get the same 400 shape as field validation failures.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        log::debug!("Rejected request body: {}", err);
        RelayError::from(ValidationErrors::body(err.to_string())).into()
    })
}

/// Registers every route. Expects a `web::Data<ChatRelay>` on the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(index)
        .service(health)
        .service(chat)
        .service(chat_stream);
}

pub fn init_logging(level: log::LevelFilter) {
    // a second call (tests, embedding) keeps the first logger
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
}

pub async fn startup(config: RelayConfig, relay: ChatRelay) -> std::io::Result<()> {
    let relay = web::Data::new(relay);

    log::info!("Starting server at http://{}:{}", config.host, config.port);
    log::info!(
        "Model {} (temperature {}, max output tokens {}), serialized conversations: {}",
        config.sampling.model,
        config.sampling.temperature,
        config.sampling.max_output_tokens,
        config.serialize_conversations
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(relay.clone())
            .configure(configure)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}
