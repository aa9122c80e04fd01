use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use chat_delivery_service::{
    config::Config,
    db::{self, PgConversationStore, PgMessageStore},
    error::AppError,
    logging,
    middleware::JwtVerifier,
    routes,
    state::AppState,
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let cfg = Arc::new(Config::from_env()?);
    logging::init_tracing(cfg.log_format);

    let pool = db::init_pool(&cfg)
        .await
        .map_err(|e| AppError::StartServer(format!("db: {e}")))?;

    let conversations = Arc::new(PgConversationStore::new(pool.clone()));
    let messages = Arc::new(PgMessageStore::new(pool));
    let tokens = Arc::new(JwtVerifier::new(&cfg.jwt_secret));

    let state = AppState::new(
        cfg.clone(),
        tokens,
        conversations.clone(),
        messages,
        conversations,
    );

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting chat-delivery-service");

    let allowed_origins = cfg.allowed_origins.clone();
    let rest_state = state.clone();
    let server = HttpServer::new(move || {
        let cors = allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(actix_middleware::RequestId::new())
            .app_data(web::Data::new(rest_state.clone()))
            .configure(routes::configure_routes)
    })
    .disable_signals()
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind: {e}")))?
    .run();

    // Sockets must be closed before the server starts draining. The registry
    // stays closed, so a handshake finishing after this point is closed too.
    let handle = server.handle();
    let registry = state.registry.clone();
    actix_rt::spawn(async move {
        shutdown_signal().await;
        handle.pause().await;
        let closed = registry.close_all().await;
        tracing::info!(closed, "shutdown requested, websocket connections closed");
        handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| AppError::StartServer(format!("server: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
