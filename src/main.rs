use assessment_backend::{
    config::{get_config, init_config},
    database::pool::create_pool,
    middleware, routes, AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool);

    {
        let state = app_state.clone();
        let interval = Duration::from_secs(config.sweep_interval_seconds);
        tokio::spawn(async move {
            loop {
                if let Err(e) = state.attempt_service.sweep_expired().await {
                    tracing::error!("Deadline sweep error: {:?}", e);
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let student_api = Router::new()
        .route(
            "/api/assessments/:id/attempts",
            post(routes::attempts::start_attempt),
        )
        .route(
            "/api/attempts/:id/answers",
            post(routes::attempts::submit_answer),
        )
        .route(
            "/api/attempts/:id/finish",
            post(routes::attempts::finish_attempt),
        )
        .route("/api/attempts/:id/result", get(routes::attempts::get_result))
        .route("/api/attempts/:id/status", get(routes::attempts::get_status))
        .route("/api/proctor/sessions", post(routes::proctor::start_session))
        .route(
            "/api/proctor/sessions/:id/end",
            post(routes::proctor::end_session),
        )
        .route(
            "/api/proctor/sessions/:id/events",
            get(routes::proctor::get_session_events).post(routes::proctor::record_event),
        )
        .route(
            "/api/proctor/sessions/:id/lockdown",
            get(routes::proctor::get_lockdown_config),
        )
        .layer(axum::middleware::from_fn(
            middleware::auth::require_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            middleware::rate_limit::RateLimiter::per_second(config.public_rps),
            middleware::rate_limit::throttle,
        ));

    let review_api = Router::new()
        .route(
            "/api/attempts/:id/abandon",
            post(routes::attempts::abandon_attempt),
        )
        .route(
            "/api/proctor/sessions/:id/terminate",
            post(routes::proctor::terminate_session),
        )
        .layer(axum::middleware::from_fn(
            middleware::auth::require_elevated,
        ))
        .layer(axum::middleware::from_fn_with_state(
            middleware::rate_limit::RateLimiter::per_second(config.review_rps),
            middleware::rate_limit::throttle,
        ));

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .merge(student_api)
        .merge(review_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
