use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{body::Body, routing::get, Router};
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::Config;
use services::{
    clock::{Clock, SystemClock},
    init,
    orchestrator::Orchestrator,
    twitch::TwitchService,
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub orchestrator: Arc<Orchestrator>,
}

/// JSON 429 with `Retry-After`, matching the `AppError` body shape.
fn rate_limit_response(error: GovernorError) -> http::Response<Body> {
    let (status, code, message, retry_after, headers) = match error {
        GovernorError::TooManyRequests { wait_time, headers } => (
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Rate limit exceeded".to_string(),
            Some(wait_time),
            headers,
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "Unable to determine client IP for rate limiting".to_string(),
            None,
            None,
        ),
        GovernorError::Other { code, msg, headers } => (
            StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "RATE_LIMIT_ERROR",
            msg.unwrap_or_else(|| "Rate limiting error".to_string()),
            None,
            headers,
        ),
    };

    let body = serde_json::json!({ "error": { "code": code, "message": message } }).to_string();
    let mut resp = http::Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(hmap) = headers {
        for (name, value) in hmap.iter() {
            resp.headers_mut().append(name.clone(), value.clone());
        }
    }
    if let Some(secs) = retry_after {
        resp.headers_mut()
            .insert(http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
    resp
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twitch_schedules=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting Twitch Schedules Service");

    let pool = init::init_db(&config).await?;
    let twitch = TwitchService::new(&config.twitch)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        Arc::new(twitch),
        clock.clone(),
        config.sync.clone(),
        config.images.dir.clone(),
    ));
    orchestrator.start()?;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        clock,
        orchestrator: orchestrator.clone(),
    });

    let thread_shutdown = Arc::new(AtomicBool::new(false));

    let mut api_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    api_builder
        .per_second(config.rate_limit.api_per_second.into())
        .burst_size(config.rate_limit.api_burst)
        .error_handler(rate_limit_response);
    let api_gov_conf = Arc::new(
        api_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build API governor config"))?,
    );

    // Prune limiter state once a minute; short ticks keep shutdown quick.
    let api_cleaner = {
        let limiter = api_gov_conf.limiter().clone();
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || loop {
            for _ in 0..60 {
                if flag.load(Ordering::SeqCst) {
                    tracing::info!("API rate limiter cleanup thread exiting");
                    return;
                }
                std::thread::sleep(Duration::from_secs(1));
            }
            tracing::debug!("api rate limiter size: {}", limiter.len());
            limiter.retain_recent();
        })
    };

    let cors_origin = config
        .server
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|_| anyhow::anyhow!("Invalid CORS_ORIGIN: {}", config.server.cors_origin))?;

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/api",
            routes::api_router().layer(GovernorLayer {
                config: api_gov_conf.clone(),
            }),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors_origin)
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::DELETE,
                    http::Method::PATCH,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ])
                .allow_credentials(true),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received, stopping triggers");
        }
    }

    // Stop future firings; runs already in flight finish on their own.
    let trigger_handles = orchestrator.stop();
    thread_shutdown.store(true, Ordering::SeqCst);

    let wait = async {
        for handle in trigger_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
        tracing::warn!("Triggers did not exit within 5s");
    }

    if let Err(e) = api_cleaner.join() {
        tracing::warn!("API cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
