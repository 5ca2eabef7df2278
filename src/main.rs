use std::{net::SocketAddr, process, sync::Arc};

use community_node::{
    application::{
        error::AppError, proxy::ProxyEngine, refresh::RefreshScheduler, upstream::Upstream,
    },
    cache::{CacheStore, MemoryStore},
    config::{self, CacheBackend},
    infra::{
        error::InfraError,
        http::{self, HttpState, RateLimiter},
        origin::OriginClient,
        redis_store::RedisStore,
        registration::{Heartbeat, registration_record},
        speedtest::SpeedTest,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args.into_command();

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => {
            info!(
                target = "community_node::config",
                addr = %settings.server.addr,
                upstream = %settings.upstream.base_url,
                backend = ?settings.cache.backend,
                node = %settings.node.name,
                "configuration is valid"
            );
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = build_store(&settings.cache.backend)?;
    if let Err(err) = store.ping().await {
        warn!(
            target = "community_node::serve",
            error = %err,
            "cache store unreachable at startup, reads fall through to the registry"
        );
    }

    let origin = Arc::new(OriginClient::new(&settings.upstream)?);
    let upstream: Arc<dyn Upstream> = origin.clone();
    let refresher = RefreshScheduler::new(
        store.clone(),
        upstream.clone(),
        settings.cache.refresh_concurrency.get() as usize,
    );
    let proxy = Arc::new(ProxyEngine::new(
        store.clone(),
        upstream,
        refresher.clone(),
    ));

    let state = HttpState {
        proxy,
        store: store.clone(),
        speedtest: Arc::new(SpeedTest::new(
            store,
            &origin,
            &settings.node.public_url,
        )),
        rate_limiter: Arc::new(RateLimiter::from_settings(&settings.rate_limit)),
        node_name: Arc::from(settings.node.name.as_str()),
    };

    let heartbeat_handle = if settings.heartbeat.enabled {
        let heartbeat = Heartbeat::new(
            &settings.upstream.base_url,
            registration_record(&settings.node),
            &settings.heartbeat,
        )?;
        Some(heartbeat.spawn())
    } else {
        info!(
            target = "community_node::serve",
            "registration heartbeat disabled"
        );
        None
    };

    let result = serve_http(&settings, state).await;

    if let Some(handle) = heartbeat_handle {
        handle.abort();
        let _ = handle.await;
    }

    if !refresher.drain(settings.server.graceful_shutdown).await {
        warn!(
            target = "community_node::serve",
            in_flight = refresher.in_flight(),
            "shutting down with background refreshes still in flight"
        );
    }

    result
}

fn build_store(backend: &CacheBackend) -> Result<Arc<dyn CacheStore>, AppError> {
    match backend {
        CacheBackend::Redis { url, pool_size } => {
            let store = RedisStore::connect(url, pool_size.get() as usize)?;
            Ok(Arc::new(store))
        }
        CacheBackend::Memory => {
            info!(
                target = "community_node::serve",
                "using in-process cache store; entries are lost on restart"
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state, &settings.cors);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "community_node::serve",
        addr = %settings.server.addr,
        upstream = %settings.upstream.base_url,
        "listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(target = "community_node::serve", "shutdown signal received");
}
