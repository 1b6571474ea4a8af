use std::net::SocketAddr;
use std::sync::Arc;

use hookrelay::{
    actions::{ActionLookup, sync_registry},
    circuit_breaker::CircuitBreaker,
    clock::{Clock, SystemClock},
    config::{AppConfig, assemble, load_providers},
    db,
    executions::{ActionRunner, TokioScheduler, spawn_job_worker},
    handlers::router,
    ingest::IngestService,
    outgoing::{
        ForwardingExecutor, HttpDeliverer, OutgoingConfig, OutgoingDispatcher,
        spawn_outgoing_loop,
    },
    rate_limiter::RateLimiter,
    state::AppState,
    time_window::TimeWindowValidator,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hookrelay=info")),
        )
        .init();

    let config = AppConfig::from_env();
    let outgoing_config = OutgoingConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let pool = db::connect(&config.database_url, 5).await?;
    db::migrate(&pool).await?;

    let document = load_providers(&config.providers_file)?;
    let setup = assemble(document, &TimeWindowValidator::new(Arc::clone(&clock)))?;
    let registry = Arc::new(setup.registry);
    sync_registry(&pool, &registry, clock.now()).await?;
    tracing::info!(
        providers = setup.directory.len(),
        actions = registry.len(),
        "provider configuration loaded"
    );

    let mut executor = ForwardingExecutor::new(pool.clone(), Arc::clone(&clock));
    for (action_id, target) in setup.forward_targets {
        executor.add_target(action_id, target);
    }

    let (scheduler, jobs) = TokioScheduler::new();
    let runner = Arc::new(
        ActionRunner::new(
            pool.clone(),
            Arc::new(executor),
            Arc::new(scheduler),
            Arc::clone(&clock),
        )
        .with_lock_timeout(config.lock_timeout()),
    );
    spawn_job_worker(jobs, Arc::clone(&runner), config.job_concurrency);

    let ingest = IngestService::new(
        pool.clone(),
        Arc::new(setup.directory),
        Arc::new(RateLimiter::new(Arc::clone(&clock))),
        ActionLookup::new(pool.clone(), registry),
        runner,
        Arc::clone(&clock),
    );

    let deliverer = HttpDeliverer::new(outgoing_config.request_timeout())?;
    let poll_interval = outgoing_config.poll_interval();
    let dispatcher = OutgoingDispatcher::new(
        pool.clone(),
        outgoing_config,
        Arc::new(CircuitBreaker::new(Arc::clone(&clock))),
        Arc::new(deliverer),
        Arc::clone(&clock),
    );
    spawn_outgoing_loop(Arc::new(dispatcher), poll_interval);

    let state = AppState {
        pool,
        ingest: Arc::new(ingest),
        clock,
        admin_api_token: config.admin_api_token.clone(),
    };
    let app = router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
