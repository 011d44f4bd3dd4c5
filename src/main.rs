use classroom_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    generation::{GeneratorState, HostedModelClient, MockContentGenerator},
    identity::{IdentityState, SupabaseIdentityClient},
    join_code::RandomCodeSource,
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Initializes configuration, logging, the database, the hosted-service clients and the
/// HTTP server, in that order.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise verbose for our crate and request traces.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "classroom_portal=debug,tower_http=info,axum=trace".into());

    // 3. Logging format per environment: pretty locally, JSON for log aggregation in prod.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Database Initialization (Postgres) and schema migrations.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Database migrations failed.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 5. Hosted services
    let identity = Arc::new(
        SupabaseIdentityClient::new(&config.supabase_url, &config.supabase_service_key)
            .expect("FATAL: Failed to build the identity provider client."),
    ) as IdentityState;

    // LOCAL-ONLY: without an API key the canned generator keeps the material flows usable.
    let generator = if config.env == Env::Local && config.generation_api_key.is_empty() {
        tracing::warn!("GENERATION_API_KEY not set; using the mock content generator");
        Arc::new(MockContentGenerator::new()) as GeneratorState
    } else {
        Arc::new(
            HostedModelClient::new(
                &config.generation_api_url,
                &config.generation_model,
                &config.generation_api_key,
            )
            .expect("FATAL: Failed to build the generation client."),
        ) as GeneratorState
    };

    // 6. Unified State Assembly
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        repo,
        identity,
        generator,
        codes: Arc::new(RandomCodeSource),
        config,
    };

    // 7. Router and Server Startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}
