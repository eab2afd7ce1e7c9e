use authgate::api::start_webserver;
use authgate::config::{StoreBackend, load_config};
use authgate::oauth2::{
    AuthorizationManager, DatabaseStore, DbDirectory, KvStore, MemoryStore, OAuth2State,
};
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "authgate=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_standard_tracing();

    let config = load_config()?;

    // Set up SeaORM database connection
    let db = Arc::new(Database::connect(&config.database_url).await?);

    let store: Arc<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; sessions and codes are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Database => Arc::new(DatabaseStore::new(db.clone())),
    };
    let directory = Arc::new(DbDirectory::new(db));

    tracing::info!(
        issuer = %config.auth.issuer,
        access_token_expiry = config.auth.access_token_expiry,
        refresh_token_expiry = config.auth.refresh_token_expiry,
        authorize_code_expiry = config.auth.authorize_code_expiry,
        backend = ?config.store.backend,
        "authorization configuration"
    );

    let manager = Arc::new(AuthorizationManager::new(
        config.auth.clone(),
        directory,
        store,
    ));
    let state = OAuth2State::new(manager, config.http.secure_cookies);

    start_webserver(state, &config.http.listen_addr).await?;
    Ok(())
}
