use autopause_dashboard::audit::{AuditLogger, AuditStore, MemoryAuditStore};
use autopause_dashboard::config::Config;
use autopause_dashboard::config_api::ConfigApi;
use autopause_dashboard::console::Console;
use autopause_dashboard::dashboard::Dashboard;
use autopause_dashboard::db::Database;
use autopause_dashboard::identity::SupabaseAuth;
use autopause_dashboard::telemetry::init_tracing;
use std::error::Error;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;

    // Audit storage: Postgres when configured, otherwise process memory
    let store: Arc<dyn AuditStore> = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            db.ensure_schema().await?;
            info!("audit log stored in postgres");
            Arc::new(db)
        }
        None => {
            warn!("DATABASE_URL not set; activity log is kept in memory only");
            Arc::new(MemoryAuditStore::new())
        }
    };

    let (notices_tx, notices_rx) = mpsc::unbounded_channel();
    let audit = Arc::new(AuditLogger::spawn(store, notices_tx));

    let backend = Arc::new(ConfigApi::new(
        &config.config_api_base_url,
        config.request_timeout,
    )?);
    let identity = Arc::new(SupabaseAuth::new(
        &config.identity_url,
        config.identity_anon_key,
        config.request_timeout,
    )?);

    let dashboard = Dashboard::new(
        backend,
        identity,
        audit,
        config.collection_protocol,
        config.meta_ad_accounts,
        config.activity_limit,
    );

    // Run the console until stdin closes or `quit`
    let mut console = Console::new(
        dashboard,
        notices_rx,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
    );
    console.run().await?;

    Ok(())
}
