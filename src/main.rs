use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::path::PathBuf;
use std::sync::Arc;

use licensedrop::category::{CategoryResolver, is_valid_category};
use licensedrop::config::{Config, MailTransportKind};
use licensedrop::db::{AppState, DbPool, create_pool, init_db};
use licensedrop::email::{
    FailedSendLog, LogMailer, MailTransport, Notifier, ResendMailer, SmtpMailer,
};
use licensedrop::fulfillment::OrderLocks;
use licensedrop::handlers;
use licensedrop::inventory::{KeyInventory, SqliteInventory};
use licensedrop::records::{RecordStore, SqliteRecordStore, SupabaseRecordStore};

#[derive(Parser, Debug)]
#[command(name = "licensedrop")]
#[command(about = "Delivers pre-provisioned license keys for paid store orders")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Import keys from a file, one per line
    Import {
        file: PathBuf,
        category: String,
    },
    /// Show how many keys are available in a category
    Stock { category: String },
    /// List available keys in a category, oldest first
    List { category: String },
    /// Remove a key from whichever category holds it
    Remove { key: String },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("ERROR: {}", message);
    std::process::exit(1);
}

fn open_database(path: &str) -> DbPool {
    let pool = create_pool(path).unwrap_or_else(|e| fail(format!("failed to open {}: {}", path, e)));
    let conn = pool
        .get()
        .unwrap_or_else(|e| fail(format!("failed to get connection: {}", e)));
    init_db(&conn).unwrap_or_else(|e| fail(format!("failed to initialize database: {}", e)));
    pool
}

fn require_category(category: &str) {
    if !is_valid_category(category) {
        fail(format!(
            "invalid category '{}': use lowercase letters, digits, '-' or '_'",
            category
        ));
    }
}

/// Inventory commands work directly on the database file; the server may be running.
fn run_inventory_command(command: Command) {
    let db_path = Config::database_path_from_env();
    let inventory = SqliteInventory::new(open_database(&db_path));

    match command {
        Command::Import { file, category } => {
            require_category(&category);
            let contents = std::fs::read_to_string(&file)
                .unwrap_or_else(|e| fail(format!("failed to read {}: {}", file.display(), e)));
            let keys: Vec<String> = contents.lines().map(str::to_string).collect();
            let added = inventory
                .add(&category, &keys)
                .unwrap_or_else(|e| fail(e));
            let available = inventory.count(&category).unwrap_or_else(|e| fail(e));
            println!(
                "Imported {} keys into '{}' ({} available)",
                added, category, available
            );
        }
        Command::Stock { category } => {
            require_category(&category);
            let available = inventory.count(&category).unwrap_or_else(|e| fail(e));
            println!("{}: {} available", category, available);
        }
        Command::List { category } => {
            require_category(&category);
            for key in inventory.list(&category).unwrap_or_else(|e| fail(e)) {
                println!("{}", key);
            }
        }
        Command::Remove { key } => {
            if inventory.remove_any(&key).unwrap_or_else(|e| fail(e)) {
                println!("Removed key");
            } else {
                fail("key not found in any category");
            }
        }
        Command::Serve => unreachable!("serve is handled by main"),
    }
}

fn build_transport(config: &Config) -> Arc<dyn MailTransport> {
    match config.mail_transport {
        MailTransportKind::Smtp => match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp.clone())),
            None => fail("SMTP_HOST must be set when MAIL_TRANSPORT=smtp"),
        },
        MailTransportKind::Resend => match &config.resend_api_key {
            Some(key) => Arc::new(ResendMailer::new(key.clone())),
            None => fail("RESEND_API_KEY must be set when MAIL_TRANSPORT=resend"),
        },
        MailTransportKind::Log => {
            tracing::warn!("MAIL_TRANSPORT=log: emails are logged, not sent");
            Arc::new(LogMailer)
        }
    }
}

fn build_state(config: &Config, db: DbPool) -> AppState {
    let transport = build_transport(config);
    let notifier = Notifier::new(
        transport,
        config.from_email.clone(),
        config.shop_domain.clone(),
        config.email_retry,
        FailedSendLog::new(&config.failed_email_log),
    );

    let records: Arc<dyn RecordStore> = match &config.supabase {
        Some(supabase) => {
            tracing::info!(url = %supabase.url, "Recording issued keys in Supabase");
            Arc::new(SupabaseRecordStore::new(supabase))
        }
        None => Arc::new(SqliteRecordStore::new(db.clone())),
    };

    if config.admin_api_key.is_none() {
        tracing::warn!("ADMIN_API_KEY is not set, admin endpoints will reject every request");
    }

    AppState {
        inventory: Arc::new(SqliteInventory::new(db.clone())),
        db,
        records,
        notifier: Arc::new(notifier),
        categories: Arc::new(CategoryResolver::new(config.product_category_map.clone())),
        order_locks: Arc::new(OrderLocks::new()),
        webhook_secret: config.webhook_secret.clone(),
        admin_api_key: config.admin_api_key.clone(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensedrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        None | Some(Command::Serve) => serve().await,
        Some(command) => run_inventory_command(command),
    }
}

async fn serve() {
    let config = Config::from_env().unwrap_or_else(|e| fail(e));

    let db_pool = open_database(&config.database_path);
    let state = build_state(&config, db_pool);

    tracing::info!(
        transport = ?config.mail_transport,
        mapped_products = config.product_category_map.len(),
        database = %config.database_path,
        "Configuration loaded"
    );

    let app = handlers::app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| fail(format!("failed to bind to {}: {}", addr, e)));

    tracing::info!("licensedrop listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| fail(format!("server error: {}", e)));
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
