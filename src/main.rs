use anyhow::Result;
use clap::{Parser, Subcommand};
use realty_bot::api_client::ApiClient;
use realty_bot::bot;
use realty_bot::config::Config;
use realty_bot::context::AppContext;
use realty_bot::currency::CachedRates;
use realty_bot::store::{SqliteStore, UserStore};
use realty_bot::transport::TelegramTransport;
use realty_bot::{import, scheduler, subscription, utils};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

#[derive(Parser)]
#[command(name = "realty-rent-bot", about = "Telegram bot for apartment and house rentals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Запустить бота и фоновую рассылку (по умолчанию)
    Run,
    /// Один цикл рассылки подписчикам
    Notify,
    /// Загрузить объявления из JSON-файла
    Import { file: PathBuf },
    /// Статистика пользователей
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::from_env()?;
            info!("Starting Telegram bot...");
            info!("Database: {}", config.database_url);

            let bot = Bot::new(&config.telegram_token);
            let interval = config.notify_interval;
            let ctx = Arc::new(build_context(config, bot.clone()).await?);

            let broadcast = scheduler::spawn_broadcast(ctx.clone(), interval);
            bot::start_bot(bot, ctx).await?;
            broadcast.abort();
        }
        Command::Notify => {
            let config = Config::from_env()?;
            let bot = Bot::new(&config.telegram_token);
            let ctx = build_context(config, bot).await?;
            let report = subscription::notify_subscribers(&ctx).await?;
            println!(
                "Subscribers: {}, notified: {}, listings sent: {}, blocked: {}, stale: {}",
                report.subscribers, report.notified, report.listings_sent, report.blocked, report.stale_listings
            );
        }
        Command::Import { file } => {
            let store = SqliteStore::new(&Config::database_url_from_env()).await?;
            let report = import::import_file(&store, &file).await?;
            println!("Imported: {}, skipped: {}", report.inserted, report.skipped);
        }
        Command::Stats => {
            let store = SqliteStore::new(&Config::database_url_from_env()).await?;
            let stats = store.user_stats(chrono::Utc::now() - chrono::Duration::hours(1)).await?;
            println!("{}", utils::format_stats(&stats));
        }
    }

    Ok(())
}

async fn build_context(config: Config, bot: Bot) -> Result<AppContext> {
    let store = Arc::new(SqliteStore::new(&config.database_url).await?);
    let rates = Arc::new(CachedRates::new(
        Arc::new(ApiClient::new(config.monobank_url.clone())),
        config.rates_ttl,
    ));
    let transport = Arc::new(TelegramTransport::new(bot));
    Ok(AppContext::new(config, store, rates, transport))
}
