use anyhow::Context as _;
use clap::Parser as _;
use dotenvy::dotenv;
use poise::serenity_prelude as serenity;
use services::audit_log::{AuditLogPipeline, IgnoreRegistry, LogSink, PipelineSettings};
use services::audit_log::discord::{CacheRoleDirectory, HttpAuditLogSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod db;
mod modules;
mod services;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Publish commands. If no guild ID is provided, publish globally.
    #[arg(long, num_args = 0..)]
    publish: Option<Vec<u64>>,

    /// Clear all commands instead of publishing them.
    #[arg(long)]
    clear: bool,

    /// Rollback the specified number of migrations and run all migrations again.
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    refresh_migrations: Option<u32>,

    /// Upper bound on resolving the moderator behind a change, in milliseconds.
    #[arg(long, env = "AUDIT_TIMEOUT_MS", default_value_t = 5000)]
    audit_timeout_ms: u64,

    /// How old an audit log entry may be and still count, in seconds.
    #[arg(long, env = "AUDIT_RECENCY_SECS", default_value_t = 120)]
    audit_recency_secs: i64,

    /// Audit log fetch attempts per change.
    #[arg(long, env = "AUDIT_ATTEMPTS", default_value_t = 3)]
    audit_attempts: u32,

    /// Delay between audit log fetch attempts, in milliseconds.
    #[arg(long, env = "AUDIT_RETRY_DELAY_MS", default_value_t = 1000)]
    audit_retry_delay_ms: u64,

    /// Audit log entries requested per fetch.
    #[arg(long, env = "AUDIT_FETCH_LIMIT", default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=100))]
    audit_fetch_limit: u8,

    /// Lifetime of a registered log ignore, in seconds.
    #[arg(long, env = "IGNORE_TTL_SECS", default_value_t = 30)]
    ignore_ttl_secs: u64,
}

impl Args {
    fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            audit_timeout: Duration::from_millis(self.audit_timeout_ms),
            recency_window: chrono::Duration::seconds(self.audit_recency_secs),
            audit_attempts: self.audit_attempts.max(1),
            audit_retry_delay: Duration::from_millis(self.audit_retry_delay_ms),
            audit_fetch_limit: self.audit_fetch_limit,
            ignore_ttl: Duration::from_secs(self.ignore_ttl_secs),
        }
    }
}

// Custom user data passed to all command functions
pub struct Data {
    pub cache: Arc<services::cache::ObjectCacheService>,
    pub ignores: Arc<IgnoreRegistry>,
    pub sink: Arc<dyn LogSink>,
    pub pipeline: Arc<AuditLogPipeline>,
    pub event_handlers: Vec<(&'static str, modules::EventHandler)>,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting moderation log bot...");

    // Establish database connection
    let db = db::establish_connection()
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    use sea_orm_migration::MigratorTrait;
    if let Some(depth) = args.refresh_migrations {
        info!("Refreshing migrations (down {}, then up)...", depth);
        db::migrations::Migrator::down(&db, Some(depth))
            .await
            .context("Failed to rollback migration")?;
    }

    db::migrations::Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    if args.refresh_migrations.is_some() {
        info!("Migrations refreshed successfully.");
        return Ok(());
    }

    let token = std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN must be set")?;
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MODERATION;

    for module in modules::get_modules() {
        info!(
            "Loaded module {} ({}): {}",
            module.definition.name, module.definition.id, module.definition.description
        );
    }

    let commands = modules::commands();

    // Handle command registration if requested
    if let Some(publish_args) = args.publish {
        let http = serenity::Http::new(&token);
        let application = http
            .get_current_application_info()
            .await
            .context("Failed to fetch application info")?;
        http.set_application_id(application.id);

        info!("Fetched Application ID: {}", application.id);

        let empty_commands = vec![];
        let commands = if args.clear { &empty_commands } else { &commands };

        if publish_args.is_empty() {
            if args.clear {
                info!("Clearing commands globally...");
            } else {
                info!("Registering commands globally...");
            }

            if let Err(e) = poise::builtins::register_globally(&http, commands).await {
                error!("Failed to register commands globally: {}", e);
            } else {
                info!("Global command operation successful");
            }
        } else {
            for guild_id in publish_args {
                if args.clear {
                    info!("Clearing commands in guild {}...", guild_id);
                } else {
                    info!("Registering commands in guild {}...", guild_id);
                }

                if let Err(e) = poise::builtins::register_in_guild(
                    &http,
                    commands,
                    serenity::GuildId::new(guild_id),
                )
                .await
                {
                    error!("Failed to register commands in guild {}: {}", guild_id, e);
                } else {
                    info!("Guild command operation successful for guild {}", guild_id);
                }
            }
        }
        return Ok(());
    }

    let settings = args.pipeline_settings();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            event_handler: |ctx, event, framework, data| {
                Box::pin(services::event_manager::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, _framework| {
            Box::pin(async move {
                let cache = Arc::new(services::cache::ObjectCacheService::new());
                let logger = Arc::new(services::logger::LoggerService::new(db));
                let sink: Arc<dyn LogSink> = Arc::new(services::logger::DiscordLogSink::new(
                    ctx.http.clone(),
                    logger,
                ));

                let ignores = Arc::new(IgnoreRegistry::new(settings.ignore_ttl));
                ignores.clone().start_sweeper();

                let pipeline = Arc::new(AuditLogPipeline::new(
                    settings,
                    Arc::new(HttpAuditLogSource::new(ctx.http.clone())),
                    Arc::new(CacheRoleDirectory::new(ctx.cache.clone(), cache.clone())),
                    ignores.clone(),
                    sink.clone(),
                ));

                Ok(Data {
                    cache,
                    ignores,
                    sink,
                    pipeline,
                    event_handlers: modules::event_handlers(),
                })
            })
        })
        .build();

    let mut cache_settings = ::serenity::cache::Settings::default();
    cache_settings.max_messages = 0;

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .cache_settings(cache_settings)
        .await
        .context("Failed to create client")?;

    info!("Bot is ready!");
    client.start_autosharded().await.context("Client error")?;

    Ok(())
}
