// CPOS Hub
// Main entry point for the hub binary

use clap::Parser;
use hub_engine::cli::{Cli, CloudAction, Command, KeysAction, QueueAction};
use hub_engine::config::Config;
use hub_engine::context::HubContext;
use hub_engine::handlers::{self, OutputFormat};
use hub_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("CPOS Hub v{} ({} - {})", version, commit, timestamp);

    // Cloud credentials live in the keychain and need no database
    if let Command::Cloud { action } = cli.command {
        return match action {
            CloudAction::SetToken { token } => handlers::handle_cloud_set_token(token, format),
            CloudAction::ClearToken => handlers::handle_cloud_clear_token(format),
        };
    }

    let ctx = HubContext::init(config).await?;

    if let Command::Serve = cli.command {
        tracing::info!("Starting hub daemon...");
        return hub_engine::daemon::serve(ctx).await;
    }

    let result = match cli.command {
        Command::Validate { module, strict } => {
            handlers::handle_validate(&ctx, &module, strict, format)
        }
        Command::Sign {
            module,
            key_file,
            force,
        } => handlers::handle_sign(&ctx, &module, key_file.as_deref(), force, format),
        Command::Verify { module } => handlers::handle_verify(&ctx, &module, format),
        Command::Package {
            module,
            output_dir,
            skip_validation,
        } => handlers::handle_package(
            &ctx,
            &module,
            output_dir.as_deref(),
            skip_validation,
            format,
        ),
        Command::Install { archive, sha256 } => {
            handlers::handle_install(&ctx, &archive, sha256.as_deref(), format).await
        }
        Command::Activate { id } => handlers::handle_activate(&ctx, &id, format).await,
        Command::Deactivate { id } => handlers::handle_deactivate(&ctx, &id, format).await,
        Command::Delete { id } => handlers::handle_delete(&ctx, &id, format).await,
        Command::List { all } => handlers::handle_list(&ctx, all, format).await,
        Command::Queue { action } => match action {
            QueueAction::Stats => handlers::handle_queue_stats(&ctx, format).await,
            QueueAction::Drain { limit } => handlers::handle_queue_drain(&ctx, limit, format).await,
            QueueAction::Retry { id } => handlers::handle_queue_retry(&ctx, &id, format).await,
            QueueAction::List { status, limit } => {
                handlers::handle_queue_list(&ctx, status.as_deref(), limit, format).await
            }
            QueueAction::Purge { older_than_days } => {
                handlers::handle_queue_purge(&ctx, older_than_days, format).await
            }
        },
        Command::Keys { action } => match action {
            KeysAction::Generate { force } => handlers::handle_keys_generate(&ctx, force, format),
            KeysAction::Show => handlers::handle_keys_show(&ctx, format),
            KeysAction::Trust { name, path } => {
                handlers::handle_keys_trust(&ctx, &name, &path, format)
            }
        },
        Command::Doctor => handlers::handle_doctor(&ctx, format).await,
        Command::Cloud { .. } | Command::Serve => Ok(()),
    };

    // Flush the WAL even when the command failed
    if let Err(e) = ctx.close().await {
        tracing::warn!("Failed to close database cleanly: {:#}", e);
    }

    result
}
