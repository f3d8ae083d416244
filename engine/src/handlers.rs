//! Command handlers for CLI operations
//!
//! Each handler prints a human-readable report or, with `--json`, a single
//! JSON document. Failures are returned as errors so `main` exits non-zero.

use anyhow::{Context, Result};
use serde_json::json;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::context::HubContext;
use crate::crypto::keys::{self, KeyPaths};
use crate::crypto::signer::KeyOrigin;
use crate::crypto::{verify_installed, Signer};
use crate::db::{unix_now, SyncStatus};
use crate::packager::Packager;
use crate::sync::credentials;
use sdk::errors::HubError;
use sdk::is_valid_module_id;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a `<MODULE>` argument to a directory
///
/// An existing directory path wins; otherwise the argument is a module id
/// under the modules root, in either state.
pub fn resolve_module_dir(ctx: &HubContext, module: &str) -> Result<PathBuf, HubError> {
    let path = Path::new(module);
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }

    if is_valid_module_id(module) {
        if let Some(dir) = ctx.modules.module_path(module) {
            return Ok(dir);
        }
    }

    Err(HubError::ModuleNotFound(module.to_string()))
}

fn module_id_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().trim_start_matches('_').to_string())
        .unwrap_or_default()
}

/// Validate a module directory
pub fn handle_validate(
    ctx: &HubContext,
    module: &str,
    strict: bool,
    format: OutputFormat,
) -> Result<()> {
    let dir = resolve_module_dir(ctx, module)?;
    let validator = ctx.validator()?;
    let result = if strict {
        validator.validate_strict(&dir)
    } else {
        validator.validate(&dir)
    };

    match format {
        OutputFormat::Text => {
            println!("Validating {}", dir.display());
            for error in &result.errors {
                println!("  error:   {}", error);
            }
            for warning in &result.warnings {
                println!("  warning: {}", warning);
            }
            if result.passed() {
                println!(
                    "Validation passed ({} warning(s))",
                    result.warnings.len()
                );
            }
        }
        OutputFormat::Json => print_json(&json!({
            "module": dir.display().to_string(),
            "passed": result.passed(),
            "strict": strict,
            "errors": result.errors,
            "warnings": result.warnings,
        }))?,
    }

    if !result.passed() {
        return Err(HubError::ValidationFailed {
            module_id: module_id_of(&dir),
            errors: result.errors,
        }
        .into());
    }
    Ok(())
}

/// Sign a module directory
pub fn handle_sign(
    ctx: &HubContext,
    module: &str,
    key_file: Option<&Path>,
    force: bool,
    format: OutputFormat,
) -> Result<()> {
    let dir = resolve_module_dir(ctx, module)?;
    let signer = Signer::for_module(&dir, key_file, &ctx.config.signing.key_dir)
        .map_err(HubError::from)?;
    let record = signer.sign(&dir, force).map_err(HubError::from)?;

    match format {
        OutputFormat::Text => {
            println!("Signed {} v{}", record.module_id, record.version);
            println!("  content hash: {}", record.content_hash);
            match signer.origin() {
                KeyOrigin::Supplied(path) => println!("  key:          {}", path.display()),
                KeyOrigin::KeyDir(dir) => println!("  key:          developer key in {}", dir.display()),
                KeyOrigin::Generated(paths) => {
                    println!("  key:          generated {}", paths.private_key.display());
                    println!();
                    println!("A new signing key was created. Hubs must trust its public key:");
                    println!("  hub keys trust <name> {}", paths.public_key.display());
                }
            }
        }
        OutputFormat::Json => print_json(&json!({
            "module_id": record.module_id,
            "version": record.version,
            "content_hash": record.content_hash,
            "algorithm": record.algorithm,
            "key_generated": matches!(signer.origin(), KeyOrigin::Generated(_)),
        }))?,
    }
    Ok(())
}

/// Verify a module against the trusted keys
pub fn handle_verify(ctx: &HubContext, module: &str, format: OutputFormat) -> Result<()> {
    let dir = resolve_module_dir(ctx, module)?;
    let trusted = ctx.trusted_keys()?;
    let key = verify_installed(&dir, &trusted).map_err(HubError::from)?;

    match format {
        OutputFormat::Text => println!("Signature OK for {} (trusted key '{}')", dir.display(), key),
        OutputFormat::Json => print_json(&json!({
            "module": dir.display().to_string(),
            "verified": true,
            "trusted_key": key,
        }))?,
    }
    Ok(())
}

/// Build a distributable archive
pub fn handle_package(
    ctx: &HubContext,
    module: &str,
    output_dir: Option<&Path>,
    skip_validation: bool,
    format: OutputFormat,
) -> Result<()> {
    let dir = resolve_module_dir(ctx, module)?;
    let output_dir = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.config.packaging.output_dir.clone());

    let validator = ctx.validator()?;
    let packager = Packager::new(&validator, ctx.package_options(skip_validation));
    let outcome = packager
        .package(&dir, &output_dir)
        .map_err(HubError::from)?;

    match format {
        OutputFormat::Text => {
            println!("Created {}", outcome.path.display());
            println!("  {} entries, {} bytes", outcome.entries, outcome.size);
            if !outcome.signed {
                println!("  warning: archive is unsigned (development mode)");
            }
        }
        OutputFormat::Json => print_json(&json!({
            "archive": outcome.path.display().to_string(),
            "size": outcome.size,
            "entries": outcome.entries,
            "signed": outcome.signed,
        }))?,
    }
    Ok(())
}

/// Install an archive from a path or an https URL
pub async fn handle_install(
    ctx: &HubContext,
    archive: &str,
    sha256: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let installer = ctx.installer()?;
    let outcome = if archive.starts_with("https://") || archive.starts_with("http://") {
        let expected = sha256.context("--sha256 is required when installing from a URL")?;
        let downloads = ctx.config.core.data_dir.join("downloads");
        ctx.lifecycle()
            .install_from_url(&installer, archive, expected, &downloads)
            .await?
    } else {
        ctx.lifecycle().install(&installer, Path::new(archive)).await?
    };

    match format {
        OutputFormat::Text => {
            println!(
                "Installed {} v{} (inactive)",
                outcome.module_id, outcome.version
            );
            match &outcome.trusted_key {
                Some(key) => println!("  signature verified with trusted key '{}'", key),
                None => println!("  warning: module is unsigned (development mode)"),
            }
            println!("Activate it with: hub activate {}", outcome.module_id);
        }
        OutputFormat::Json => print_json(&json!({
            "module_id": outcome.module_id,
            "version": outcome.version,
            "path": outcome.path.display().to_string(),
            "content_hash": outcome.content_hash,
            "trusted_key": outcome.trusted_key,
        }))?,
    }
    Ok(())
}

pub async fn handle_activate(ctx: &HubContext, id: &str, format: OutputFormat) -> Result<()> {
    let outcome = ctx.lifecycle().activate(id).await?;

    match format {
        OutputFormat::Text => {
            if outcome.restart_required {
                println!("Module '{}' activated. Restart the hub to load it.", id);
            } else {
                println!("Module '{}' is already active.", id);
            }
        }
        OutputFormat::Json => print_json(&json!({
            "module_id": outcome.module_id,
            "restart_required": outcome.restart_required,
        }))?,
    }
    Ok(())
}

pub async fn handle_deactivate(ctx: &HubContext, id: &str, format: OutputFormat) -> Result<()> {
    let outcome = ctx.lifecycle().deactivate(id).await?;

    match format {
        OutputFormat::Text => println!("Module '{}' deactivated.", id),
        OutputFormat::Json => print_json(&json!({
            "module_id": outcome.module_id,
            "restart_required": outcome.restart_required,
        }))?,
    }
    Ok(())
}

pub async fn handle_delete(ctx: &HubContext, id: &str, format: OutputFormat) -> Result<()> {
    ctx.lifecycle().uninstall(id).await?;

    match format {
        OutputFormat::Text => println!("Module '{}' deleted.", id),
        OutputFormat::Json => print_json(&json!({ "module_id": id, "deleted": true }))?,
    }
    Ok(())
}

/// List modules under the modules root
pub async fn handle_list(ctx: &HubContext, all: bool, format: OutputFormat) -> Result<()> {
    let modules = ctx.modules.discover(all).map_err(HubError::from)?;
    let records = ctx.db.modules().list().await?;

    match format {
        OutputFormat::Text => {
            if modules.is_empty() {
                println!("No modules in {}", ctx.modules.root().display());
                return Ok(());
            }
            println!("Modules ({}):", ctx.modules.root().display());
            println!();
            for info in &modules {
                let state = if info.is_active { "active" } else { "inactive" };
                match &info.manifest {
                    Some(manifest) => {
                        println!("  {} v{} [{}]", info.module_id, manifest.version, state);
                        let permissions = manifest.requested_permissions();
                        if !permissions.is_empty() {
                            println!("    permissions: {}", permissions.join(", "));
                        }
                    }
                    None => println!("  {} [{}]", info.module_id, state),
                }
                if let Some(error) = &info.error {
                    println!("    error: {}", error);
                }
            }
        }
        OutputFormat::Json => {
            let items: Vec<serde_json::Value> = modules
                .iter()
                .map(|info| {
                    let record = records.iter().find(|r| r.module_id == info.module_id);
                    json!({
                        "module_id": info.module_id,
                        "is_active": info.is_active,
                        "version": info.manifest.as_ref().map(|m| m.version.clone()),
                        "permissions": info
                            .manifest
                            .as_ref()
                            .map(|m| m.requested_permissions())
                            .unwrap_or_default(),
                        "content_hash": record.and_then(|r| r.content_hash.clone()),
                        "installed_at": record.map(|r| r.installed_at),
                        "has_error": info.has_error,
                        "error": info.error,
                    })
                })
                .collect();
            print_json(&json!({ "modules": items }))?;
        }
    }
    Ok(())
}

pub async fn handle_queue_stats(ctx: &HubContext, format: OutputFormat) -> Result<()> {
    let stats = ctx.queue.stats().await?;

    match format {
        OutputFormat::Text => {
            println!("Sync queue:");
            println!("  pending:    {}", stats.pending);
            println!("  processing: {}", stats.processing);
            println!("  completed:  {}", stats.completed);
            println!("  failed:     {}", stats.failed);
        }
        OutputFormat::Json => print_json(&json!({ "queue": stats, "total": stats.total() }))?,
    }
    Ok(())
}

pub async fn handle_queue_drain(
    ctx: &HubContext,
    limit: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let deliverer = ctx.deliverer()?;
    ctx.queue.reset_processing().await?;
    let report = ctx
        .queue
        .drain(&deliverer, limit.unwrap_or(ctx.config.sync.batch_size))
        .await?;

    match format {
        OutputFormat::Text => println!(
            "Delivered {}, rescheduled {}, failed {}",
            report.delivered, report.rescheduled, report.failed
        ),
        OutputFormat::Json => print_json(&serde_json::to_value(report)?)?,
    }
    Ok(())
}

pub async fn handle_queue_retry(ctx: &HubContext, id: &str, format: OutputFormat) -> Result<()> {
    if !ctx.queue.retry_failed(id).await? {
        anyhow::bail!("No failed queue entry with id '{}'", id);
    }

    match format {
        OutputFormat::Text => println!("Queue entry {} will be retried.", id),
        OutputFormat::Json => print_json(&json!({ "id": id, "status": "pending" }))?,
    }
    Ok(())
}

pub async fn handle_queue_list(
    ctx: &HubContext,
    status: Option<&str>,
    limit: u32,
    format: OutputFormat,
) -> Result<()> {
    let status = status.map(str::parse::<SyncStatus>).transpose()?;
    let entries = ctx.queue.list(status, limit).await?;

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No queue entries.");
            }
            for entry in &entries {
                println!(
                    "{}  {:<16} {:<10} {} {} (retries {}/{})",
                    entry.id,
                    entry.operation_type.as_str(),
                    entry.status.as_str(),
                    entry.http_method,
                    entry.endpoint,
                    entry.retry_count,
                    entry.max_retries
                );
                if let Some(error) = &entry.last_error {
                    println!("    last error: {}", error);
                }
            }
        }
        OutputFormat::Json => print_json(&json!({ "entries": entries }))?,
    }
    Ok(())
}

pub async fn handle_queue_purge(
    ctx: &HubContext,
    older_than_days: u32,
    format: OutputFormat,
) -> Result<()> {
    let purged = ctx
        .queue
        .purge_completed(i64::from(older_than_days) * 24 * 60 * 60)
        .await?;

    match format {
        OutputFormat::Text => println!("Purged {} completed entries.", purged),
        OutputFormat::Json => print_json(&json!({ "purged": purged }))?,
    }
    Ok(())
}

/// Generate the developer signing key
pub fn handle_keys_generate(ctx: &HubContext, force: bool, format: OutputFormat) -> Result<()> {
    let key_dir = &ctx.config.signing.key_dir;
    let existing = KeyPaths::in_dir(key_dir);
    if existing.private_key.exists() && !force {
        anyhow::bail!(
            "A signing key already exists at {}; pass --force to replace it",
            existing.private_key.display()
        );
    }

    let paths = keys::save_keypair(key_dir, &keys::generate_signing_key())
        .map_err(HubError::from)?;

    match format {
        OutputFormat::Text => {
            println!("Private key: {}", paths.private_key.display());
            println!("Public key:  {}", paths.public_key.display());
        }
        OutputFormat::Json => print_json(&json!({
            "private_key": paths.private_key.display().to_string(),
            "public_key": paths.public_key.display().to_string(),
        }))?,
    }
    Ok(())
}

/// Print the developer public key
pub fn handle_keys_show(ctx: &HubContext, format: OutputFormat) -> Result<()> {
    let paths = KeyPaths::in_dir(&ctx.config.signing.key_dir);
    let pem = std::fs::read_to_string(&paths.public_key).with_context(|| {
        format!(
            "No public key at {}; run 'hub keys generate'",
            paths.public_key.display()
        )
    })?;

    match format {
        OutputFormat::Text => print!("{}", pem),
        OutputFormat::Json => print_json(&json!({
            "path": paths.public_key.display().to_string(),
            "public_key": pem,
        }))?,
    }
    Ok(())
}

/// Add a public key to the trusted store
pub fn handle_keys_trust(
    ctx: &HubContext,
    name: &str,
    path: &Path,
    format: OutputFormat,
) -> Result<()> {
    if !is_valid_module_id(name) {
        anyhow::bail!("Key name '{}' may only contain letters, digits, '_' and '-', with no leading '_'", name);
    }

    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let target = keys::trust_public_key(&ctx.config.signing.trusted_keys_dir, name, &pem)
        .map_err(HubError::from)?;

    match format {
        OutputFormat::Text => println!("Trusted key '{}' saved to {}", name, target.display()),
        OutputFormat::Json => print_json(&json!({
            "name": name,
            "path": target.display().to_string(),
        }))?,
    }
    Ok(())
}

pub fn handle_cloud_set_token(token: Option<String>, format: OutputFormat) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => {
            eprintln!("Paste the cloud token and press Enter:");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read token from stdin")?;
            line
        }
    };

    credentials::store_cloud_token(&token)?;

    match format {
        OutputFormat::Text => println!("Cloud token stored in the OS keychain."),
        OutputFormat::Json => print_json(&json!({ "stored": true }))?,
    }
    Ok(())
}

pub fn handle_cloud_clear_token(format: OutputFormat) -> Result<()> {
    credentials::delete_cloud_token()?;

    match format {
        OutputFormat::Text => println!("Cloud token removed."),
        OutputFormat::Json => print_json(&json!({ "stored": false }))?,
    }
    Ok(())
}

/// Check directories, database, keys and cloud credentials
pub async fn handle_doctor(ctx: &HubContext, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks = Vec::new();

    // Config is validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    for (label, dir) in [
        ("Data directory", &ctx.config.core.data_dir),
        ("Modules directory", &ctx.config.core.modules_dir),
    ] {
        if dir.is_dir() {
            checks.push((label, "Exists".to_string()));
        } else {
            checks.push((label, "Missing".to_string()));
            issues.push(format!("{} does not exist: {}", label, dir.display()));
        }
    }

    match ctx.queue.stats().await {
        Ok(stats) => {
            checks.push(("Database", "OK".to_string()));
            if stats.failed > 0 {
                issues.push(format!(
                    "{} sync operation(s) failed permanently; see 'hub queue list --status failed'",
                    stats.failed
                ));
            }
            checks.push(("Sync queue", format!("{} pending, {} failed", stats.pending, stats.failed)));
        }
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot query database: {}", e));
        }
    }

    match ctx.modules.discover(true) {
        Ok(modules) => {
            let broken: Vec<&str> = modules
                .iter()
                .filter(|m| m.has_error)
                .map(|m| m.module_id.as_str())
                .collect();
            checks.push(("Modules", format!("{} found", modules.len())));
            if !broken.is_empty() {
                issues.push(format!("Modules with unreadable manifests: {}", broken.join(", ")));
            }
        }
        Err(e) => {
            checks.push(("Modules", "Unreadable".to_string()));
            issues.push(e.to_string());
        }
    }

    if KeyPaths::in_dir(&ctx.config.signing.key_dir).private_key.exists() {
        checks.push(("Signing key", "Present".to_string()));
    } else {
        checks.push(("Signing key", "Not generated".to_string()));
    }

    match ctx.trusted_keys() {
        Ok(store) if store.is_empty() => {
            checks.push(("Trusted keys", "None".to_string()));
            issues.push(format!(
                "No trusted keys in {}; signed modules cannot be installed",
                ctx.config.signing.trusted_keys_dir.display()
            ));
        }
        Ok(store) => checks.push(("Trusted keys", format!("{} loaded", store.len()))),
        Err(e) => {
            checks.push(("Trusted keys", "Unreadable".to_string()));
            issues.push(e.to_string());
        }
    }

    if ctx.config.packaging.allow_unsigned {
        issues.push("packaging.allow_unsigned is enabled (development mode)".to_string());
    }

    if credentials::cloud_token().is_some() {
        checks.push(("Cloud token", "Configured".to_string()));
    } else {
        checks.push(("Cloud token", "Not configured".to_string()));
        if ctx.config.sync.enabled {
            issues.push("Sync is enabled but no cloud token is configured".to_string());
        }
    }

    match format {
        OutputFormat::Text => {
            println!("Hub diagnostics:");
            println!();
            for (label, status) in &checks {
                println!("  {:<18} {}", label, status);
            }
            println!();
            if issues.is_empty() {
                println!("No issues found.");
            } else {
                println!("Issues:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let checks: serde_json::Map<String, serde_json::Value> = checks
                .into_iter()
                .map(|(label, status)| (label.to_string(), json!(status)))
                .collect();
            print_json(&json!({
                "checks": checks,
                "issues": issues,
                "checked_at": unix_now(),
            }))?;
        }
    }
    Ok(())
}
