use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;
use stowage_localize::{LocalizeError, LocalizeReport, Localizer, StowageConfig};
use stowage_types::{Metadata, Uri};
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => StowageConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StowageConfig::default(),
    };
    let localizer = Localizer::from_config(&config)?;
    debug!(schemes = ?localizer.registry().schemes(), "backends ready");
    let format = cli.format;

    match cli.command {
        Command::Localize(args) => cmd_localize(&localizer, args, format).await,
        Command::Cp(args) => cmd_cp(&localizer, args, format).await,
        Command::Stat(args) => cmd_stat(&localizer, args, format).await,
        Command::Cat(args) => cmd_cat(&localizer, args).await,
        Command::Rm(args) => cmd_rm(&localizer, args, format).await,
        Command::Presign(args) => cmd_presign(&localizer, args, format).await,
        Command::Lock(args) => cmd_lock(&localizer, args, format).await,
        Command::Unlock(args) => cmd_unlock(&localizer, args, format).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn with_kind(err: LocalizeError) -> anyhow::Error {
    let kind = err.kind();
    anyhow::Error::new(err).context(format!("localization failed ({kind})"))
}

#[derive(Serialize)]
struct MappingOutput {
    original: String,
    localized: String,
}

#[derive(Serialize)]
struct LocalizeOutput {
    source: String,
    localized: String,
    report: LocalizeReport,
    manifest: Vec<MappingOutput>,
}

async fn cmd_localize(
    localizer: &Localizer,
    args: LocalizeArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let source = Uri::parse(&args.source)?;
    let target = args
        .target_dir
        .or_else(|| localizer.config().target_dir.clone())
        .context("no target directory given and localize.target_dir is not configured")?;
    let target = Uri::parse(&target)?;

    let localized = localizer
        .localize(&source, &target, args.recursive)
        .await
        .map_err(with_kind)?;
    let report = localized.report;

    if format == OutputFormat::Json {
        return print_json(&LocalizeOutput {
            source: source.to_string(),
            localized: localized.uri.to_string(),
            report,
            manifest: localized
                .manifest
                .iter()
                .map(|(original, loc)| MappingOutput {
                    original: original.to_string(),
                    localized: loc.to_string(),
                })
                .collect(),
        });
    }

    println!(
        "{} {} {} {}",
        "✓".green().bold(),
        source.to_string().dimmed(),
        "→".dimmed(),
        localized.uri.to_string().bold()
    );
    println!(
        "  transferred: {}, up to date: {}, rewritten: {}, presigned: {}",
        report.transfers.to_string().green(),
        report.skips,
        report.rewritten.to_string().cyan(),
        report.presigned
    );
    if report.stale_overrides > 0 {
        println!(
            "  {} took over {} stale lock(s)",
            "!".yellow().bold(),
            report.stale_overrides
        );
    }
    if localized.manifest.len() > 1 {
        for (original, loc) in localized.manifest.iter() {
            println!("    {} {} {}", original, "→".dimmed(), loc.to_string().cyan());
        }
    }
    Ok(())
}

async fn cmd_cp(localizer: &Localizer, args: CpArgs, format: OutputFormat) -> anyhow::Result<()> {
    let source = Uri::parse(&args.source)?;
    let destination = Uri::parse(&args.destination)?;
    let report = localizer
        .copy(&source, &destination)
        .await
        .map_err(with_kind)?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "source": source.to_string(),
            "destination": destination.to_string(),
            "copied": report.transfers > 0,
        }));
    }
    if report.transfers > 0 {
        println!("{} Copied {} → {}", "✓".green().bold(), source, destination.to_string().bold());
    } else {
        println!("{} {} is up to date", "✓".green(), destination.to_string().bold());
    }
    Ok(())
}

#[derive(Serialize)]
struct StatOutput<'a> {
    uri: String,
    #[serde(flatten)]
    metadata: &'a Metadata,
}

async fn cmd_stat(localizer: &Localizer, args: UriArgs, format: OutputFormat) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let metadata = localizer.registry().resolve(&uri)?.stat(&uri).await?;

    if format == OutputFormat::Json {
        return print_json(&StatOutput {
            uri: uri.to_string(),
            metadata: &metadata,
        });
    }
    println!("{}", uri.to_string().bold());
    println!("  size:  {}", metadata.size);
    println!("  mtime: {}", metadata.mtime.to_rfc3339());
    match metadata.content_hash {
        Some(digest) => println!("  md5:   {}", digest.to_string().cyan()),
        None => println!("  md5:   {}", "(not reported by backend)".dimmed()),
    }
    Ok(())
}

async fn cmd_cat(localizer: &Localizer, args: UriArgs) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let data = localizer.registry().resolve(&uri)?.read(&uri).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

async fn cmd_rm(localizer: &Localizer, args: UriArgs, format: OutputFormat) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let removed = localizer.registry().resolve(&uri)?.remove(&uri).await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "uri": uri.to_string(), "removed": removed }));
    }
    if removed {
        println!("{} Removed {}", "✓".green(), uri.to_string().bold());
    } else {
        println!("{} did not exist", uri.to_string().bold());
    }
    Ok(())
}

async fn cmd_presign(
    localizer: &Localizer,
    args: PresignArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let duration = args
        .duration
        .map(Duration::from_secs)
        .unwrap_or_else(|| localizer.config().presign_duration());
    let url = localizer
        .registry()
        .resolve(&uri)?
        .presign(&uri, duration)
        .await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "uri": uri.to_string(),
            "url": url,
            "expires_in_secs": duration.as_secs(),
        }));
    }
    println!("{url}");
    Ok(())
}

async fn cmd_lock(localizer: &Localizer, args: LockArgs, format: OutputFormat) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let locks = localizer.lock_manager();
    let ttl = args
        .ttl
        .map(Duration::from_secs)
        .unwrap_or_else(|| locks.config().ttl());
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| locks.config().timeout());

    let handle = locks.acquire_with(&uri, timeout, ttl).await?;
    let marker = handle.marker_uri().clone();
    let stale = handle.overrode_stale();
    let owner = handle.detach();

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "uri": uri.to_string(),
            "marker": marker.to_string(),
            "owner_id": owner,
            "ttl_secs": ttl.as_secs(),
            "overrode_stale": stale,
        }));
    }
    println!("{} Locked {}", "✓".green().bold(), uri.to_string().bold());
    println!("  marker: {}", marker);
    println!("  owner:  {}", owner.to_string().cyan());
    if stale {
        println!("  {} replaced a stale lock", "!".yellow().bold());
    }
    Ok(())
}

async fn cmd_unlock(localizer: &Localizer, args: UriArgs, format: OutputFormat) -> anyhow::Result<()> {
    let uri = Uri::parse(&args.uri)?;
    let removed = localizer.lock_manager().force_release(&uri).await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "uri": uri.to_string(), "unlocked": removed }));
    }
    if removed {
        println!("{} Unlocked {}", "✓".green(), uri.to_string().bold());
    } else {
        println!("{} was not locked", uri.to_string().bold());
    }
    Ok(())
}
