//! # Mamiya Configuration Validator
//!
//! Checks an agent configuration (file plus `MAMIYA_*` environment overrides)
//! before the agent is deployed with it.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use mamiya_agent::{AgentConfig, PackageScanner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate mamiya agent configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Environment overrides apply on top.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the effective configuration
    Show,

    /// Check which command kinds the event filter lets through
    Filter {
        /// Command kinds, e.g. `fetch` or `clean`
        kinds: Vec<String>,
    },

    /// List valid packages under the configured packages directory
    Packages,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|config| match &cli.command {
        Some(Commands::Validate) | None => validate(&cli, &config),
        Some(Commands::Show) => show(&cli, &config),
        Some(Commands::Filter { kinds }) => check_filter(&cli, &config, kinds),
        Some(Commands::Packages) => list_packages(&cli, &config),
    });

    match result {
        Ok(()) => {
            info!("Configuration check completed");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration check failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let config = AgentConfig::load(cli.config.as_deref())?;
    config.validate()?;
    Ok(config)
}

fn validate(cli: &Cli, config: &AgentConfig) -> anyhow::Result<()> {
    let filter = config.event_filter()?;
    match cli.format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "valid": true,
                "packages_dir_exists": config.packages_dir.is_dir(),
                "fetch_enabled": config.fetch_source_dir.is_some(),
                "filter_entries": filter.as_ref().map_or(0, |f| f.len()),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("🔧 Validating mamiya agent configuration");
            println!("   ✅ Poll interval: {:?}", config.poll_interval());
            println!("   ✅ Ready timeout: {:?}", config.ready_timeout());
            println!("   ✅ Shutdown grace: {:?}", config.shutdown_grace());
            println!("   ✅ Keep packages: {}", config.keep_packages);
            if config.packages_dir.is_dir() {
                println!("   ✅ Packages dir: {}", config.packages_dir.display());
            } else {
                println!(
                    "   ℹ️  Packages dir does not exist yet: {}",
                    config.packages_dir.display()
                );
            }
            match &config.fetch_source_dir {
                Some(dir) => println!("   ✅ Fetch source: {}", dir.display()),
                None => println!("   ℹ️  No fetch source, fetch task disabled"),
            }
            match &filter {
                Some(filter) => println!("   ✅ Event filter: {} entries", filter.len()),
                None => println!("   ✅ Event filter: dispatch all commands"),
            }
            println!("\n🎉 Configuration is valid");
        }
    }
    Ok(())
}

fn show(cli: &Cli, config: &AgentConfig) -> anyhow::Result<()> {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Table => println!("{config:#?}"),
    }
    Ok(())
}

fn check_filter(cli: &Cli, config: &AgentConfig, kinds: &[String]) -> anyhow::Result<()> {
    let filter = config.event_filter()?;
    let verdicts: Vec<(&str, bool)> = kinds
        .iter()
        .map(|kind| {
            let allowed = filter.as_ref().is_none_or(|f| f.allows(kind));
            (kind.as_str(), allowed)
        })
        .collect();

    match cli.format {
        OutputFormat::Json => {
            let report: serde_json::Map<String, serde_json::Value> = verdicts
                .iter()
                .map(|(kind, allowed)| ((*kind).to_string(), (*allowed).into()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            for (kind, allowed) in verdicts {
                let mark = if allowed { "✅ dispatched" } else { "🚫 filtered" };
                println!("   {kind}: {mark}");
            }
        }
    }
    Ok(())
}

fn list_packages(cli: &Cli, config: &AgentConfig) -> anyhow::Result<()> {
    let packages = PackageScanner::new(config.packages_dir.clone()).scan();
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&packages)?),
        OutputFormat::Table => {
            println!("📦 Packages in {}", config.packages_dir.display());
            for (app, bases) in &packages {
                println!("  • {app}: {}", bases.join(", "));
            }
        }
    }
    Ok(())
}
