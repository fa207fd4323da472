use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use strata_core::EngineConfig;
use strata_store::InMemorySummaryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod simulate;

use simulate::SimulateOptions;

const DEFAULT_CONFIG: &str = "config/hierarchy.toml";

fn cli() -> Command {
    Command::new("strata")
        .version(strata_core::VERSION)
        .about("Hierarchical summary cache with cascading invalidation")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("validate")
                .about("Load and validate an engine config")
                .arg(
                    Arg::new("config")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a TOML engine config"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the summary workflow over seeded in-memory records")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .default_value(DEFAULT_CONFIG)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a TOML engine config"),
                )
                .arg(
                    Arg::new("items")
                        .long("items")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Records seeded per individual type"),
                )
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the final store snapshot to this file"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Summarize a store snapshot")
                .arg(
                    Arg::new("snapshot")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to a snapshot written by `simulate --snapshot`"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));

    match matches.subcommand() {
        Some(("validate", args)) => validate(args),
        Some(("simulate", args)) => simulate(args).await,
        Some(("inspect", args)) => inspect(args).await,
        Some((other, _)) => anyhow::bail!("unknown command `{other}`"),
        None => anyhow::bail!("no command given"),
    }
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("missing argument `{name}`"))
}

fn validate(args: &ArgMatches) -> Result<()> {
    let path = path_arg(args, "config")?;
    let config = EngineConfig::from_path(path)
        .with_context(|| format!("invalid config {}", path.display()))?;

    println!("{}: ok", path.display());
    println!("  types: {}", config.hierarchy.len());
    for name in config.hierarchy.dependency_order() {
        if let Some(ty) = config.hierarchy.get(name) {
            println!(
                "  {name:<20} {:<10} ttl={}h category={} depends_on=[{}]",
                ty.level.as_str(),
                ty.ttl_hours,
                ty.category,
                ty.depends_on.join(", ")
            );
        }
    }
    println!(
        "  retry: {} attempts, timeout {}s, single_flight={}",
        config.retry.max_attempts, config.generation_timeout_secs, config.single_flight
    );
    Ok(())
}

async fn simulate(args: &ArgMatches) -> Result<()> {
    let path = path_arg(args, "config")?;
    let config = EngineConfig::from_path(path)
        .with_context(|| format!("invalid config {}", path.display()))?;
    let options = SimulateOptions {
        items: args.get_one::<usize>("items").copied().unwrap_or(5),
        snapshot: args.get_one::<PathBuf>("snapshot").cloned(),
    };

    let report = simulate::run(config, &options).await?;
    for event in &report.events {
        println!("{event}");
    }
    println!("{}", serde_json::json!({ "event": "stats", "engine": report.stats }));
    if let Some(snapshot) = &options.snapshot {
        tracing::info!(path = %snapshot.display(), rows = report.store.rows, "snapshot written");
    }
    Ok(())
}

async fn inspect(args: &ArgMatches) -> Result<()> {
    let path = path_arg(args, "snapshot")?;
    let store = InMemorySummaryStore::load(path)
        .await
        .with_context(|| format!("cannot load snapshot {}", path.display()))?;

    // summary_type -> (valid, invalid)
    let mut by_type: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for row in store.rows() {
        let entry = by_type.entry(row.summary_type().to_owned()).or_default();
        if row.is_valid {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let stats = store.stats();
    println!("{}", path.display());
    println!("  rows: {} ({} valid)", stats.rows, stats.valid_rows);
    println!("  edges: {}", stats.edges);
    for (summary_type, (valid, invalid)) in by_type {
        println!("  {summary_type:<20} valid={valid} invalid={invalid}");
    }
    Ok(())
}
