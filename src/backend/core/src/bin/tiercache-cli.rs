//! tiercache CLI - inspect and maintain the cache instances
//!
//! Builds the registry from the same settings as the service, so commands
//! see the configured backend and the persisted local records.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};
use tiercache_core::cache::{CacheInstance, CacheRegistry, CacheReport, Endpoint};
use tiercache_core::config::Settings;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "tiercache",
    version,
    about = "Inspect and maintain tiercache instances",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping the backend from every instance
    Health,

    /// Show per-instance entries and tuning recommendations
    ///
    /// Hit, miss and latency counters are kept in memory by each process,
    /// so here they only cover lookups made by this CLI invocation.
    Stats,

    /// Delete keys matching a regular expression
    Invalidate {
        /// Instance to invalidate; all instances when omitted
        #[arg(short, long)]
        instance: Option<InstanceArg>,

        /// Regular expression matched against keys
        pattern: String,
    },

    /// Empty instances in both tiers, including persisted records
    Clear {
        /// Instance to clear; all instances when omitted
        #[arg(short, long)]
        instance: Option<InstanceArg>,
    },

    /// Print the cache key of an endpoint request
    Key {
        /// Endpoint the request targets
        endpoint: EndpointArg,

        /// Request parameters as name=value
        #[arg(value_name = "NAME=VALUE")]
        params: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum InstanceArg {
    Pricing,
    Device,
    Api,
}

impl From<InstanceArg> for CacheInstance {
    fn from(arg: InstanceArg) -> Self {
        match arg {
            InstanceArg::Pricing => CacheInstance::Pricing,
            InstanceArg::Device => CacheInstance::Device,
            InstanceArg::Api => CacheInstance::Api,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum EndpointArg {
    DevicesBrands,
    DevicesModels,
    PricingCalculate,
    ServiceAreas,
    PricingServices,
}

impl From<EndpointArg> for Endpoint {
    fn from(arg: EndpointArg) -> Self {
        match arg {
            EndpointArg::DevicesBrands => Endpoint::DevicesBrands,
            EndpointArg::DevicesModels => Endpoint::DevicesModels,
            EndpointArg::PricingCalculate => Endpoint::PricingCalculate,
            EndpointArg::ServiceAreas => Endpoint::ServiceAreas,
            EndpointArg::PricingServices => Endpoint::PricingServices,
        }
    }
}

fn instances(arg: Option<InstanceArg>) -> Vec<CacheInstance> {
    match arg {
        Some(arg) => vec![arg.into()],
        None => CacheInstance::ALL.to_vec(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Data Types for Output
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Tabled)]
struct HealthRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    consecutive_failures: u32,
    #[tabled(rename = "Last Check")]
    last_check: String,
}

#[derive(Debug, Serialize, Tabled)]
struct StatsRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Entries")]
    entries: String,
    #[tabled(rename = "Hits")]
    hits: u64,
    #[tabled(rename = "Misses")]
    misses: u64,
    #[tabled(rename = "Hit Rate")]
    hit_rate: String,
    #[tabled(rename = "Evictions")]
    evictions: u64,
    #[tabled(rename = "Avg (ms)")]
    average_response_time_ms: String,
}

#[derive(Debug, Serialize, Tabled)]
struct CountRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Removed")]
    removed: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color || matches!(format, OutputFormat::Json) {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    fn print_success(&self, message: &str) {
        if self.is_json() {
            println!("{}", serde_json::json!({"status": "success", "message": message}));
        } else {
            println!("{} {}", "[OK]".green().bold(), message);
        }
    }

    fn print_error(&self, message: &str) {
        if self.is_json() {
            eprintln!("{}", serde_json::json!({"status": "error", "message": message}));
        } else {
            eprintln!("{} {}", "[ERROR]".red().bold(), message);
        }
    }

    fn print_warning(&self, message: &str) {
        if self.is_json() {
            println!("{}", serde_json::json!({"status": "warning", "message": message}));
        } else {
            println!("{} {}", "[WARN]".yellow().bold(), message);
        }
    }

    fn print_table<T: Tabled + Serialize>(&self, items: &[T]) -> Result<()> {
        if self.is_json() {
            return self.print_json(&items);
        }
        if items.is_empty() {
            println!("{}", "No results found.".dimmed());
            return Ok(());
        }
        let table = Table::new(items)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string();
        println!("{}", table);
        Ok(())
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        println!("{}", json);
        Ok(())
    }

    fn print_header(&self, title: &str) {
        if !self.is_json() {
            println!();
            println!("{}", title.bold().underline());
            println!();
        }
    }

    fn print_key_value(&self, key: &str, value: &str) {
        if !self.is_json() {
            println!("  {}: {}", key.cyan(), value);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

fn load_settings(path: Option<&str>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Settings::load().context("loading configuration")?,
    };
    Ok(settings)
}

async fn handle_health_command(settings: &Settings, output: &OutputHelper) -> Result<()> {
    let registry = CacheRegistry::from_settings(settings).await?;
    let snapshots = registry.check_health().await;
    registry.shutdown();

    let rows: Vec<HealthRow> = snapshots
        .iter()
        .map(|(instance, snapshot)| HealthRow {
            instance: instance.to_string(),
            status: if snapshot.is_healthy {
                "healthy".green().to_string()
            } else {
                "unhealthy".red().to_string()
            },
            consecutive_failures: snapshot.consecutive_failures,
            last_check: snapshot
                .last_check
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();

    output.print_header("Backend Health");
    output.print_key_value("Backend", &format!("{:?}", settings.backend.kind));
    output.print_table(&rows)?;

    if snapshots.iter().any(|(_, snapshot)| !snapshot.is_healthy) {
        output.print_warning("Unhealthy instances are serving from their local tier");
    }
    Ok(())
}

async fn handle_stats_command(settings: &Settings, output: &OutputHelper) -> Result<()> {
    let registry = CacheRegistry::from_settings(settings).await?;
    let report = registry.report();
    registry.shutdown();

    if output.is_json() {
        let recommendations = report.recommendations();
        return output.print_json(&serde_json::json!({
            "report": report,
            "recommendations": recommendations,
        }));
    }

    print_report(&report, output)
}

fn print_report(report: &CacheReport, output: &OutputHelper) -> Result<()> {
    let rows: Vec<StatsRow> = report
        .instances
        .iter()
        .map(|r| StatsRow {
            instance: r.instance.to_string(),
            entries: format!("{}/{}", r.stats.entries, r.max_size),
            hits: r.stats.hits,
            misses: r.stats.misses,
            hit_rate: format!("{:.2}%", r.stats.hit_rate),
            evictions: r.stats.evictions,
            average_response_time_ms: format!("{:.2}", r.stats.average_response_time_ms),
        })
        .collect();

    output.print_header("Cache Statistics");
    output.print_table(&rows)?;
    println!();
    output.print_key_value("Overall hit rate", &format!("{:.2}%", report.overall_hit_rate));
    output.print_key_value(
        "Average response time",
        &format!("{:.2} ms", report.average_response_time_ms),
    );
    output.print_key_value("Counters", "lookups made by this invocation only");

    let recommendations = report.recommendations();
    if !recommendations.is_empty() {
        output.print_header("Recommendations");
        for recommendation in recommendations {
            output.print_warning(&recommendation);
        }
    }
    Ok(())
}

async fn handle_invalidate_command(
    settings: &Settings,
    instance: Option<InstanceArg>,
    pattern: &str,
    output: &OutputHelper,
) -> Result<()> {
    let pattern = regex::Regex::new(pattern).with_context(|| format!("invalid pattern {:?}", pattern))?;
    let registry = CacheRegistry::from_settings(settings).await?;

    let mut rows = Vec::new();
    for instance in instances(instance) {
        let removed = registry.get(instance).invalidate_by_pattern(&pattern).await;
        rows.push(CountRow {
            instance: instance.to_string(),
            removed,
        });
    }
    registry.shutdown();

    output.print_table(&rows)?;
    let total: usize = rows.iter().map(|r| r.removed).sum();
    output.print_success(&format!("Invalidated {} keys", total));
    Ok(())
}

async fn handle_clear_command(
    settings: &Settings,
    instance: Option<InstanceArg>,
    output: &OutputHelper,
) -> Result<()> {
    let registry = CacheRegistry::from_settings(settings).await?;

    let mut rows = Vec::new();
    for instance in instances(instance) {
        let removed = registry.get(instance).clear().await;
        rows.push(CountRow {
            instance: instance.to_string(),
            removed,
        });
    }
    registry.shutdown();

    output.print_table(&rows)?;
    output.print_success("Instances cleared in both tiers");
    Ok(())
}

fn handle_key_command(endpoint: EndpointArg, params: &[String], output: &OutputHelper) -> Result<()> {
    let endpoint = Endpoint::from(endpoint);
    let mut key = endpoint.key();
    for param in params {
        let (name, value) = param
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got {:?}", param))?;
        key = key.param(name, value);
    }
    let key = key.build();

    if output.is_json() {
        return output.print_json(&serde_json::json!({
            "endpoint": endpoint.to_string(),
            "instance": endpoint.instance(),
            "key": key,
            "ttlSeconds": endpoint.default_ttl().as_secs(),
        }));
    }

    output.print_key_value("Instance", &endpoint.instance().to_string());
    output.print_key_value("TTL", &format!("{}s", endpoint.default_ttl().as_secs()));
    println!("{}", key);
    Ok(())
}

fn handle_config_command(settings: &Settings, output: &OutputHelper) -> Result<()> {
    output.print_json(settings)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Entry Point
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    let result = match load_settings(cli.config.as_deref()) {
        Ok(settings) => match cli.command {
            Commands::Health => handle_health_command(&settings, &output).await,
            Commands::Stats => handle_stats_command(&settings, &output).await,
            Commands::Invalidate { instance, pattern } => {
                handle_invalidate_command(&settings, instance, &pattern, &output).await
            }
            Commands::Clear { instance } => handle_clear_command(&settings, instance, &output).await,
            Commands::Key { endpoint, params } => handle_key_command(endpoint, &params, &output),
            Commands::Config => handle_config_command(&settings, &output),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output.print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
