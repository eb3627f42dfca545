use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tern_vm_core::{EngineConfig, TierConfig};
use tracing_subscriber::filter::EnvFilter;

mod scenarios;

use scenarios::{Scenario, ScenarioReport};

#[derive(Parser)]
#[command(name = "tern", version, about = "Tern VM tier-up harness")]
struct Cli {
    #[command(flatten)]
    tier: TierArgs,

    /// Log compile requests, OSR entries and deopts
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TierArgs {
    /// Calls before a function is compiled by the optimizing tier
    #[arg(long, global = true)]
    hot_threshold: Option<u32>,

    /// Loop iterations before a running activation is moved by OSR
    #[arg(long, global = true)]
    back_edge_threshold: Option<u32>,

    /// Compile on the calling thread instead of the background worker
    #[arg(long, global = true)]
    synchronous: bool,
}

impl TierArgs {
    /// Tier policy from `TERN_*` variables, overridden by flags
    fn config(&self) -> EngineConfig {
        let mut tier = TierConfig::from_env();
        if let Some(threshold) = self.hot_threshold {
            tier = tier.with_hot_call_threshold(threshold);
        }
        if let Some(threshold) = self.back_edge_threshold {
            tier = tier.with_back_edge_threshold(threshold);
        }
        if self.synchronous {
            tier = tier.synchronous();
        }
        EngineConfig::default().with_tier(tier)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one built-in scenario and print its results
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
    },
    /// Run every scenario and print engine statistics
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = cli.tier.config();
    tracing::debug!(?config, "engine configuration");

    match cli.command {
        Commands::Scenario { name } => {
            let report = scenarios::run(name, config)?;
            print_report(&report);
        }
        Commands::Stats { json } => {
            let reports = Scenario::ALL
                .iter()
                .map(|scenario| scenarios::run(*scenario, config.clone()))
                .collect::<Result<Vec<_>>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    print_stats(report);
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!("{}", report.scenario);
    for outcome in &report.outcomes {
        println!("  {:<32} {}", outcome.label, outcome.value);
    }
    print_stats(report);
}

fn print_stats(report: &ScenarioReport) {
    let tier = &report.stats.tier;
    let shapes = &report.stats.shapes;
    println!("[{}]", report.scenario);
    println!(
        "  tier: {} compiles ({} failed, {} discarded), {} optimized entries, {} OSR entries",
        tier.compiles_succeeded, tier.compile_errors, tier.compiles_discarded, tier.optimized_entries, tier.osr_entries
    );
    println!(
        "  deopts: {}, pessimized sites: {}, pinned: {}, ineligible: {}",
        tier.deopts, tier.pessimized_sites, tier.pinned_functions, tier.ineligible_functions
    );
    println!(
        "  shapes: {} ({} dictionary, {} transitions), objects: {}, megamorphic hits/misses: {}/{}",
        shapes.shapes,
        shapes.dictionary_shapes,
        shapes.transitions,
        report.stats.objects,
        report.stats.megamorphic.hits,
        report.stats.megamorphic.misses
    );
}
