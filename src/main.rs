//! lhplan - plan liquid-handling protocols from the command line
//!
//! Reads a scenario (deck plus requests) as JSON, plans it and prints the resulting
//! instruction list. With `--execute` the plan is also run against the in-memory
//! simulator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liquid_planner::config::PlannerConfig;
use liquid_planner::policy::RuleDocument;
use liquid_planner::{logging, LiquidHandler, Plan, RecordingDriver, RuleSet, Scenario};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lhplan")]
#[command(about = "Execution planner for liquid-handling robots", long_about = None)]
#[command(version)]
struct Cli {
    /// Planner configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the plan as JSON instead of one instruction per line
    #[arg(long, global = true)]
    json: bool,

    /// Run the plan against the simulated robot
    #[arg(long, global = true)]
    execute: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a scenario file
    Plan {
        /// Scenario file (JSON) with `deck` and `requests`
        #[arg(short, long)]
        scenario: PathBuf,

        /// Extra liquid-class rules (YAML) layered over the built-in ones
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Plan the built-in demonstration scenario
    Demo,

    /// Print the effective configuration as TOML
    Config,
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    let Some(path) = path else {
        return Ok(RuleSet::with_defaults());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules from {}", path.display()))?;
    let rules = RuleDocument::from_yaml_str(&text)?.into_rule_set()?;
    Ok(rules)
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario from {}", path.display()))?;
    let scenario = serde_json::from_str(&text)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    Ok(scenario)
}

fn print_plan(plan: &Plan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }
    for (index, instruction) in plan.instructions.iter().enumerate() {
        println!("{index:4}  {instruction}");
    }
    let s = &plan.summary;
    println!(
        "\n{} instructions, {} aspirates, {} dispenses, {} tips, {} moved",
        s.instructions, s.aspirates, s.dispenses, s.tips_used, s.volume_moved
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PlannerConfig::load_from(path)?,
        None => PlannerConfig::load()?,
    };
    logging::init(&config.logging);

    let (scenario, rules) = match &cli.command {
        Commands::Plan { scenario, rules } => (load_scenario(scenario)?, load_rules(rules.as_deref())?),
        Commands::Demo => (Scenario::demo()?, RuleSet::with_defaults()),
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
    };

    let handler = LiquidHandler::new(scenario.deck, rules, config.planner);
    let plan = handler
        .plan_requests(scenario.requests)
        .context("planning failed")?;
    print_plan(&plan, cli.json)?;

    if cli.execute {
        let mut driver = RecordingDriver::new();
        let executed = handler.execute(&plan, &mut driver)?;
        tracing::info!("simulated robot ran {} instruction(s)", executed);
        for message in &driver.messages {
            println!("operator: {message}");
        }
    }
    Ok(())
}
