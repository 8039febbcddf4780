use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use guidepost_registry::{EngineConfig, RankedWalkthrough, WalkthroughEngine, WalkthroughRegistry, default_services, load_catalog_file};
use guidepost_types::{ResolvedWalkthrough, StepStatus};
use guidepost_util::{ContextSnapshot, InMemoryContextService};
use serde_json::Value;
use tracing::{Level, error, info};

/// Inspect and drive walkthrough progress from the command line.
#[derive(Parser, Debug)]
#[command(name = "guidepost", version, about)]
struct Args {
    /// Engine configuration file (defaults to GUIDEPOST_CONFIG_PATH or the config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file holding progress and metadata
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Extra walkthrough catalog (YAML or JSON); may be repeated
    #[arg(long = "catalog", global = true)]
    catalogs: Vec<PathBuf>,

    /// Context key for `when` evaluation, as `key` or `key=value`; may be repeated
    #[arg(long = "context", global = true)]
    context: Vec<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List visible walkthroughs
    List,
    /// Show one walkthrough and its steps
    Show { id: String },
    /// Open a walkthrough, clearing its "new" badges
    Open { id: String },
    /// Mark a step complete
    Complete { step: String },
    /// Mark a step incomplete
    Incomplete { step: String },
    /// Deliver a completion event such as `onCommand:foo`
    Fire { event: String },
    /// Hide a walkthrough from ranked lists
    Hide { id: String },
    /// Show a previously hidden walkthrough again
    Unhide { id: String },
    /// Forget all progress, metadata and hidden walkthroughs
    Reset,
    /// Rank visible walkthroughs
    Rank {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    if let Some(state) = &args.state {
        config.state_file = Some(state.clone());
    }

    let context = Arc::new(InMemoryContextService::with_values(parse_context(&args.context)?));
    let services = default_services(&config)?.with_context(context);
    let engine = WalkthroughEngine::init(config, services).await?;

    for path in &args.catalogs {
        let descriptors = load_catalog_file(path)?;
        for descriptor in descriptors {
            let id = descriptor.id.clone();
            if let Err(error) = engine.registry().register_walkthrough(descriptor).await {
                error!(catalog = %path.display(), walkthrough = %id, error = %error, "Failed to register walkthrough");
            }
        }
    }

    let result = run_command(engine.registry(), &args);
    engine.dispose();
    result
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(registry: &WalkthroughRegistry, args: &Args) -> Result<()> {
    match &args.command {
        Command::List => {
            let walkthroughs = registry.get_walkthroughs();
            if args.json {
                return print_json(&walkthroughs);
            }
            for walkthrough in &walkthroughs {
                println!("{}", summary_line(walkthrough));
            }
        }
        Command::Show { id } => {
            let walkthrough = registry.get_walkthrough(id)?;
            if args.json {
                return print_json(&walkthrough);
            }
            print_walkthrough(&walkthrough);
        }
        Command::Open { id } => {
            let walkthrough = registry.open_walkthrough(id)?;
            if args.json {
                return print_json(&walkthrough);
            }
            print_walkthrough(&walkthrough);
        }
        Command::Complete { step } => {
            registry.progress_step(step)?;
            info!(step = %step, "Step marked complete");
        }
        Command::Incomplete { step } => {
            registry.deprogress_step(step)?;
            info!(step = %step, "Step marked incomplete");
        }
        Command::Fire { event } => {
            let progressed = registry.progress_by_event(event);
            if args.json {
                return print_json(&progressed);
            }
            if progressed.is_empty() {
                println!("no steps completed");
            }
            for step in progressed {
                println!("completed {step}");
            }
        }
        Command::Hide { id } => {
            registry.hide_walkthrough(id)?;
        }
        Command::Unhide { id } => {
            if !registry.unhide_walkthrough(id) {
                println!("{id} was not hidden");
            }
        }
        Command::Reset => registry.reset_all_progress(),
        Command::Rank { limit } => {
            let ranked = registry.ranked_walkthroughs(*limit);
            if args.json {
                return print_json(&ranked);
            }
            for RankedWalkthrough { rank, walkthrough } in &ranked {
                println!("{rank:>6.2}  {}", summary_line(walkthrough));
            }
        }
    }
    Ok(())
}

fn summary_line(walkthrough: &ResolvedWalkthrough) -> String {
    let mut badges = Vec::new();
    if walkthrough.is_featured {
        badges.push("featured");
    }
    if walkthrough.new_entry {
        badges.push("new");
    } else if walkthrough.new_items {
        badges.push("updated");
    }
    let badges = if badges.is_empty() { String::new() } else { format!(" [{}]", badges.join(", ")) };
    format!(
        "{:<32} {:>2}/{:<2} {}{}",
        walkthrough.id, walkthrough.steps_complete, walkthrough.steps_total, walkthrough.title, badges
    )
}

fn print_walkthrough(walkthrough: &ResolvedWalkthrough) {
    println!("{}", summary_line(walkthrough));
    if !walkthrough.description.is_empty() {
        println!("  {}", walkthrough.description);
    }
    for step in &walkthrough.steps {
        let marker = match step.status() {
            StepStatus::Done => "[x]",
            StepStatus::Pending => "[ ]",
            StepStatus::Inactive => "[-]",
        };
        println!("  {marker} {:<40} {}", step.step.id, step.step.title);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_context(entries: &[String]) -> Result<ContextSnapshot> {
    let mut snapshot = ContextSnapshot::new();
    for entry in entries {
        let (key, value) = match entry.split_once('=') {
            Some((key, raw)) => (key.trim(), serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
            None => (entry.trim(), Value::Bool(true)),
        };
        if key.is_empty() {
            bail!("context entry '{entry}' has no key");
        }
        snapshot.set(key, value);
    }
    Ok(snapshot)
}
