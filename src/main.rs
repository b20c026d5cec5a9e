use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::{AppConfig, State, StdoutConsole};
use weft_engine::{archive, Flowchart, NodeRecord, NodeRegistry, RunReport, RunStatus};
use weft_nodes::{builtin_registry, Services};

#[derive(Parser)]
#[command(name = "weft", version, about = "Build and run LLM flowcharts")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty flowchart archive holding Init and Start
    New {
        archive: PathBuf,
        /// Overwrite an existing archive
        #[arg(long)]
        force: bool,
    },
    /// Run a flowchart from its Start node
    Run {
        archive: PathBuf,
        /// Initial working result
        #[arg(short, long)]
        input: Option<String>,
        /// Resume from a state file written by --save-state
        #[arg(long)]
        state: Option<PathBuf>,
        /// Write the final state as JSON
        #[arg(long)]
        save_state: Option<PathBuf>,
        /// Run the Init node before the main loop
        #[arg(long)]
        init: bool,
    },
    /// Run only the Init node
    Init {
        archive: PathBuf,
        /// Write the resulting state as JSON
        #[arg(long)]
        save_state: Option<PathBuf>,
    },
    /// Estimate the USD cost of one run without executing anything
    Cost {
        archive: PathBuf,
        /// Working result used for estimation
        #[arg(short, long)]
        input: Option<String>,
    },
    /// List nodes, connectors and editable texts
    Show { archive: PathBuf },
    /// Print the flowchart as a Mermaid diagram
    Mermaid { archive: PathBuf },
    /// List registered node kinds
    Kinds,
    /// Add a node to an archive
    Add {
        archive: PathBuf,
        kind: String,
        label: String,
        /// Option as key=value. Values that parse as JSON are stored typed.
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Connect two nodes by label
    Connect {
        archive: PathBuf,
        from: String,
        to: String,
        /// Gate the connector on an expression
        #[arg(long = "if")]
        condition: Option<String>,
        /// Connector label (defaults to the condition text)
        #[arg(long)]
        label: Option<String>,
    },
    /// Replace the text of a prompt, function, assertion or condition
    Edit {
        archive: PathBuf,
        label: String,
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config comes first so its log filter applies
    let config_found = cli.config.exists();
    let config = if config_found {
        AppConfig::load(&cli.config)?
    } else {
        AppConfig::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .init();

    if !config_found {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let services = Arc::new(Services::new(config.clone()));
    let registry = Arc::new(builtin_registry(services));

    match cli.command {
        Commands::New { archive: path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let mut chart = Flowchart::new(registry)?;
            archive::save(&mut chart, &path)?;
            println!("Created {}", path.display());
        }
        Commands::Run {
            archive: path,
            input,
            state,
            save_state,
            init,
        } => {
            let mut chart = open(&registry, &path, &config)?;
            let mut state = match state {
                Some(file) => read_state(&file)?,
                None => State::new(),
            };
            if let Some(input) = input {
                state.result = input;
            }

            if init {
                let report = chart.initialize(state, &StdoutConsole).await?;
                state = finish(report, None)?;
            }
            let report = chart.run(state, &StdoutConsole).await?;
            finish(report, save_state.as_deref())?;
        }
        Commands::Init { archive: path, save_state } => {
            let mut chart = open(&registry, &path, &config)?;
            let report = chart.initialize(State::new(), &StdoutConsole).await?;
            finish(report, save_state.as_deref())?;
        }
        Commands::Cost { archive: path, input } => {
            let chart = open(&registry, &path, &config)?;
            let mut state = State::with_result(input.unwrap_or_default());
            let cost = chart.cost(&mut state)?;
            println!("Estimated cost: ${cost:.6}");
        }
        Commands::Show { archive: path } => {
            let chart = open(&registry, &path, &config)?;
            print_summary(&chart);
        }
        Commands::Mermaid { archive: path } => {
            let chart = open(&registry, &path, &config)?;
            print!("{}", chart.to_mermaid());
        }
        Commands::Kinds => {
            let mut kinds = registry.kinds();
            kinds.sort_unstable();
            for kind in kinds {
                let assets = registry.asset_fields(kind);
                if assets.is_empty() {
                    println!("{kind}");
                } else {
                    println!("{kind}  (assets: {})", assets.join(", "));
                }
            }
        }
        Commands::Add {
            archive: path,
            kind,
            label,
            fields,
        } => {
            let mut chart = open(&registry, &path, &config)?;
            let record = parse_fields(NodeRecord::new(&kind, &label, 0.0, 0.0), &fields)?;
            let node = registry.deserialize(&record)?;
            let id = chart.add_node(node)?;
            archive::save(&mut chart, &path)?;
            println!("Added {kind} `{label}` ({id})");
        }
        Commands::Connect {
            archive: path,
            from,
            to,
            condition,
            label,
        } => {
            let mut chart = open(&registry, &path, &config)?;
            let from_id = node_id(&chart, &from)?;
            let to_id = node_id(&chart, &to)?;
            let id = match condition {
                Some(cond) => {
                    let label = label.unwrap_or_else(|| cond.clone());
                    chart.connect_if(&from_id, &to_id, &label, &cond)?
                }
                None => chart.connect(&from_id, &to_id)?,
            };
            archive::save(&mut chart, &path)?;
            println!("Connected `{from}` -> `{to}` ({id})");
        }
        Commands::Edit {
            archive: path,
            label,
            text,
        } => {
            let mut chart = open(&registry, &path, &config)?;
            chart.edit_text(&label, &text)?;
            archive::save(&mut chart, &path)?;
            println!("Updated `{label}`");
        }
    }

    Ok(())
}

/// Load an archive, extracting assets into the configured working directory.
fn open(registry: &Arc<NodeRegistry>, path: &Path, config: &AppConfig) -> anyhow::Result<Flowchart> {
    let working_dir = config.working_dir();
    std::fs::create_dir_all(&working_dir)
        .with_context(|| format!("creating working dir {}", working_dir.display()))?;
    let chart = archive::load(registry.clone(), path, &working_dir)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(chart.with_max_steps(config.engine.max_steps))
}

fn read_state(path: &Path) -> anyhow::Result<State> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing state {}", path.display()))
}

/// Persist the state if asked, then turn a non-completed run into an error
/// so the process exits non-zero.
fn finish(report: RunReport, save_state: Option<&Path>) -> anyhow::Result<State> {
    if let Some(path) = save_state {
        std::fs::write(path, serde_json::to_string_pretty(&report.state)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "State saved");
    }
    match report.status {
        RunStatus::Completed => Ok(report.state),
        RunStatus::Stopped => bail!("run stopped after {} nodes", report.executed.len()),
        RunStatus::Errored {
            node,
            category,
            message,
        } => bail!("{category:?} error in `{node}`: {message}"),
    }
}

fn node_id(chart: &Flowchart, label: &str) -> anyhow::Result<weft_core::NodeId> {
    match chart.node_by_label(label) {
        Some(node) => Ok(node.id.clone()),
        None => bail!("no node labelled `{label}`"),
    }
}

/// Apply `key=value` pairs to a record. JSON values keep their type, anything
/// else is stored as a string.
fn parse_fields(mut record: NodeRecord, fields: &[String]) -> anyhow::Result<NodeRecord> {
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            bail!("field `{field}` is not key=value");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        record = record.with_field(key.trim(), value);
    }
    Ok(record)
}

fn print_summary(chart: &Flowchart) {
    println!("Nodes:");
    for node in chart.nodes() {
        println!("  {:<24} {:<28} {}", node.label, node.kind(), node.id);
    }
    println!("Connectors:");
    for conn in chart.connectors() {
        let from = chart.find_node(&conn.node1).map(|n| n.label.as_str()).unwrap_or("?");
        let to = chart.find_node(&conn.node2).map(|n| n.label.as_str()).unwrap_or("?");
        match conn.label() {
            Some(label) => println!("  {from} -> {to}  [{label}: {}]", conn.condition().text()),
            None => println!("  {from} -> {to}"),
        }
    }
    let mut texts = chart.text_labels();
    texts.sort_unstable();
    if !texts.is_empty() {
        println!("Texts:");
        for label in texts {
            if let Some(text) = chart.text_data(label) {
                println!("  {label}: {}", text.text());
            }
        }
    }
}
