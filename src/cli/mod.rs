//! SP-009: CLI subcommands — init, validate, graph, plan, emit, status, schema.

use crate::core::config::DeployConfig;
use crate::core::emitter::expression_nodes;
use crate::core::error::{Error, Result};
use crate::core::graph::DependencyGraph;
use crate::core::types::{ChangeSet, PlanAction};
use crate::core::{parser, planner, state};
use crate::stacks;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_STACK_FILE: &str = "stack.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "stackplan",
    version,
    about = "Declarative infrastructure stacks — dependency-ordered graphs, deterministic plans, resolved outputs"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the stack comes from and how it is configured.
#[derive(Args, Debug, Clone, Default)]
pub struct StackArgs {
    /// Path to a stack file (default: stack.yaml)
    #[arg(short, long, conflicts_with = "builtin")]
    pub file: Option<PathBuf>,

    /// Use a built-in stack (workshop)
    #[arg(long)]
    pub builtin: Option<String>,

    /// Deployment config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Environment identifier (overrides the config file)
    #[arg(long)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    #[default]
    Yaml,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a stack and check that it orders
    Validate {
        #[command(flatten)]
        stack: StackArgs,
    },

    /// Print the dependency order and edges
    Graph {
        #[command(flatten)]
        stack: StackArgs,

        /// Emit Graphviz DOT instead of text
        #[arg(long)]
        dot: bool,
    },

    /// Show changes against the last emitted plan
    Plan {
        #[command(flatten)]
        stack: StackArgs,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Emit the deployment plan
    Emit {
        #[command(flatten)]
        stack: StackArgs,

        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Plan format
        #[arg(long, value_enum, default_value_t = PlanFormat::Yaml)]
        format: PlanFormat,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Do not record the plan in the lock file
        #[arg(long)]
        no_lock: bool,
    },

    /// Show recorded plans from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific unit
        #[arg(short, long)]
        unit: Option<String>,
    },

    /// Print the JSON schema of the stack file format
    Schema,

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { stack } => cmd_validate(&stack),
        Commands::Graph { stack, dot } => cmd_graph(&stack, dot),
        Commands::Plan { stack, state_dir } => cmd_plan(&stack, &state_dir),
        Commands::Emit {
            stack,
            output,
            format,
            state_dir,
            no_lock,
        } => cmd_emit(&stack, output.as_deref(), format, &state_dir, no_lock),
        Commands::Status { state_dir, unit } => cmd_status(&state_dir, unit.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completion { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "stackplan",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

fn load_config(args: &StackArgs) -> Result<DeployConfig> {
    let config = match &args.config {
        Some(path) => DeployConfig::load(path)?,
        None => DeployConfig::default(),
    };
    let config = config.with_identifier(args.identifier.clone());
    config.validate()?;
    Ok(config)
}

/// Parse and validate a stack file, printing every validation error.
fn parse_and_validate(file: &Path) -> Result<parser::StackFile> {
    let stack = parser::parse_stack_file(file)?;
    let errors = parser::validate_stack(&stack);
    if errors.is_empty() {
        return Ok(stack);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Validation(errors.len()))
}

/// Declare the requested stack as a graph in the Building phase.
fn load_graph(args: &StackArgs) -> Result<DependencyGraph> {
    let config = load_config(args)?;
    if let Some(name) = &args.builtin {
        return stacks::builtin(name, &config);
    }
    let file = args
        .file
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_STACK_FILE));
    let stack = parse_and_validate(file)?;
    parser::build_graph(&stack, &config)
}

// ============================================================================
// Commands
// ============================================================================

const STACK_TEMPLATE: &str = r#"version: "1.0"
name: my-stack
description: "Managed by stackplan"

resources:
  vpc:
    type: network
    attributes:
      cidr: 10.0.0.0/16
      max_azs: 2

  web-sg:
    type: security_group
    attributes:
      network: { ref: vpc, attr: id }
      ingress:
        - { protocol: tcp, port: 80, source: 0.0.0.0/0 }

outputs:
  VpcId:
    source: vpc
    value: id
    description: VPC ID
"#;

const CONFIG_TEMPLATE: &str = r#"identifier: dev
groups: {}
params: {}
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let stack_path = path.join(DEFAULT_STACK_FILE);
    if stack_path.exists() {
        return Err(Error::Usage(format!(
            "{} already exists",
            stack_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| Error::io(&state_dir, e))?;
    std::fs::write(&stack_path, STACK_TEMPLATE).map_err(|e| Error::io(&stack_path, e))?;

    let config_path = path.join("deploy.yaml");
    if !config_path.exists() {
        std::fs::write(&config_path, CONFIG_TEMPLATE).map_err(|e| Error::io(&config_path, e))?;
    }

    println!("Initialized stackplan project at {}", path.display());
    println!("  Created: {}", stack_path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(args: &StackArgs) -> Result<()> {
    let mut graph = load_graph(args)?;
    let resources = graph.len();
    graph.order()?;
    println!(
        "OK: {} ({} resources, {} references, {} outputs)",
        graph.name(),
        resources,
        graph.references().len(),
        graph.outputs().count()
    );
    Ok(())
}

fn cmd_graph(args: &StackArgs, dot: bool) -> Result<()> {
    let mut graph = load_graph(args)?;
    graph.order()?;
    if dot {
        print!("{}", render_dot(&graph));
    } else {
        print!("{}", render_order(&graph));
    }
    Ok(())
}

/// Numbered execution order with dependencies and output anchors.
fn render_order(graph: &DependencyGraph) -> String {
    let mut out = format!("Graph: {} ({} resources)\n\n", graph.name(), graph.len());
    for (i, id) in graph.execution_order().iter().enumerate() {
        let kind = graph.node(id).map(|n| n.kind().to_string()).unwrap_or_default();
        out.push_str(&format!("{:>3}. {} [{}]\n", i + 1, id, kind));
        if let Some(deps) = graph.dependencies(id).filter(|d| !d.is_empty()) {
            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            out.push_str(&format!("       after: {}\n", deps.join(", ")));
        }
    }

    if graph.outputs().next().is_some() {
        out.push_str("\nOutputs:\n");
        for output in graph.outputs() {
            let mut nodes = expression_nodes(output);
            nodes.dedup();
            out.push_str(&format!("  {} <- {}\n", output.name, nodes.join(", ")));
        }
    }
    out
}

/// Graphviz DOT with edges pointing from referrer to referenced node.
fn render_dot(graph: &DependencyGraph) -> String {
    let mut out = format!("digraph \"{}\" {{\n  rankdir=LR;\n", graph.name());
    for id in graph.execution_order() {
        let kind = graph.node(id).map(|n| n.kind().to_string()).unwrap_or_default();
        out.push_str(&format!("  \"{}\" [label=\"{}\\n{}\"];\n", id, id, kind));
    }
    for id in graph.execution_order() {
        for dep in graph.dependencies(id).into_iter().flatten() {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", id, dep));
        }
    }
    out.push_str("}\n");
    out
}

fn cmd_plan(args: &StackArgs, state_dir: &Path) -> Result<()> {
    let mut graph = load_graph(args)?;
    let plan = graph.emit()?;
    let lock = state::load_lock(state_dir, &plan.name)?;
    let changes = planner::diff(plan, lock.as_ref());
    print!("{}", render_changes(&changes));
    Ok(())
}

/// Render a change set for the terminal.
fn render_changes(changes: &ChangeSet) -> String {
    let mut out = format!(
        "Planning: {} ({} resources)\n\n",
        changes.unit,
        changes.changes.len()
    );
    for change in &changes.changes {
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::Destroy => "-",
            PlanAction::NoOp => " ",
        };
        out.push_str(&format!("  {} {}\n", symbol, change.description));
    }
    out.push_str(&format!(
        "\nPlan: {} to add, {} to change, {} to destroy, {} unchanged.\n",
        changes.to_create, changes.to_update, changes.to_destroy, changes.unchanged
    ));
    out
}

fn cmd_emit(
    args: &StackArgs,
    output: Option<&Path>,
    format: PlanFormat,
    state_dir: &Path,
    no_lock: bool,
) -> Result<()> {
    let mut graph = load_graph(args)?;
    let plan = graph.emit()?;

    let mut rendered = match format {
        PlanFormat::Yaml => plan.to_yaml()?,
        PlanFormat::Json => plan.to_json()?,
    };
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }

    match output {
        Some(path) => {
            state::write_atomic(path, &rendered)?;
            info!(unit = %plan.name, path = %path.display(), "plan written");
        }
        None => print!("{}", rendered),
    }

    if !no_lock {
        let path = state::save_lock(state_dir, &state::lock_from_plan(plan))?;
        info!(unit = %plan.name, lock = %path.display(), "lock recorded");
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, unit_filter: Option<&str>) -> Result<()> {
    let mut found = false;

    if state_dir.is_dir() {
        let entries = std::fs::read_dir(state_dir).map_err(|e| Error::io(state_dir, e))?;
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();

        for name in names {
            if unit_filter.is_some_and(|f| f != name) {
                continue;
            }
            if let Some(lock) = state::load_lock(state_dir, &name)? {
                found = true;
                println!("Unit: {}", lock.unit);
                println!("  Generated:   {}", lock.generated_at);
                println!("  Generator:   {}", lock.generator);
                println!("  Fingerprint: {}", lock.fingerprint);
                println!("  Resources:   {}", lock.resources.len());
                for (id, rl) in &lock.resources {
                    println!("    {:>3}. {} [{}] {}", rl.position + 1, id, rl.kind, rl.hash);
                }
                if !lock.outputs.is_empty() {
                    println!("  Outputs:");
                    for (name, value) in &lock.outputs {
                        println!("    {} = {}", name, value);
                    }
                }
                println!();
            }
        }
    }

    if !found {
        println!("No state found. Run `stackplan emit` first.");
    }
    Ok(())
}

fn cmd_schema() -> Result<()> {
    let schema = serde_json::to_string_pretty(&parser::stack_schema())?;
    println!("{}", schema);
    Ok(())
}
