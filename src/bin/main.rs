//! skein CLI - compile and run aggregate queries over a semantic model
//!
//! Usage:
//!   skein compile --model <file> --from <source> [--group-by <path>]... [--aggregate <expr>]...
//!   skein run --model <file> --from <source> [--group-by <path>]... [--aggregate <expr>]...
//!   skein graph --model <file>
//!
//! Examples:
//!   skein compile --model shop.toml --from orders -g customer.region -a "count()"
//!   skein run --model shop.toml --from alpha -g a_name -g gamma.total_rows
//!   skein graph --model shop.toml

use clap::{Args, Parser, Subcommand, ValueEnum};
use skein::config::Settings;
use skein::executor::MemoryAdapter;
use skein::model::{load_document, JoinGraph, ModelDocument};
use skein::planner::QueryRequest;
use skein::session::Session;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "skein - compile aggregate queries over cyclic semantic models")]
#[command(version)]
struct Cli {
    /// Path to a skein.toml settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query and print its plan
    Compile {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format
        #[arg(short, long, default_value = "explain")]
        format: PlanFormat,
    },

    /// Compile a query and run it over the model document's tables
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: RowFormat,
    },

    /// Print the join graph: edges, cycles and dangling joins
    Graph {
        /// Path to the model document (.toml or .json)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Path to the model document (.toml or .json)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Source the query starts from
    #[arg(long)]
    from: String,

    /// Grouping path, e.g. `customer.region`
    #[arg(short, long = "group-by")]
    group_by: Vec<String>,

    /// Aggregate, e.g. `count()`, `sum(amount)`, `n is count()`
    #[arg(short, long = "aggregate")]
    aggregate: Vec<String>,
}

impl QueryArgs {
    fn request(&self) -> Result<QueryRequest, String> {
        let group_by: Vec<&str> = self.group_by.iter().map(String::as_str).collect();
        let aggregates: Vec<&str> = self.aggregate.iter().map(String::as_str).collect();
        QueryRequest::parse(self.from.clone(), &group_by, &aggregates)
            .map_err(|e| format!("Invalid query: {}", e))
    }
}

#[derive(Clone, ValueEnum)]
enum PlanFormat {
    /// Indented plan tree
    Explain,
    /// Plan as JSON
    Json,
}

#[derive(Clone, ValueEnum)]
enum RowFormat {
    /// Tab-separated rows with a header
    Table,
    /// Array of JSON objects
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load_or_default(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.logging.filter);

    let result = match cli.command {
        Commands::Compile { query, format } => cmd_compile(&settings, query, format),
        Commands::Run { query, format } => cmd_run(&settings, query, format).await,
        Commands::Graph { model } => cmd_graph(&settings, model),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_model(settings: &Settings, model: Option<PathBuf>) -> Result<ModelDocument, String> {
    let path = match model {
        Some(path) => path,
        None => settings
            .model
            .resolved_path()
            .map_err(|e| format!("Error in settings: {}", e))?
            .ok_or("No model given; pass --model or set [model] path in skein.toml")?,
    };
    load_document(&path)
        .map_err(|e| format!("Error loading model '{}': {}", path.display(), e))
}

fn open_session(settings: &Settings, document: &ModelDocument) -> Result<Session, String> {
    let store = document
        .build()
        .map_err(|e| format!("Error building model: {}", e))?;
    Ok(Session::with_settings(store, settings.compiler.clone()))
}

fn cmd_compile(settings: &Settings, query: QueryArgs, format: PlanFormat) -> Result<(), String> {
    let document = read_model(settings, query.model.clone())?;
    let mut session = open_session(settings, &document)?;
    let request = query.request()?;

    let plan = session
        .compile(&request)
        .map_err(|e| format!("Compilation error: {}", e))?;

    match format {
        PlanFormat::Explain => print!("{}", plan.explain()),
        PlanFormat::Json => {
            let json = serde_json::to_string_pretty(plan.as_ref())
                .map_err(|e| format!("Error encoding plan: {}", e))?;
            println!("{}", json);
        }
    }
    Ok(())
}

async fn cmd_run(settings: &Settings, query: QueryArgs, format: RowFormat) -> Result<(), String> {
    let document = read_model(settings, query.model.clone())?;
    let mut session = open_session(settings, &document)?;
    let adapter = MemoryAdapter::from_tables(&document.tables)
        .map_err(|e| format!("Error loading tables: {}", e))?;
    let request = query.request()?;

    let result = session
        .run(&adapter, &request)
        .await
        .map_err(|e| format!("Query failed: {}", e))?;

    match format {
        RowFormat::Table => {
            println!("{}", result.columns.join("\t"));
            for row in &result.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join("\t"));
            }
        }
        RowFormat::Json => {
            let json = serde_json::to_string_pretty(&result.to_json())
                .map_err(|e| format!("Error encoding rows: {}", e))?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn cmd_graph(settings: &Settings, model: Option<PathBuf>) -> Result<(), String> {
    let document = read_model(settings, model)?;
    let store = document
        .build()
        .map_err(|e| format!("Error building model: {}", e))?;
    let graph = JoinGraph::from_store(&store);

    println!(
        "Sources: {}, joins: {}",
        graph.node_count(),
        graph.edge_count()
    );
    println!();

    println!("Joins:");
    for source in store.sources() {
        for (name, target) in graph.joins_from(source.id) {
            println!("  - {}.{} -> {}", source.name, name, target);
        }
    }

    let cycles = graph.cycle_groups();
    if !cycles.is_empty() {
        println!();
        println!("Cycles:");
        for group in &cycles {
            println!("  - {}", group.join(", "));
        }
    }

    if !graph.dangling().is_empty() {
        println!();
        println!("Dangling joins:");
        for dangling in graph.dangling() {
            println!(
                "  - {}.{} -> {} (undefined)",
                dangling.owner, dangling.field, dangling.target
            );
        }
    }

    Ok(())
}
