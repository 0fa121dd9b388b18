mod config;
use clap::{Parser, Subcommand};
use config::Config;
use serde_json::Value;
use sharedvar_core::{Scope, SetOutcome, SharedVariableModule, VariableDeclaration, VariableType};
use std::collections::HashMap;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "sharedvar")]
#[command(about = "Read, write and watch shared variables")]
struct Cli {
    /// Path to configuration file
    #[arg(long = "conf", default_value = "sharedvar.yaml", global = true)]
    conf: String,

    /// Override node_ref from config at runtime
    #[arg(long, global = true)]
    node: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current value of a variable
    Get {
        name: String,

        #[arg(long, default_value = "global")]
        scope: Scope,

        /// Print the full stored record instead of the value
        #[arg(long)]
        raw: bool,
    },
    /// Write a value (parsed as JSON, else taken as a string)
    Set {
        name: String,

        value: String,

        #[arg(long, default_value = "global")]
        scope: Scope,

        #[arg(long = "type", default_value = "unspecified")]
        variable_type: VariableType,

        /// Queue the write and push it with a spin instead of writing at once
        #[arg(long)]
        deferred: bool,
    },
    /// Print the comm graph
    Graph {
        /// Only list entries declared by this node
        #[arg(long)]
        owner: Option<String>,
    },
    /// Declare the configured variables and keep them in sync until Ctrl+C
    Run {
        #[arg(long = "interval-ms", default_value_t = 500)]
        interval_ms: u64,
    },
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(error) => {
            tracing::error!("failed to render output: {}", error);
            std::process::exit(1);
        }
    }
}

async fn run_get(node: &SharedVariableModule, name: &str, scope: Scope, raw: bool) -> i32 {
    let key = scope.variable_key(name, node.node_ref());
    match node.backend().store().exists(&key).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!("shared variable '{}' does not exist", key);
            return 2;
        }
        Err(error) => {
            tracing::error!("failed to look up '{}': {}", key, error);
            return 1;
        }
    }

    let variable = match node
        .declare_variable(VariableDeclaration::new(name, Value::Null).scope(scope))
        .await
    {
        Ok(variable) => variable,
        Err(error) => {
            tracing::error!("failed to attach to '{}': {}", key, error);
            return 1;
        }
    };

    match variable.get_raw_value(true).await {
        Ok(record) if raw => print_json(&record),
        Ok(record) => print_json(&record.value),
        Err(error) => {
            tracing::error!("failed to read '{}': {}", key, error);
            return 1;
        }
    }

    0
}

async fn run_set(
    node: &SharedVariableModule,
    declaration: VariableDeclaration,
    value: Value,
    deferred: bool,
) -> i32 {
    let variable = match node.declare_variable(declaration).await {
        Ok(variable) => variable,
        Err(error) => {
            tracing::error!("failed to declare variable: {}", error);
            return 1;
        }
    };

    match variable.set_value(value, !deferred).await {
        Ok(SetOutcome::Rejected) => return 2,
        Ok(SetOutcome::Deferred) => {
            if let Err(error) = variable.spin().await {
                tracing::error!("failed to push deferred write: {}", error);
                return 1;
            }
        }
        Ok(SetOutcome::Written) => {}
        Err(error) => {
            tracing::error!("failed to write '{}': {}", variable.name(), error);
            return 1;
        }
    }

    match variable.get_raw_value(false).await {
        Ok(record) => print_json(&record),
        Err(error) => {
            tracing::error!("failed to read back '{}': {}", variable.name(), error);
            return 1;
        }
    }

    0
}

async fn run_graph(node: &SharedVariableModule, owner: Option<String>) -> i32 {
    let comm_graph = node.backend().comm_graph();
    let result = match owner {
        Some(owner) => comm_graph
            .entries(&owner)
            .await
            .and_then(|entries| Ok(serde_json::to_value(entries)?)),
        None => comm_graph
            .document()
            .await
            .and_then(|graph| Ok(serde_json::to_value(graph)?)),
    };

    match result {
        Ok(value) => {
            print_json(&value);
            0
        }
        Err(error) => {
            tracing::error!("failed to read comm graph: {}", error);
            1
        }
    }
}

async fn run_loop(node: &SharedVariableModule, cfg: &Config, interval_ms: u64) -> i32 {
    if let Err(error) = node
        .declare_variables(cfg.variables.clone(), &cfg.namespace_prefix)
        .await
    {
        tracing::error!("failed to declare configured variables: {}", error);
        return 1;
    }

    tracing::info!(
        "node {} syncing {} shared variables every {}ms, press Ctrl+C to stop",
        node.node_ref(),
        cfg.variables.len(),
        interval_ms
    );

    let mut last_seen: HashMap<String, Value> = HashMap::new();
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                return 0;
            }
        }

        if let Err(error) = node.spin_all().await {
            tracing::warn!("spin failed: {}", error);
            continue;
        }

        for variable in node.variables().await {
            let Ok(value) = variable.get_value(false).await else {
                continue;
            };

            if last_seen.get(variable.name()) != Some(&value) {
                tracing::info!("{} = {}", variable.name(), value);
                last_seen.insert(variable.name().to_string(), value);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sharedvar=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut cfg = match Config::from_file(&cli.conf) {
        Ok(c) => c,
        Err(error) => {
            tracing::error!("Failed to load config: {}", error);
            std::process::exit(1);
        }
    };

    if let Some(node_ref) = cli.node {
        tracing::info!("Using node override '{}' via CLI", node_ref);
        cfg.node_ref = node_ref;
    }

    let backend = match cfg.backend_builder().build().await {
        Ok(backend) => backend,
        Err(error) => {
            tracing::error!("Failed to connect backend: {}", error);
            std::process::exit(1);
        }
    };

    let node = SharedVariableModule::new(cfg.node_ref.clone(), backend);

    let code = match cli.command {
        Commands::Get { name, scope, raw } => run_get(&node, &name, scope, raw).await,
        Commands::Set {
            name,
            value,
            scope,
            variable_type,
            deferred,
        } => {
            let value = parse_value(&value);
            if !variable_type.accepts(&value) {
                tracing::error!("value {} is not a valid {}", value, variable_type);
                std::process::exit(2);
            }

            let declaration = VariableDeclaration::new(name, Value::Null)
                .scope(scope)
                .variable_type(variable_type);
            run_set(&node, declaration, value, deferred).await
        }
        Commands::Graph { owner } => run_graph(&node, owner).await,
        Commands::Run { interval_ms } => run_loop(&node, &cfg, interval_ms).await,
    };

    if let Err(error) = node.shutdown().await {
        tracing::error!("failed to undeclare shared variables: {}", error);
        std::process::exit(1);
    }

    std::process::exit(code);
}
