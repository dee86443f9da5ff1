use std::path::PathBuf;

use clap::Parser;
use graphbatch::{init_logger, Error, LogFormat, MemoryStore, Request, Service, ServiceConfig};

/// Run GraphQL documents against an in-memory store.
///
/// Files run in the order given and share one store, so a file of mutations
/// can set up data for the queries after it.
#[derive(Debug, Parser)]
#[command(name = "graphbatch", version)]
struct Cli {
    /// GraphQL documents to execute
    #[arg(required = true)]
    queries: Vec<PathBuf>,

    /// TOML service configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured depth limit
    #[arg(long)]
    max_depth: Option<usize>,

    /// Variables for every document, as a JSON object
    #[arg(long)]
    variables: Option<String>,

    /// Operation to run in documents that define several
    #[arg(long)]
    operation: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logger(format, cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::from_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(max_depth) = cli.max_depth {
        config.max_depth = max_depth;
        config.validate()?;
    }
    tracing::debug!(?config, "loaded configuration");

    let variables = cli
        .variables
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(Error::from)?;

    let service = Service::new(MemoryStore::new_shared(), config);
    let mut failed = false;

    for path in &cli.queries {
        let query = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut request = Request::new(query);
        if let Some(variables) = &variables {
            request = request.variables(variables.clone());
        }
        if let Some(operation) = &cli.operation {
            request = request.operation_name(operation.clone());
        }

        tracing::info!(file = %path.display(), "executing");
        let response = service.execute(request).await;
        failed |= !response.is_ok();

        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    if failed {
        std::process::exit(1);
    }

    Ok(())
}
