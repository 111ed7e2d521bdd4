//! EDIA CLI
//!
//! Loads the configured embedding table and answers word explorer
//! queries from the command line or an interactive prompt.

use anyhow::Context;
use clap::{Parser, Subcommand};
use edia::{NeighborResult, NnMethod, QueryService, SharedIndex, ToolConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// EDIA - word embedding explorer
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Tool configuration file
    #[arg(short, long, default_value = "config/tool.toml")]
    config: PathBuf,

    /// Directory holding data/ and data_custom/
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Embedding table to load instead of the configured one
    #[arg(short, long)]
    embeddings: Option<PathBuf>,

    /// Search method override (exact | approximate)
    #[arg(short, long)]
    method: Option<NnMethod>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show what was loaded
    Info,
    /// Print the vector of a token
    Vector { token: String },
    /// Nearest neighbors of a token
    Neighbors {
        token: String,
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Neighbors of b - a + c
    Analogy {
        a: String,
        b: String,
        c: String,
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Cosine similarity of two tokens
    Similarity { a: String, b: String },
    /// One query per input line
    Repl {
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("edia=info".parse()?))
        .init();

    let args = Args::parse();

    let tool = if args.config.exists() {
        ToolConfig::from_file(&args.config)?
    } else {
        info!("{} not found, using defaults", args.config.display());
        ToolConfig::default()
    };

    let mut config = tool.embedding_config(&args.base_dir)?;
    if let Some(path) = args.embeddings {
        config.path = path;
    }
    if let Some(method) = args.method {
        config.nn_method = method;
    }

    let path = config.path.clone();
    let shared = tokio::task::spawn_blocking(move || SharedIndex::load(config))
        .await?
        .with_context(|| format!("loading {}", path.display()))?;

    let service = QueryService::new(Arc::new(shared), tool.concurrency())
        .with_query_log(tool.logs.available_logs);

    match args.command {
        Cmd::Info => print_info(&service),
        Cmd::Vector { token } => {
            let vector = service.vector_of(token).await?;
            let parts: Vec<String> = vector.iter().map(|x| format!("{:.6}", x)).collect();
            println!("{}", parts.join(" "));
        }
        Cmd::Neighbors { token, k } => {
            print_neighbors(&service.nearest_neighbors(token, k).await?);
        }
        Cmd::Analogy { a, b, c, k } => {
            print_neighbors(&service.analogy(a, b, c, k).await?);
        }
        Cmd::Similarity { a, b } => {
            println!("{:.6}", service.similarity(a, b).await?);
        }
        Cmd::Repl { k } => repl(&service, k).await?,
    }

    Ok(())
}

fn print_info(service: &QueryService) {
    let info = service.index().snapshot().info();
    println!("path:          {}", info.path.display());
    println!("rows:          {}", info.rows);
    println!("dimensions:    {} (indexed {})", info.dim, info.indexed_dim);
    println!("method:        {}", info.method);
    println!("max neighbors: {}", info.max_neighbors);
    println!("skipped rows:  {}", info.skipped_rows);
    println!("loaded at:     {}", info.loaded_at.to_rfc3339());
}

fn print_neighbors(result: &NeighborResult) {
    for (rank, neighbor) in result.iter().enumerate() {
        println!(
            "{:>3}. {:<24} {:.4}",
            rank + 1,
            neighbor.token,
            neighbor.similarity()
        );
    }
}

async fn repl(service: &QueryService, k: usize) -> anyhow::Result<()> {
    println!("Type a word for its neighbors, 'a b c' for an analogy, ':reload', ':stats' or ':quit'.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("edia> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();

        let outcome = match words.as_slice() {
            [] => continue,
            [":quit"] | [":exit"] => break,
            [":stats"] => {
                println!("{}", service.metrics().summary());
                continue;
            }
            [":reload"] => service.reload().await.map(|info| {
                println!("Reloaded {} rows from {}", info.rows, info.path.display());
            }),
            [token] => service
                .nearest_neighbors(token.to_string(), k)
                .await
                .map(|r| print_neighbors(&r)),
            [a, b, c] => service
                .analogy(a.to_string(), b.to_string(), c.to_string(), k)
                .await
                .map(|r| print_neighbors(&r)),
            _ => {
                eprintln!("Expected one word or three words");
                continue;
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_query_error() => eprintln!("{}", e),
            Err(e) => {
                error!("Query failed: {}", e);
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}
