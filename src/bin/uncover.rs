//! Command-line entry point.
//!
//! Results go to stdout (and the output file, if any). All tracing output
//! goes to stderr so stdout stays pipeable.

use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uncover::{Runner, UncoverConfig};
use uncover_engine::{AgentRegistry, CancellationToken};

/// Quickly discover exposed hosts on the internet using multiple search engines.
#[derive(Parser, Debug)]
#[command(name = "uncover", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "UNCOVER_CONFIG")]
    config: Option<PathBuf>,

    /// Search query (repeatable). Read from stdin when none is given.
    #[arg(short, long)]
    query: Vec<String>,

    /// Engines to query, comma separated: shodan, shodan-idb, fofa.
    #[arg(short, long, value_delimiter = ',')]
    engine: Vec<String>,

    /// Queries sent through shodan.
    #[arg(long)]
    shodan: Vec<String>,

    /// IP addresses looked up through shodan InternetDB.
    #[arg(long = "shodan-idb")]
    shodan_idb: Vec<String>,

    /// Queries sent through fofa.
    #[arg(long)]
    fofa: Vec<String>,

    /// Output file, truncated on open.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Field template for plain output (ip, port, host, url).
    #[arg(short, long)]
    field: Option<String>,

    /// Write JSON lines.
    #[arg(short, long)]
    json: bool,

    /// Write upstream records as received.
    #[arg(short, long, conflicts_with = "json")]
    raw: bool,

    /// Result cap per query and engine.
    #[arg(short, long)]
    limit: Option<usize>,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Retries per request.
    #[arg(long)]
    retry: Option<u32>,

    /// Requests per second for every engine.
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Requests per minute for every engine.
    #[arg(long)]
    rate_limit_minute: Option<u32>,

    /// User-Agent header sent to every engine.
    #[arg(long)]
    user_agent: Option<String>,

    /// List available engines and exit.
    #[arg(long)]
    list_engines: bool,

    /// Show debug output.
    #[arg(short, long, conflicts_with = "silent")]
    verbose: bool,

    /// Show only results and errors.
    #[arg(long)]
    silent: bool,
}

impl Cli {
    /// Command-line values override the file.
    fn apply(self, config: &mut UncoverConfig) {
        let search = &mut config.search;
        search.queries.extend(self.query);
        search
            .engines
            .extend(self.engine.into_iter().map(|e| e.trim().to_lowercase()));
        let per_engine = [
            ("shodan", self.shodan),
            ("shodan-idb", self.shodan_idb),
            ("fofa", self.fofa),
        ];
        for (engine, queries) in per_engine {
            if !queries.is_empty() {
                search
                    .engine_queries
                    .entry(engine.to_owned())
                    .or_default()
                    .extend(queries);
            }
        }
        if self.output.is_some() {
            search.output = self.output;
        }
        if let Some(field) = self.field {
            search.fields = field;
        }
        search.json |= self.json;
        search.raw |= self.raw;
        if let Some(limit) = self.limit {
            search.limit = limit;
        }
        if let Some(timeout) = self.timeout {
            search.timeout = timeout;
        }
        if let Some(retry) = self.retry {
            search.retry = retry;
        }
        if let Some(rate_limit) = self.rate_limit {
            search.rate_limit = rate_limit;
        }
        if let Some(rate_limit_minute) = self.rate_limit_minute {
            search.rate_limit_minute = rate_limit_minute;
        }
        if self.user_agent.is_some() {
            search.user_agent = self.user_agent;
        }
    }
}

fn init_tracing(verbose: bool, silent: bool) {
    let default_filter = if verbose {
        "uncover=debug,uncover_engine=debug"
    } else if silent {
        "uncover=error,uncover_engine=error"
    } else {
        "uncover=info,uncover_engine=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

fn has_any_query(config: &UncoverConfig) -> bool {
    !config.search.queries.is_empty()
        || config.search.engine_queries.values().any(|q| !q.is_empty())
}

fn read_stdin_queries() -> anyhow::Result<Vec<String>> {
    let mut queries = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            queries.push(line.to_owned());
        }
    }
    Ok(queries)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.silent);

    if cli.list_engines {
        for name in AgentRegistry::builtin().names() {
            println!("{name}");
        }
        return Ok(());
    }

    let mut config = UncoverConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    if !has_any_query(&config) && !std::io::stdin().is_terminal() {
        config.search.queries = read_stdin_queries()?;
    }

    let runner = Runner::new(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping");
            on_signal.cancel();
        }
    });

    let summary = runner.run(cancel).await.map_err(|e| {
        tracing::error!(error = %e, "uncover exited with error");
        anyhow::anyhow!("uncover failed: {e}")
    })?;

    if summary.written == 0 {
        tracing::info!("no results found");
    }
    Ok(())
}
