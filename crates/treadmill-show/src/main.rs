//! treadmill-show - inspect cell state

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, error};
use treadmill_show::endpoints::DEFAULT_PROTO;
use treadmill_show::{fetch_endpoints, print_endpoints, EndpointQuery, ShowError};

/// Show state of scheduled applications
#[derive(Parser, Debug)]
#[command(name = "treadmill-show")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Treadmill cell, used to label errors; the state APIs to query come
    /// from --api
    #[arg(long, env = "TREADMILL_CELL", default_value = "")]
    cell: String,

    /// State API URL (repeatable, or comma separated)
    #[arg(long, env = "TREADMILL_STATEAPI", value_delimiter = ',')]
    api: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show application endpoints
    Endpoints {
        /// App name pattern, e.g. proid.app*
        pattern: String,

        /// Endpoint name
        endpoint: Option<String>,

        /// Endpoint protocol
        #[arg(default_value = DEFAULT_PROTO)]
        proto: String,
    },
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr).compact())
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.api.is_empty() {
        return Err(ShowError::NoStateApi { cell: args.cell }.into());
    }

    debug!(cell = %args.cell, apis = ?args.api, "Querying state API");
    let client = reqwest::Client::new();

    match args.command {
        Command::Endpoints {
            pattern,
            endpoint,
            proto,
        } => {
            let mut query = EndpointQuery::new(pattern);
            if let Some(endpoint) = endpoint {
                query = query.with_endpoint(endpoint, Some(proto));
            }

            let records = fetch_endpoints(&client, &args.api, &query)
                .await
                .with_context(|| format!("cell {}", args.cell))?;
            print_endpoints(&records).context("write endpoint table")?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints_command() {
        let args = Args::try_parse_from([
            "treadmill-show",
            "--cell",
            "test",
            "--api",
            "http://a:1234,http://b:1234",
            "endpoints",
            "proid.app",
            "http",
        ])
        .unwrap();

        assert_eq!(args.cell, "test");
        assert_eq!(args.api, vec!["http://a:1234", "http://b:1234"]);
        match args.command {
            Command::Endpoints {
                pattern,
                endpoint,
                proto,
            } => {
                assert_eq!(pattern, "proid.app");
                assert_eq!(endpoint.as_deref(), Some("http"));
                assert_eq!(proto, "tcp");
            }
        }
    }

    #[tokio::test]
    async fn test_cell_labels_missing_api_error() {
        let args = Args::try_parse_from([
            "treadmill-show",
            "--cell",
            "test",
            "endpoints",
            "proid.app",
        ])
        .unwrap();
        let args = Args { api: vec![], ..args };

        let err = run(args).await.unwrap_err();
        assert!(err.to_string().contains("cell test"));
    }
}
