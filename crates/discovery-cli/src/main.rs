use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{discover, error_kind, exit_code, DiscoverRequest};
use config::{Config, OutputFormat};
use discovery_core::Endpoint;

#[derive(Parser)]
#[command(name = "discover")]
#[command(author, version, about = "List the datasets advertised by an Arrow Flight service", long_about = None)]
struct Cli {
    /// Service address: host:port, grpc+tcp://host:port or grpc+tls://host:port
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Connect and handshake budget in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Deadline for the listing request in milliseconds
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Negotiate an encrypted channel
    #[arg(long)]
    tls: bool,

    /// PEM file with trusted CA certificates (implies --tls)
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Criteria expression passed to the server
    #[arg(long)]
    criteria: Option<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // usage errors exit 1; 2 is reserved for connection failures
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = init_logging(cli.verbose) {
        report(&e);
        return ExitCode::FAILURE;
    }

    let request = match resolve(cli) {
        Ok(request) => request,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout().lock();
    match discover(&request, &mut stdout).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Merge the config file with command-line flags; flags win
fn resolve(cli: Cli) -> Result<DiscoverRequest> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let endpoint = match cli.endpoint {
        Some(address) => address
            .parse::<Endpoint>()
            .with_context(|| format!("invalid --endpoint '{}'", address))?,
        None => config
            .endpoint
            .context("no endpoint given; pass --endpoint or set it in the config file")?,
    };

    let mut options = config.options;
    if let Some(timeout_ms) = cli.timeout_ms {
        options.timeout_ms = timeout_ms;
    }
    if let Some(request_timeout_ms) = cli.request_timeout_ms {
        options.request_timeout_ms = request_timeout_ms;
    }
    if cli.tls || cli.ca_cert.is_some() {
        options.tls_enabled = true;
    }
    if let Some(path) = cli.ca_cert {
        options.tls_ca_cert = Some(path);
    }

    Ok(DiscoverRequest {
        endpoint,
        options,
        criteria: cli.criteria,
        output: cli.output.unwrap_or(config.output),
    })
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "discovery_cli=debug,discovery_flight=debug"
    } else {
        "discovery_cli=warn,discovery_flight=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

fn report(err: &anyhow::Error) {
    let kind = error_kind(err).map_or("error", |kind| kind.as_str());
    eprintln!("{} {:#}", format!("error[{}]:", kind).bright_red().bold(), err);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("discover").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_build_request() {
        let request = resolve(parse(&[
            "--endpoint",
            "localhost:31010",
            "--timeout-ms",
            "100",
            "--tls",
        ]))
        .unwrap();

        assert_eq!(request.endpoint, Endpoint::new("localhost", 31010));
        assert_eq!(request.options.timeout_ms, 100);
        assert!(request.options.tls_enabled);
        assert_eq!(request.output, OutputFormat::Plain);
        assert!(request.criteria.is_none());
    }

    #[test]
    fn test_flight_uri_endpoint() {
        let request = resolve(parse(&["-e", "grpc+tcp://[::1]:31010", "-o", "json"])).unwrap();
        assert_eq!(request.endpoint.to_string(), "grpc+tcp://[::1]:31010");
        assert_eq!(request.output, OutputFormat::Json);
    }

    #[test]
    fn test_missing_endpoint() {
        let err = resolve(parse(&[])).err().unwrap();
        assert!(err.to_string().contains("no endpoint"));
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = resolve(parse(&["--endpoint", "localhost"])).err().unwrap();
        assert!(err.to_string().contains("invalid --endpoint"));
        assert_eq!(exit_code(&err), 1);
    }
}
