use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use kvm_autotester::config::{self, ConfigMap, DEFAULT_CONFIG_PATH};
use kvm_autotester::http::{Method, Outcome, RequestOptions, ResilientClient, RetryPolicy};
use kvm_autotester::logging;
use log::error;

/// kvm-autotester - resilient HTTP requests driven by a YAML config
///
/// Loads the configuration file and, with the `request` subcommand, sends an
/// HTTP request that is retried on connection failures and 500/502/503/504.
///
/// Examples:
///   kvm-autotester --config ./config.yaml
///   kvm-autotester request GET https://kvm.example.com/api/status
#[derive(Parser, Debug)]
#[command(author, version = env!("KVM_AUTOTESTER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    /// Configuration file (YAML mapping)
    #[arg(
        short = 'c',
        long = "config",
        env = "KVM_AUTOTESTER_CONFIG",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send an HTTP request with automatic retries
    Request(RequestArgs),
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)
    #[arg(value_name = "METHOD")]
    method: Method,

    /// Absolute URL
    #[arg(value_name = "URL")]
    url: String,

    /// Extra header, e.g. -H 'Accept: application/json'
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Query parameter, e.g. -q page=2
    #[arg(short = 'q', long = "query", value_name = "KEY=VALUE", value_parser = parse_query)]
    query: Vec<(String, String)>,

    /// Raw request body
    #[arg(long = "data", value_name = "TEXT", conflicts_with = "json")]
    data: Option<String>,

    /// JSON request body
    #[arg(long = "json", value_name = "JSON")]
    json: Option<String>,
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'NAME: VALUE', got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{}'", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_query(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected 'KEY=VALUE', got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

impl RequestArgs {
    fn options(&self) -> Result<RequestOptions> {
        let mut options = RequestOptions {
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: None,
        };
        if let Some(data) = &self.data {
            options = options.text(data.clone());
        }
        if let Some(json) = &self.json {
            let value = serde_json::from_str(json).context("Invalid --json body")?;
            options = options.json(value);
        }
        Ok(options)
    }
}

fn retry_policy(config: &ConfigMap) -> RetryPolicy {
    config::retry_policy(config).unwrap_or_else(|e| {
        error!("{}; using the default retry policy", e);
        RetryPolicy::default()
    })
}

fn run_request(args: &RequestArgs, config: &ConfigMap) -> Result<ExitCode> {
    let client = ResilientClient::from_policy(retry_policy(config))?;

    match client.execute(args.method, &args.url, args.options()?) {
        Outcome::Success(response) => {
            print!("{}", response.text());
            Ok(ExitCode::SUCCESS)
        }
        // Already logged by the client
        Outcome::Failure(_) => Ok(ExitCode::FAILURE),
    }
}

fn show(cli: &Cli, config: &ConfigMap) -> Result<()> {
    println!("debug: {}", cli.debug);
    println!("config: {}", cli.config.display());
    let yaml = serde_yaml::to_string(config).context("Failed to render config")?;
    print!("{}", yaml);
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let config = config::load_or_empty(&cli.config);

    match &cli.command {
        Some(Commands::Request(args)) => run_request(args, &config),
        None => {
            show(&cli, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
