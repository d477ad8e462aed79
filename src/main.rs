//! Binary entry point for the `ephemera` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use ephemera::{
    ComputeApi, ComputeError, Driver, DriverConfig, DriverError, FileTokenSource, NamespaceApi,
    NamespaceDriver, ProvisionError, ProvisioningRequest, TokenSource, UnavailableTunnel,
};

mod cli;

use cli::{Cli, DownCommand, UrlCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid driver URL '{url}': {message}")]
    Url { url: String, message: String },
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to destroy instance {instance_id}: {source}")]
    Destroy {
        instance_id: String,
        #[source]
        source: ComputeError,
    },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Plan(command) => plan(&command),
        Cli::Up(command) => up(&command).await,
        Cli::Down(command) => down(&command).await,
    }
}

fn parse_url(raw: &str) -> Result<Url, CliError> {
    Url::parse(raw).map_err(|err| CliError::Url {
        url: raw.to_owned(),
        message: err.to_string(),
    })
}

fn plan(command: &UrlCommand) -> Result<(), CliError> {
    let request = ProvisioningRequest::from_url(&parse_url(&command.url)?)
        .map_err(DriverError::from)?;
    let mut stdout = io::stdout().lock();
    write_plan(&mut stdout, &request)?;
    Ok(())
}

async fn up(command: &UrlCommand) -> Result<(), CliError> {
    let url = parse_url(&command.url)?;
    let config = DriverConfig::load_without_cli_args().map_err(DriverError::from)?;
    let driver = NamespaceDriver::from_config(&config, Arc::new(UnavailableTunnel))?;

    // No connection is opened, so nothing is torn down here; the instance
    // lives until its deadline or `ephemera down`.
    let connector = driver.provision(&url).await?;
    writeln!(io::stdout(), "{}", connector.instance_id())?;
    Ok(())
}

async fn down(command: &DownCommand) -> Result<(), CliError> {
    let config = DriverConfig::load_without_cli_args().map_err(DriverError::from)?;
    config.validate().map_err(DriverError::from)?;
    let tokens = FileTokenSource::new(config.resolved_token_path().map_err(DriverError::from)?);
    let token = tokens.load_user_token().map_err(DriverError::from)?;
    let api = NamespaceApi::from_config(&config)
        .map_err(|err| DriverError::from(ProvisionError::Connect(err)))?;
    let client = api
        .open(&token)
        .await
        .map_err(|err| DriverError::from(ProvisionError::Connect(err)))?;

    let result = client.destroy_instance(&command.instance_id).await;
    client.close();
    result.map_err(|source| CliError::Destroy {
        instance_id: command.instance_id.clone(),
        source,
    })?;

    writeln!(io::stdout(), "destroyed {}", command.instance_id)?;
    Ok(())
}

fn write_plan(mut target: impl Write, request: &ProvisioningRequest) -> io::Result<()> {
    writeln!(target, "cpu: {}", request.cpu())?;
    writeln!(target, "memory_mb: {}", request.memory_mb())?;
    writeln!(target, "arch: {}", request.arch())?;
    writeln!(target, "ttl: {}s", request.ttl().num_seconds())?;
    writeln!(target, "reuse_tag: {}", request.reuse_tag().unwrap_or("-"))?;
    writeln!(target, "auto_clean: {}", request.auto_clean())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
