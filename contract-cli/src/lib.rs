#![forbid(unsafe_code)]
use std::path::PathBuf;

use clap::{self, Arg};
use json::object;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use contract_config::{CatchUpAnchor, SyncConfig};
use contract_netutils::JsonRpcConnector;
use contract_sync::{
    client::{fetch::fetch, FetchClient},
    error::SyncError,
    primitives::SyncStatus,
    service::SyncService,
    store::{ContractDb, SledStore, StoreError},
    sync::SyncController,
    wire::parse_notification,
};

pub mod commands;

use commands::ShortCircuitedCommand;

/// The argument parser, without reading the process arguments
pub fn clap_command() -> clap::Command {
    clap::Command::new("contract-sync").version(env!("CARGO_PKG_VERSION"))
            .arg(Arg::new("server")
                .long("server")
                .value_name("server")
                .help("Node exposing the chain and block_store JSON-RPC services.")
                .value_parser(parse_uri)
                .default_value(contract_config::DEFAULT_UPSTREAM_SERVER))
            .arg(Arg::new("data-dir")
                .long("data-dir")
                .value_name("data-dir")
                .help("Absolute path to use as data directory"))
            .arg(Arg::new("batch-size")
                .long("batch-size")
                .value_name("batch-size")
                .value_parser(clap::value_parser!(u64))
                .help("Blocks requested per catch-up batch. Clamped to 1..=200."))
            .arg(Arg::new("anchor")
                .long("anchor")
                .value_name("anchor")
                .value_parser(parse_anchor)
                .help(r#"Block id catch-up paginates against. One of "head" or "target""#))
            .arg(Arg::new("logfile")
                .long("logfile")
                .help("Write logs to a rolling file in the data directory instead of stderr.")
                .action(clap::ArgAction::SetTrue))
            .arg(Arg::new("COMMAND")
                .help("Command to execute against the database. If a command is not specified, the sync service reads notifications from stdin.")
                .required(false)
                .index(1))
            .arg(Arg::new("extra_args")
                .help("Params to execute command with. Run the 'help' command to get usage help.")
                .required(false)
                .num_args(1..)
                .index(2)
                .action(clap::ArgAction::Append)
        )
}

pub fn build_clap_app() -> clap::ArgMatches {
    clap_command().get_matches()
}

// Custom function to parse a string into an http::Uri
fn parse_uri(s: &str) -> Result<http::Uri, String> {
    s.parse::<http::Uri>().map_err(|e| e.to_string())
}

fn parse_anchor(s: &str) -> Result<CatchUpAnchor, String> {
    s.parse::<CatchUpAnchor>()
}

#[derive(Debug)]
pub enum TemplateFillError {
    MalformedServerURL(String),
}

/// Settings collected from the command line
#[derive(Debug)]
pub struct ConfigTemplate {
    params: Vec<String>,
    server: http::Uri,
    data_dir: Option<PathBuf>,
    batch_size: Option<u64>,
    anchor: Option<CatchUpAnchor>,
    logfile: bool,
    command: Option<String>,
}

impl ConfigTemplate {
    pub fn fill(matches: clap::ArgMatches) -> Result<Self, TemplateFillError> {
        let params = if let Some(vals) = matches.get_many::<String>("extra_args") {
            vals.cloned().collect()
        } else {
            vec![]
        };
        let command = matches.get_one::<String>("COMMAND").cloned();
        let data_dir = matches.get_one::<String>("data-dir").map(PathBuf::from);
        let server = matches
            .get_one::<http::Uri>("server")
            .map(|server| server.to_string());
        let server = contract_config::construct_upstream_uri(server)
            .map_err(|e| TemplateFillError::MalformedServerURL(e.to_string()))?;

        if server.scheme_str().is_none() || server.host().is_none() || server.port().is_none() {
            return Err(TemplateFillError::MalformedServerURL(format!(
                "Please provide the --server parameter as [scheme]://[host]:[port].\nYou provided: {}",
                server )));
        }

        Ok(Self {
            params,
            server,
            data_dir,
            batch_size: matches.get_one::<u64>("batch-size").copied(),
            anchor: matches.get_one::<CatchUpAnchor>("anchor").copied(),
            logfile: matches.get_flag("logfile"),
            command,
        })
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.server.clone(), self.data_dir.clone());
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(anchor) = self.anchor {
            config.catch_up_anchor = anchor;
        }
        config
    }
}

/// Failures that end the service
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("IO error. {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error. {0}")]
    Store(#[from] StoreError),
    #[error("Sync error. {0}")]
    Sync(#[from] SyncError),
}

fn init_logging(template: &ConfigTemplate, config: &SyncConfig) -> Result<(), String> {
    if template.logfile {
        let log_config = config.get_log_config().map_err(|e| e.to_string())?;
        log4rs::init_config(log_config).map_err(|e| e.to_string())?;
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub fn status_json(status: &SyncStatus) -> json::JsonValue {
    object! {
        "mode" => status.mode().to_string(),
        "block_height" => status.block_height(),
        "total_contracts" => status.total_contracts(),
        "pending_contracts" => status.pending_contracts(),
        "pending_heights" => status.pending_heights().clone(),
        "backlog_heights" => status.backlog_heights().clone(),
    }
}

/// Runs the sync service, feeding it the notifications read from stdin, one JSON envelope per
/// line. Returns the final status once stdin is closed.
pub async fn run_service(config: SyncConfig) -> Result<SyncStatus, RunError> {
    let db = ContractDb::open(SledStore::open(config.get_db_path()?)?)?;
    info!(
        "Opened database at height {} with {} contracts",
        db.block_height(),
        db.total_contracts()
    );

    let (fetch_request_sender, fetch_request_receiver) = tokio::sync::mpsc::unbounded_channel();
    let fetcher = tokio::spawn(fetch(
        fetch_request_receiver,
        JsonRpcConnector::new(config.upstream_uri.clone()),
    ));
    let controller = SyncController::new(db, FetchClient::new(fetch_request_sender), &config);
    let handle = SyncService::start(controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if handle.is_finished() {
            break;
        }
        match parse_notification(&line) {
            Ok(notification) => {
                if let Err(e) = handle.notify(notification) {
                    error!("{}", e);
                    break;
                }
            }
            Err(e) => error!("Dropping unreadable notification: {}", e),
        }
    }

    let controller = handle.stop().await?;
    let status = controller.status();
    drop(controller);
    if let Err(e) = fetcher.await {
        error!("Fetcher task failed: {}", e);
    }
    Ok(status)
}

fn run_command(template: &ConfigTemplate, config: &SyncConfig, command: &str) -> String {
    let args: Vec<&str> = template.params.iter().map(String::as_str).collect();
    let db = config
        .get_db_path()
        .map_err(RunError::from)
        .and_then(|path| Ok(ContractDb::open(SledStore::open(path)?)?));
    match db {
        Ok(db) => commands::do_user_command(command, &args, &db),
        Err(e) => object! { "error" => e.to_string() }.pretty(2),
    }
}

pub fn run_cli() {
    let template = match ConfigTemplate::fill(build_clap_app()) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error filling config template: {:?}", e);
            std::process::exit(1);
        }
    };

    match template.command() {
        Some("help") => {
            println!(
                "{}",
                commands::HelpCommand::exec_without_db(template.params.clone())
            );
            return;
        }
        Some("address") => {
            println!(
                "{}",
                commands::AddressCommand::exec_without_db(template.params.clone())
            );
            return;
        }
        _ => {}
    }

    let config = template.sync_config();
    if let Err(e) = init_logging(&template, &config) {
        eprintln!("Could not initialize logging: {e}")
    };

    if let Some(command) = template.command() {
        println!("{}", run_command(&template, &config, command));
        return;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Could not start runtime: {e}");
            std::process::exit(1);
        }
    };
    match runtime.block_on(run_service(config)) {
        Ok(status) => println!("{}", status_json(&status).pretty(2)),
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
