//! Lense CLI entry point.
//!
//! Compiles and executes manifests, and runs authorization decisions and
//! full requests against a TOML permission store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use lense::acl::model::{Method, Requester};
use lense::acl::store::{InMemoryStore, PermissionStore};
use lense::acl::DecisionEngine;
use lense::capability::{builtin, CallScope};
use lense::config::Config;
use lense::gateway::{registry_builder, ApiRequest, Gateway};
use lense::manifest::{request_data, Compiled, ManifestEngine};

/// Lense — manifest interpreter and ACL gateway.
#[derive(Parser)]
#[command(name = "lense", version, about)]
struct Cli {
    /// Config file (defaults to `$LENSE_CONFIG_PATH` or `./lense.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Compile a manifest and report its objects.
    Compile {
        /// Manifest JSON file.
        manifest: PathBuf,
        /// Print the compiled objects.
        #[arg(long)]
        dump: bool,
    },
    /// Execute a manifest with the built-in capabilities.
    Execute {
        /// Manifest JSON file.
        manifest: PathBuf,
        /// Request data as a JSON object.
        #[arg(long)]
        data: Option<String>,
    },
    /// Decide whether a group may invoke a handler.
    Authorize {
        /// Permission store TOML file.
        #[arg(long)]
        store: PathBuf,
        /// Handler path.
        #[arg(long)]
        path: String,
        /// Handler method.
        #[arg(long)]
        method: Method,
        /// Requesting group id.
        #[arg(long)]
        group: String,
    },
    /// Run a full request through the gateway.
    Request {
        /// Permission store TOML file.
        #[arg(long)]
        store: PathBuf,
        /// Handler path.
        #[arg(long)]
        path: String,
        /// Handler method.
        #[arg(long)]
        method: Method,
        /// User id; anonymous when omitted.
        #[arg(long)]
        user: Option<String>,
        /// Group the user acts as.
        #[arg(long)]
        group: Option<String>,
        /// Request data as a JSON object.
        #[arg(long)]
        data: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    if cli.config.is_some() {
        config.apply_overrides(|key| std::env::var(key).ok());
    }

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(lense::logging::init_production(dir, &config.logging.level)?),
        None => {
            lense::logging::init_cli(&config.logging.level)?;
            None
        }
    };

    match cli.command {
        Command::Compile { manifest, dump } => handle_compile(&config, &manifest, dump),
        Command::Execute { manifest, data } => handle_execute(&config, &manifest, data.as_deref()),
        Command::Authorize {
            store,
            path,
            method,
            group,
        } => handle_authorize(&config, &store, &path, method, &group),
        Command::Request {
            store,
            path,
            method,
            user,
            group,
            data,
        } => {
            let requester = match user {
                Some(user) => Requester {
                    name: user.clone(),
                    user: Some(user),
                    groups: group.iter().cloned().collect(),
                    group,
                },
                None => Requester::anonymous(),
            };
            let request = ApiRequest {
                path,
                method,
                requester,
                data: parse_data(data.as_deref())?,
            };
            handle_request(&config, &store, request)
        }
    }
}

fn builtin_engine(config: &Config) -> anyhow::Result<ManifestEngine> {
    let registry = builtin::standard(config.engine.capability_root.clone())
        .build()
        .context("failed to build capability registry")?;
    Ok(ManifestEngine::new(registry))
}

fn read_manifest(path: &Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    Ok(ManifestEngine::parse(&text)?)
}

fn parse_data(data: Option<&str>) -> anyhow::Result<serde_json::Value> {
    match data {
        Some(text) => serde_json::from_str(text).context("--data is not valid JSON"),
        None => Ok(serde_json::Value::Null),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Compile a manifest file.
fn handle_compile(config: &Config, manifest: &Path, dump: bool) -> anyhow::Result<()> {
    let engine = builtin_engine(config)?;
    match engine.compile(&read_manifest(manifest)?, dump)? {
        Compiled::Dump(text) => println!("{text}"),
        Compiled::Objects(compiled) => print_json(&serde_json::json!({
            "objects": compiled.len(),
            "keys": compiled.keys(),
        }))?,
    }
    Ok(())
}

/// Execute a manifest file outside any request.
fn handle_execute(config: &Config, manifest: &Path, data: Option<&str>) -> anyhow::Result<()> {
    let engine = builtin_engine(config)?;
    let data = request_data(parse_data(data)?)?;
    let response = engine.execute(&read_manifest(manifest)?, &CallScope::internal(), data)?;
    print_json(&response)
}

/// Print the access decision for a group on a handler.
fn handle_authorize(
    config: &Config,
    store: &Path,
    path: &str,
    method: Method,
    group: &str,
) -> anyhow::Result<()> {
    let store: Arc<dyn PermissionStore> = Arc::new(InMemoryStore::load(store)?);
    let handler = store
        .handler(path, method)
        .with_context(|| format!("no handler for {method} {path}"))?;
    let engine = DecisionEngine::new(store, config.acl.enabled);
    let access = engine.decide_for(&handler, group)?;
    debug!(granted = access.granted, "decision computed");
    print_json(&access)
}

/// Run one request through the gateway and print the outcome.
fn handle_request(config: &Config, store: &Path, request: ApiRequest) -> anyhow::Result<()> {
    let store: Arc<dyn PermissionStore> = Arc::new(InMemoryStore::load(store)?);
    let registry = registry_builder(Arc::clone(&store), config)
        .build()
        .context("failed to build capability registry")?;
    let gateway = Gateway::new(store, registry, config);

    match gateway.respond(request) {
        Ok(response) => print_json(&response),
        Err(payload) => {
            print_json(&payload)?;
            anyhow::bail!("request failed with status {}", payload.code)
        }
    }
}
