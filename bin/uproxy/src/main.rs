//! uproxy deploys contracts behind upgradeable proxies and upgrades them in place.

mod cli;
mod config;

use std::{
    io::{self, Write},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use uproxy_deploy::{
    AbortSignal, ArtifactStore, DeployRequest, ManifestStore, NetworkRegistry, Orchestrator,
    RpcConnector, UpgradeRequest, UproxyConfig, resolve_signers,
    reporter::{self, EXIT_FAILURE, EXIT_SUCCESS},
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Secrets may live in a .env file next to the project.
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr; stdout only carries results.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(io::stderr)
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(artifacts) = cli.artifacts {
        config.artifacts = artifacts;
    }
    if let Some(manifests) = cli.manifests {
        config.manifests = manifests;
    }

    let registry = NetworkRegistry::from_process_env(&config)
        .context("Failed to build the network registry")?;

    let (abort_tx, abort) = AbortSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, no further transactions will be submitted");
            let _ = abort_tx.send(true);
        }
    });

    let orchestrator = Orchestrator::new(
        registry,
        RpcConnector,
        ArtifactStore::new(&config.artifacts),
    )
    .manifests(ManifestStore::new(&config.manifests))
    .abort_signal(abort);

    let code = match cli.command {
        Command::Deploy(args) => {
            let mut request =
                DeployRequest::new(network_or_default(args.network, &config), args.contract)
                    .args(args.args)
                    .kind(args.kind)
                    .initializer(args.initializer);
            if let Some(index) = args.signer_index {
                request = request.signer_index(index);
            }
            if let Some(proxy_contract) = args.proxy_contract {
                request = request.proxy_contract(proxy_contract);
            }

            let record = orchestrator.deploy(&request).await;
            reporter::report(&record, cli.json, &mut io::stdout(), &mut io::stderr())
        }
        Command::Upgrade(args) => {
            let mut request = UpgradeRequest::new(
                network_or_default(args.network, &config),
                args.proxy,
                args.contract,
            );
            if let Some(index) = args.signer_index {
                request = request.signer_index(index);
            }
            if let Some(reference) = args.reference {
                request = request.reference(reference);
            }

            let record = orchestrator.upgrade(&request).await;
            reporter::report(&record, cli.json, &mut io::stdout(), &mut io::stderr())
        }
        Command::Networks => {
            print_networks(orchestrator.registry(), &config)?;
            EXIT_SUCCESS
        }
        Command::Signers { network } => {
            let network = network_or_default(network, &config);
            let signers = orchestrator
                .registry()
                .resolve(&network)
                .and_then(resolve_signers);
            match signers {
                Ok(signers) => {
                    let mut out = io::stdout().lock();
                    for signer in signers {
                        writeln!(out, "{}", signer.address())?;
                    }
                    EXIT_SUCCESS
                }
                Err(e) => print_error(&e),
            }
        }
        Command::ValidateUpgrade { from, to } => match orchestrator.validate_upgrade(&from, &to) {
            Ok(()) => {
                println!("{} can be upgraded to {}", from, to);
                EXIT_SUCCESS
            }
            Err(e) => print_error(&e),
        },
    };

    Ok(ExitCode::from(code))
}

fn network_or_default(network: Option<String>, config: &UproxyConfig) -> String {
    network.unwrap_or_else(|| config.default_network.clone())
}

fn print_error(error: &uproxy_deploy::OrchestrationError) -> u8 {
    let label = if error.is_safety_violation() {
        "SAFETY VIOLATION"
    } else {
        "error"
    };
    eprintln!("{} [{}]: {}", label, error.kind(), error);
    EXIT_FAILURE
}

/// Print the configured networks. URLs are shown unexpanded so secrets stay out of the output.
fn print_networks(registry: &NetworkRegistry, config: &UproxyConfig) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network", "Chain ID", "RPC URL", "Signers", "Status",
    ]);

    for profile in registry.profiles() {
        let url = config
            .networks
            .get(&profile.name)
            .map(|definition| definition.url.as_str())
            .unwrap_or_default();
        let chain_id = profile
            .chain_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match profile.validate() {
            Ok(()) => "ready".to_string(),
            Err(e) => e.kind().to_string(),
        };
        let name = if profile.name == config.default_network {
            format!("{} (default)", profile.name)
        } else {
            profile.name.clone()
        };

        table.add_row(vec![
            name,
            chain_id,
            url.to_string(),
            profile.credentials.len().to_string(),
            status,
        ]);
    }

    writeln!(io::stdout(), "{table}")?;
    Ok(())
}
