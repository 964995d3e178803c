use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use uproxy_deploy::{DEFAULT_INITIALIZER, ProxyKind};

#[derive(Parser)]
#[command(name = "uproxy")]
#[command(
    author,
    version,
    about = "Deploy and upgrade contracts behind ERC-1967 proxies"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "UPROXY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Uproxy.toml configuration file.
    ///
    /// If not provided, ./Uproxy.toml is read when it exists.
    #[arg(long, alias = "conf", global = true, env = "UPROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding compiled contract artifacts.
    #[arg(long, global = true, env = "UPROXY_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Directory holding network manifests and run locks.
    #[arg(long, global = true, env = "UPROXY_MANIFESTS")]
    pub manifests: Option<PathBuf>,

    /// Print the run record as JSON on stdout.
    #[arg(long, global = true, env = "UPROXY_JSON")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a contract behind a new proxy and print the proxy address.
    Deploy(DeployArgs),
    /// Point an existing proxy at a new implementation.
    Upgrade(UpgradeArgs),
    /// List the configured networks.
    Networks,
    /// Print the signer addresses of a network, in order.
    Signers {
        /// Network name. Defaults to the configured default network.
        #[arg(short, long, env = "UPROXY_NETWORK")]
        network: Option<String>,
    },
    /// Check offline that one contract can replace another behind a proxy.
    ValidateUpgrade {
        /// Contract currently deployed.
        #[arg(long)]
        from: String,
        /// Contract to upgrade to.
        #[arg(long)]
        to: String,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct DeployArgs {
    /// Network name. Defaults to the configured default network.
    #[arg(short, long, env = "UPROXY_NETWORK")]
    pub network: Option<String>,

    /// Name of the implementation contract.
    #[arg(short, long, env = "UPROXY_CONTRACT")]
    pub contract: String,

    /// Index of the signer to deploy with.
    #[arg(long, env = "UPROXY_SIGNER_INDEX")]
    pub signer_index: Option<usize>,

    /// Proxy pattern.
    ///
    /// Defaults to uups when the implementation has an upgradeToAndCall or
    /// upgradeTo function, transparent otherwise.
    #[arg(long, env = "UPROXY_KIND")]
    pub kind: Option<ProxyKind>,

    /// Initializer called through the proxy.
    #[arg(long, env = "UPROXY_INITIALIZER", default_value = DEFAULT_INITIALIZER)]
    pub initializer: String,

    /// Artifact of the proxy contract.
    ///
    /// Defaults to ERC1967Proxy for uups and TransparentUpgradeableProxy for transparent.
    #[arg(long, env = "UPROXY_PROXY_CONTRACT")]
    pub proxy_contract: Option<String>,

    /// Initializer arguments. Integers accept exponent notation (1000e18).
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct UpgradeArgs {
    /// Network name. Defaults to the configured default network.
    #[arg(short, long, env = "UPROXY_NETWORK")]
    pub network: Option<String>,

    /// Address of the proxy to upgrade.
    #[arg(short, long, env = "UPROXY_PROXY")]
    pub proxy: String,

    /// Name of the new implementation contract.
    #[arg(short, long, env = "UPROXY_CONTRACT")]
    pub contract: String,

    /// Index of the signer to upgrade with.
    #[arg(long, env = "UPROXY_SIGNER_INDEX")]
    pub signer_index: Option<usize>,

    /// Contract whose storage layout is currently behind the proxy.
    ///
    /// Overrides the layout recorded in the network manifest.
    #[arg(long, env = "UPROXY_REFERENCE")]
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "uproxy",
            "deploy",
            "--network",
            "local",
            "--contract",
            "Marketplace",
            "1000e18",
            "0",
        ])
        .unwrap();

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.network.as_deref(), Some("local"));
        assert_eq!(args.kind, None);
        assert_eq!(args.initializer, "initialize");
        assert_eq!(args.args, vec!["1000e18", "0"]);
    }

    #[test]
    fn test_parse_upgrade_with_global_flags() {
        let cli = Cli::try_parse_from([
            "uproxy",
            "upgrade",
            "--proxy",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            "--contract",
            "MarketplaceV2",
            "--reference",
            "Marketplace",
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        let Command::Upgrade(args) = cli.command else {
            panic!("expected upgrade");
        };
        assert_eq!(args.reference.as_deref(), Some("Marketplace"));
        assert_eq!(args.signer_index, None);
    }

    #[test]
    fn test_parse_transparent_kind() {
        let cli = Cli::try_parse_from([
            "uproxy",
            "deploy",
            "--contract",
            "Marketplace",
            "--kind",
            "transparent",
        ])
        .unwrap();

        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.kind, Some(ProxyKind::Transparent));
        assert!(args.args.is_empty());
    }
}
