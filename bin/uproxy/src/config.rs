//! Configuration loading: built-in networks, then Uproxy.toml, then `UPROXY_*` variables.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use uproxy_deploy::{UproxyConfig, config::UPROXY_CONF_FILENAME};

/// Load the configuration.
///
/// An explicit `path` must exist. Without one, `./Uproxy.toml` is used when present.
pub fn load_config(path: Option<&Path>) -> Result<UproxyConfig> {
    let file = match path {
        Some(path) => {
            anyhow::ensure!(
                path.is_file(),
                "Configuration file not found: {}",
                path.display()
            );
            path
        }
        None => Path::new(UPROXY_CONF_FILENAME),
    };

    let config: UproxyConfig = figment(file)
        .merge(Env::prefixed("UPROXY_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", file.display()))?;

    tracing::debug!(
        config_path = %file.display(),
        networks = config.networks.len(),
        default_network = %config.default_network,
        "Configuration loaded"
    );

    Ok(config)
}

/// Defaults layered under a TOML file. A missing file contributes nothing.
fn figment(file: &Path) -> Figment {
    Figment::from(Serialized::defaults(UproxyConfig::default())).merge(Toml::file(file))
}
