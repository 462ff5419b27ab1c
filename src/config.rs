pub use sp_core::config::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    expand_paths(&mut config);

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./segpipe.toml",
        "~/.config/segpipe/config.toml",
        "/etc/segpipe/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Reject values the streaming core cannot run with; log the rest.
fn validate_config(config: &Config) -> Result<()> {
    if config.decoder.program.as_os_str().is_empty() {
        anyhow::bail!("decoder.program cannot be empty");
    }
    if config.pipe.queue_chunks == 0 {
        anyhow::bail!("pipe.queue_chunks must be at least 1");
    }
    if config.source.block_pages == 0 {
        anyhow::bail!("source.block_pages must be at least 1");
    }
    if config.source.stall_timeout_secs == 0 {
        anyhow::bail!("source.stall_timeout_secs must be at least 1");
    }

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    Ok(())
}

fn expand_paths(config: &mut Config) {
    for path in [
        config.decoder.output.as_mut(),
        config.mirror.dir.as_mut(),
        config.store.dir.as_mut(),
        config.tools.ffmpeg_path.as_mut(),
        config.tools.ffplay_path.as_mut(),
    ]
    .into_iter()
    .flatten()
    {
        *path = expand(path);
    }
}

fn expand(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}
