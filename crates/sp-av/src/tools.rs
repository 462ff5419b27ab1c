//! External player/decoder discovery.
//!
//! The [`ToolRegistry`] locates the ffmpeg-family programs segpipe can pipe
//! segments into and resolves the configured decoder program to a path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sp_core::config::ToolsConfig;
use sp_core::{Error, Result};

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffplay"];

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry of discovered tool paths.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured override is used when it exists; otherwise [`which::which`]
    /// searches `PATH`. Tools that are not found are omitted.
    pub fn discover(tools_config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffplay" => tools_config.ffplay_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "Configured tool path does not exist; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Path of a discovered tool.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.tools
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                Error::decoder_start(name, format!("{name} not found; is it installed and in PATH?"))
            })
    }

    /// Resolve the configured decoder program.
    ///
    /// Explicit paths are used as-is, known tool names go through the
    /// registry, and anything else is looked up in `PATH`.
    pub fn resolve(&self, program: &Path) -> Result<PathBuf> {
        if program.components().count() > 1 || program.is_absolute() {
            return if program.exists() {
                Ok(program.to_path_buf())
            } else {
                Err(Error::decoder_start(
                    program.display().to_string(),
                    "program does not exist",
                ))
            };
        }

        let name = program.to_string_lossy();
        if KNOWN_TOOLS.contains(&name.as_ref()) {
            return self.require(&name).map(Path::to_path_buf);
        }

        which::which(program)
            .map_err(|e| Error::decoder_start(name.to_string(), format!("not found in PATH: {e}")))
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
