use crate::error::CoreError;
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Wire protocol version this build speaks.
pub const PROTOCOL_VERSION: u32 = 1;

// Main configuration structure
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)] // Ensure fields default if missing in config source
pub struct Config {
    pub global: GlobalConfig,
    pub ipc: IpcConfig,
    pub compositing: CompositingConfig,
    pub frame_tree: FrameTreeConfig,
    pub actor_system: ActorSystemConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// Renderer connection settings
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IpcConfig {
    pub protocol_version: u32,
    /// Buffer size of each connection's outgoing channel.
    pub channel_capacity: usize,
    /// Ask the process host to kill a renderer after it sends a bad message.
    pub terminate_misbehaving_processes: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            channel_capacity: 256,
            terminate_misbehaving_processes: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CompositingConfig {
    /// Register child frames as independent surfaces instead of proxying whole frames.
    pub use_surfaces: bool,
    /// Pending frame acknowledgements past this count mean the peer never acks.
    pub max_pending_acks: u32,
    /// First surface id namespace handed to child frame views.
    pub surface_namespace_base: u32,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            use_surfaces: true,
            max_pending_acks: 1000,
            surface_namespace_base: 1,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FrameTreeConfig {
    /// Cross-process frame isolation: every process holding a proxy for a
    /// parent also gets proxies for its new children.
    pub site_per_process: bool,
}

impl Default for FrameTreeConfig {
    fn default() -> Self {
        Self {
            site_per_process: true,
        }
    }
}

// Actor system tuning parameters
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ActorSystemConfig {
    pub mailbox_capacity: usize,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
        }
    }
}

/// Loads configuration from `tessera.toml` (if present) and the environment.
///
/// Environment variables are prefixed with `TESSERA_` and use `__` for
/// nesting, e.g. `TESSERA_COMPOSITING__USE_SURFACES=false`.
pub fn load_config() -> Result<Config, CoreError> {
    build_config(ConfigLoader::builder().add_source(File::with_name("tessera").required(false)))
}

/// Loads configuration from an explicit file, still honouring environment overrides.
pub fn load_config_from(path: &Path) -> Result<Config, CoreError> {
    log::debug!("Loading configuration from: {:?}", path);
    build_config(ConfigLoader::builder().add_source(File::from(path).required(true)))
}

fn build_config(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Config, CoreError> {
    let cfg = builder
        .add_source(
            Environment::with_prefix("TESSERA")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Config>()?;

    if cfg.ipc.protocol_version != PROTOCOL_VERSION {
        log::warn!(
            "Configured protocol version {} differs from the compiled version {}; using {}",
            cfg.ipc.protocol_version,
            PROTOCOL_VERSION,
            PROTOCOL_VERSION
        );
        return Ok(Config {
            ipc: IpcConfig {
                protocol_version: PROTOCOL_VERSION,
                ..cfg.ipc
            },
            ..cfg
        });
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.global.log_level, "info");
        assert!(cfg.compositing.use_surfaces);
        assert_eq!(cfg.compositing.max_pending_acks, 1000);
        assert!(cfg.frame_tree.site_per_process);
        assert_eq!(cfg.ipc.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[compositing]\nuse_surfaces = false\nmax_pending_acks = 8\n\n[ipc]\nprotocol_version = 99"
        )
        .unwrap();

        let cfg = load_config_from(file.path()).unwrap();
        assert!(!cfg.compositing.use_surfaces);
        assert_eq!(cfg.compositing.max_pending_acks, 8);
        // Untouched sections keep their defaults.
        assert!(cfg.frame_tree.site_per_process);
        assert_eq!(cfg.ipc.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config_from(Path::new("/definitely/not/here/tessera.toml"));
        assert!(matches!(err, Err(CoreError::ConfigLoad(_))));
    }
}
