//! Daemon configuration.
//!
//! Every daemon loads the same [`Settings`] shape from, in order of
//! precedence: an explicit `--config` file, the conventional locations
//! (`/etc/multipg/<daemon>.yaml`, `./<daemon>.yaml`, `./config/<daemon>.yaml`),
//! and environment variables prefixed with the daemon name
//! (`MULTIGATEWAY_TOPO__GLOBAL_ROOT=/topo` sets `topo.global_root`).

#[macro_use]
extern crate slog_scope;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Where the topology store lives, as every daemon needs to know it.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TopoSettings {
    /// Topology backend implementation name (e.g. `memory`, `etcd`).
    pub implementation: String,
    /// Addresses of the global topology servers.
    pub global_server_addresses: Vec<String>,
    /// Root path inside the backend for the global topology.
    pub global_root: String,
}

impl Default for TopoSettings {
    fn default() -> Self {
        Self {
            implementation: "memory".to_owned(),
            global_server_addresses: Vec::new(),
            global_root: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Port the daemon's gRPC server listens on.
    pub grpc_port: u16,
    /// One of `debug`, `info`, `warn`, `error`.
    pub log_level: String,
    /// Human-readable terminal logs instead of JSON.
    pub human_logs: bool,
    /// Address of the orchestrator's topology endpoint, for daemons that
    /// report to it.
    pub topology_addr: Option<String>,
    pub topo: TopoSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grpc_port: 15_100,
            log_level: "info".to_owned(),
            human_logs: false,
            topology_addr: None,
            topo: TopoSettings::default(),
        }
    }
}

impl Settings {
    /// Load the settings for `daemon` from the config file if supplied, the
    /// conventional file locations otherwise, then the environment.
    pub fn with_env_and_config_file(
        daemon: &str,
        filename: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        match filename {
            Some(config_filename) => {
                s.merge(File::with_name(config_filename))?;
            }
            None => {
                for location in [
                    format!("/etc/multipg/{}", daemon),
                    daemon.to_owned(),
                    format!("config/{}", daemon),
                ] {
                    s.merge(File::with_name(&location).required(false))?;
                }
            }
        }

        // Environment overrides. The prefix is the daemon name so several
        // daemons can coexist on one host; `__` separates nesting levels,
        // e.g. `MULTIPOOLER_TOPO__GLOBAL_ROOT`.
        s.merge(Environment::with_prefix(&daemon.to_uppercase()).separator("__"))?;

        match s.try_into::<Self>() {
            Ok(s) => Ok(s),
            // Configuration errors are not very sysop friendly; try to make
            // them a bit more 3AM useful.
            Err(ConfigError::Message(v)) => {
                println!("Bad configuration: {:?}", &v);
                println!("Please set in config file or use environment variable.");
                println!(
                    "For example to set `grpc_port` use env var `{}_GRPC_PORT`\n",
                    daemon.to_uppercase()
                );
                error!("Configuration error: Value undefined {:?}", &v);
                Err(ConfigError::NotFound(v))
            }
            Err(e) => {
                error!("Configuration error: Other: {:?}", &e);
                Err(e)
            }
        }
    }

    /// A one-line summary for the startup log.
    pub fn banner(&self, daemon: &str) -> String {
        format!(
            "{} grpc=:{} topo={}:{}{}",
            daemon,
            self.grpc_port,
            self.topo.implementation,
            self.topo.global_server_addresses.join(","),
            self.topo.global_root
        )
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    #[test]
    fn environment_variable_prefix_is_per_daemon() {
        env::set_var("MULTIPOOLER_GRPC_PORT", "16100");
        let settings = Settings::with_env_and_config_file("multipooler", None).unwrap();
        assert_eq!(settings.grpc_port, 16_100);

        // Another daemon's prefix doesn't leak in.
        let settings = Settings::with_env_and_config_file("multigateway", None).unwrap();
        assert_eq!(settings.grpc_port, 15_100);
        env::remove_var("MULTIPOOLER_GRPC_PORT");
    }

    #[test]
    fn nested_topo_settings_from_env() {
        env::set_var("PGCTLD_TOPO__GLOBAL_ROOT", "/multipg/global");
        let settings = Settings::with_env_and_config_file("pgctld", None).unwrap();
        assert_eq!(settings.topo.global_root, "/multipg/global");
        env::remove_var("PGCTLD_TOPO__GLOBAL_ROOT");
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.topo.implementation, "memory");
        assert!(settings.topology_addr.is_none());
    }
}
