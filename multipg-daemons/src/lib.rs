//! Wire-up shared by the multipg daemon binaries: logging bootstrap, the
//! shutdown signal, and the topology store opening dance.

#[macro_use]
extern crate slog_scope;

pub mod logging;

use multipg_common::ReportableError;
use multipg_settings::Settings;
use multipg_topo::TopoStore;

/// Resolve once the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt()).expect("cannot install SIGINT handler");
        let mut terminate = signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("cannot install ctrl-c handler");
    }
}

/// Open the topology store the settings point at, with the in-memory
/// backend registered so single-process setups work out of the box.
pub fn open_topo_store(settings: &Settings) -> Result<TopoStore, String> {
    multipg_topo_memory::register();
    TopoStore::open(
        &settings.topo.implementation,
        &settings.topo.global_root,
        &settings.topo.global_server_addresses,
    )
    .map_err(|e| {
        error!("failed to open topology store";
            "implementation" => &settings.topo.implementation,
            "addresses" => settings.topo.global_server_addresses.join(","),
            "root" => &settings.topo.global_root,
            "error" => %e,
            "backtrace" => e.error_backtrace(),
        );
        e.to_string()
    })
}
