//! multiorch is the cluster orchestrator: it observes component records in
//! the topology and coordinates failovers.

#[macro_use]
extern crate slog_scope;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use multipg_daemons::{logging, open_topo_store, shutdown_signal};
use multipg_settings::Settings;

const USAGE: &str = "
Usage: multiorch [options]

Options:
    -h, --help               Show this message.
    --grpc-port=PORT         Port for the gRPC server.
    --topology-addr=ADDR     Address of the topology endpoint to manage.
    --log-level=LEVEL        Log level (debug, info, warn, error).
    --config=CONFIGFILE      Configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_grpc_port: Option<u16>,
    flag_topology_addr: Option<String>,
    flag_log_level: Option<String>,
    flag_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let mut settings = Settings::with_env_and_config_file("multiorch", args.flag_config.as_deref())?;
    if let Some(port) = args.flag_grpc_port {
        settings.grpc_port = port;
    }
    if let Some(addr) = args.flag_topology_addr {
        settings.topology_addr = Some(addr);
    }
    if let Some(level) = args.flag_log_level {
        settings.log_level = level;
    }

    logging::init_logging(!settings.human_logs, &settings.log_level);
    info!("starting multiorch";
        "banner" => settings.banner("multiorch"),
        "topology_addr" => settings.topology_addr.as_deref().unwrap_or("<unset>"),
    );

    let ts = open_topo_store(&settings)?;

    // TODO: start the failover state machine on top of pooler watches once
    // it is ported.
    info!("multiorch ready");

    shutdown_signal().await;
    info!("shutting down multiorch");
    ts.close()?;
    logging::reset_logging();

    Ok(())
}
