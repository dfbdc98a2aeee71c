//! multipooler manages PostgreSQL connection pooling for one cell and
//! registers itself in the cell's topology.

#[macro_use]
extern crate slog_scope;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use multipg_daemons::{logging, open_topo_store, shutdown_signal};
use multipg_settings::Settings;

const USAGE: &str = "
Usage: multipooler [options]

Options:
    -h, --help               Show this message.
    --grpc-port=PORT         Port for the gRPC server.
    --log-level=LEVEL        Log level (debug, info, warn, error).
    --config=CONFIGFILE      Configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_grpc_port: Option<u16>,
    flag_log_level: Option<String>,
    flag_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let mut settings = Settings::with_env_and_config_file("multipooler", args.flag_config.as_deref())?;
    if let Some(port) = args.flag_grpc_port {
        settings.grpc_port = port;
    }
    if let Some(level) = args.flag_log_level {
        settings.log_level = level;
    }

    logging::init_logging(!settings.human_logs, &settings.log_level);
    info!("starting multipooler"; "banner" => settings.banner("multipooler"));

    let ts = open_topo_store(&settings)?;

    // TODO: register this pooler in its cell (init_multi_pooler) once the
    // pool manager knows its cell, database and shard assignment.
    info!("multipooler ready");

    shutdown_signal().await;
    info!("shutting down multipooler");
    ts.close()?;
    logging::reset_logging();

    Ok(())
}
