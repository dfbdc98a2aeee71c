//! multigateway is the top-level proxy that masquerades as a PostgreSQL
//! server, handling client connections and routing queries to multipooler
//! instances.

#[macro_use]
extern crate slog_scope;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use multipg_daemons::{logging, open_topo_store, shutdown_signal};
use multipg_settings::Settings;

const USAGE: &str = "
Usage: multigateway [options]

Options:
    -h, --help               Show this message.
    -p, --port=PORT          Port to listen on for client connections.
    --grpc-port=PORT         Port for the gRPC server.
    --log-level=LEVEL        Log level (debug, info, warn, error).
    --config=CONFIGFILE      Configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_port: Option<u16>,
    flag_grpc_port: Option<u16>,
    flag_log_level: Option<String>,
    flag_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let mut settings = Settings::with_env_and_config_file("multigateway", args.flag_config.as_deref())?;
    if let Some(port) = args.flag_grpc_port {
        settings.grpc_port = port;
    }
    if let Some(level) = args.flag_log_level {
        settings.log_level = level;
    }
    let client_port = args.flag_port.unwrap_or(5432);

    logging::init_logging(!settings.human_logs, &settings.log_level);
    info!("starting multigateway";
        "banner" => settings.banner("multigateway"),
        "client_port" => client_port,
    );

    let ts = open_topo_store(&settings)?;

    // TODO: bring up the pgwire listener and the query router once the
    // proxy lands; both consume the topology store opened above.
    info!("multigateway ready to accept connections");

    shutdown_signal().await;
    info!("shutting down multigateway");
    ts.close()?;
    logging::reset_logging();

    Ok(())
}
