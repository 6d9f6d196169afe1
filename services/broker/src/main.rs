use broker::{Broker, BrokerConfig};
use clap::{Arg, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

fn validate_bind_addr(value: &str) -> Result<String, String> {
    value
        .parse::<SocketAddr>()
        .map(|_| value.to_owned())
        .map_err(|_| "Invalid socket address".to_owned())
}

fn validate_timeout_ms(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(0) | Err(_) => Err("Invalid timeout in milliseconds".to_owned()),
        Ok(ms) => Ok(ms),
    }
}

fn validate_existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err("Config file doesn't exist on the file system".to_owned())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "broker starting");

    let matches = Command::new("Rusty MQ: Broker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("An in-memory pub/sub and query/reply message broker")
        .arg(
            Arg::new("config")
                .help("Path to a TOML config file")
                .short('c')
                .long("config")
                .value_parser(validate_existing_file),
        )
        .arg(
            Arg::new("bind")
                .help("The socket address to listen on. Eg. 0.0.0.0:45784")
                .short('b')
                .long("bind")
                .value_parser(validate_bind_addr),
        )
        .arg(
            Arg::new("ack_timeout_ms")
                .help("How long an unacked delivery may stay inflight before it is presumed dead")
                .long("ack-timeout-ms")
                .value_parser(validate_timeout_ms),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => match broker::load_config_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => BrokerConfig::default(),
    };
    if let Some(bind) = matches.get_one::<String>("bind") {
        config.bind = bind.clone();
    }
    if let Some(ack_timeout_ms) = matches.get_one::<u64>("ack_timeout_ms") {
        config.ack_timeout_ms = *ack_timeout_ms;
        config.sweep_interval_ms = (*ack_timeout_ms / 2).max(1);
    }

    let broker = match Broker::bind(config).await {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("Unable to bind listen address: {e}");
            std::process::exit(1);
        }
    };

    tokio::select! {
        () = broker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
