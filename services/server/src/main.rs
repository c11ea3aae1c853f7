use clap::{Arg, Command};
use server::{Server, ServerConfig};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "chat server starting");

    let matches = Command::new("Chat Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Line-oriented chat and coordination server")
        .arg(
            Arg::new("port")
                .help("Control port to bind")
                .short('p')
                .long("port")
                .value_parser(clap::value_parser!(u16))
                .default_value("1337"),
        )
        .arg(
            Arg::new("relay_port")
                .help("Auxiliary byte-relay port to bind")
                .short('r')
                .long("relay-port")
                .value_parser(clap::value_parser!(u16))
                .default_value("1338"),
        )
        .arg(
            Arg::new("ping_interval_ms")
                .help("Heartbeat PING interval in milliseconds")
                .long("ping-interval-ms")
                .value_parser(clap::value_parser!(u64))
                .default_value("10000"),
        )
        .arg(
            Arg::new("pong_timeout_ms")
                .help("How long to wait for a PONG before hanging up, in milliseconds")
                .long("pong-timeout-ms")
                .value_parser(clap::value_parser!(u64))
                .default_value("2000"),
        )
        .arg(
            Arg::new("relay_timeout_ms")
                .help("How long a transfer may wait for both relay peers, in milliseconds")
                .long("relay-timeout-ms")
                .value_parser(clap::value_parser!(u64))
                .default_value("60000"),
        )
        .get_matches();

    let config = ServerConfig {
        port: *matches.get_one::<u16>("port").expect("port has a default"),
        relay_port: *matches
            .get_one::<u16>("relay_port")
            .expect("relay_port has a default"),
        ping_interval: Duration::from_millis(
            *matches
                .get_one::<u64>("ping_interval_ms")
                .expect("ping_interval_ms has a default"),
        ),
        pong_timeout: Duration::from_millis(
            *matches
                .get_one::<u64>("pong_timeout_ms")
                .expect("pong_timeout_ms has a default"),
        ),
        relay_timeout: Duration::from_millis(
            *matches
                .get_one::<u64>("relay_timeout_ms")
                .expect("relay_timeout_ms has a default"),
        ),
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("FATAL: failed to bind: {e}");
            std::process::exit(1);
        }
    };
    if let (Ok(control), Ok(relay)) = (server.control_addr(), server.relay_addr()) {
        info!(control = %control, relay = %relay, "listening");
    }

    tokio::select! {
        () = server.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
}
