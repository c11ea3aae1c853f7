use clap::{Arg, Command};
use client::ClientConfig;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let matches = Command::new("Chat Client")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interactive client for the line-oriented chat server")
        .arg(
            Arg::new("server")
                .help("Server control endpoint, host:port")
                .short('s')
                .long("server")
                .default_value("127.0.0.1:1337"),
        )
        .arg(
            Arg::new("relay_port")
                .help("Server byte-relay port")
                .short('r')
                .long("relay-port")
                .value_parser(clap::value_parser!(u16))
                .default_value("1338"),
        )
        .arg(
            Arg::new("downloads")
                .help("Directory for received files")
                .short('d')
                .long("downloads"),
        )
        .get_matches();

    let download_dir = matches
        .get_one::<String>("downloads")
        .map(PathBuf::from)
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = ClientConfig {
        server: matches
            .get_one::<String>("server")
            .expect("server has a default")
            .clone(),
        relay_port: *matches
            .get_one::<u16>("relay_port")
            .expect("relay_port has a default"),
        download_dir,
    };

    if let Err(e) = client::run(config).await {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
}
