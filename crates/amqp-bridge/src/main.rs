use amqp_bridge::config::{Args, BridgeConfig};
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprint!("{e}");
            return ExitCode::from(1);
        }
    };
    let verbose = args.verbose;

    let config = match BridgeConfig::from_args(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("amqp-bridge: {e}");
            return ExitCode::from(1);
        }
    };

    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    tracing::info!(cid = %config.cid, rbc = config.rbc, rbs = config.rbs, "amqp-bridge starting");

    amqp_bridge::supervisor::run(config).await;

    ExitCode::SUCCESS
}
