mod poller;

use crate::poller::Poller;
use anyhow::Result;
use clap::Parser;
use mppsolar::{Query, Telemetry};
use serde::Serialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port path (e.g. /dev/ttyUSB0)
    serial_port: String,

    /// Comma-separated queries to poll (default: all)
    #[arg(short, long, value_parser = parse_query, value_delimiter = ',')]
    query: Vec<Query>,

    /// Seconds between polling rounds
    #[arg(short, long, default_value_t = 10)]
    interval: u64,

    /// Response timeout in seconds
    #[arg(short, long, default_value_t = 3)]
    timeout: u64,

    /// Consecutive failed polling rounds before reconnecting
    ///
    /// A round fails at its first failed query and counts as a single error.
    #[arg(long, default_value_t = 3)]
    max_errors: u32,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value_t = 20)]
    reconnect_delay: u64,

    /// Run a single polling round and exit
    #[arg(long)]
    once: bool,
}

/// Polling result printed as a single JSON line.
#[derive(Serialize, Debug)]
struct Message<'a> {
    topic: &'static str,
    payload: &'a Telemetry,
}

fn parse_query(name: &str) -> Result<Query, String> {
    name.trim()
        .parse()
        .map_err(|_| format!("unknown query {name:?}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let queries = if args.query.is_empty() {
        Query::ALL.to_vec()
    } else {
        args.query
    };
    let poller = Poller {
        path: args.serial_port,
        queries,
        interval: Duration::from_secs(args.interval),
        timeout: Duration::from_secs(args.timeout),
        max_errors: args.max_errors,
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        once: args.once,
    };

    poller
        .run(|query, telemetry| {
            let msg = Message {
                topic: query.topic(),
                payload: telemetry,
            };

            println!("{}", serde_json::to_string(&msg)?);

            Ok(())
        })
        .await
}
