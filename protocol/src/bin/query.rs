use clap::Parser;
use mppsolar::{Config, Query};
use std::{error::Error, time::Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Command to send, e.g. `GS` or `MOD`
    command: String,

    /// Serial port path
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Response timeout in milliseconds
    #[arg(short, long, default_value = "1500")]
    timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = Config {
        timeout: Duration::from_millis(args.timeout),
    };

    let port = mppsolar::serial::open(&args.port)?;
    let (inverter, connection) = mppsolar::connect(port, config);

    // Known commands are decoded, anything else is printed verbatim
    let query = async {
        match Query::from_command(&args.command) {
            Some(query) => {
                let telemetry = inverter.query(query, None).await?;

                println!("{telemetry:#?}");
            }
            None => println!("{}", inverter.query_raw(&args.command, None).await?),
        }

        Ok::<_, mppsolar::Error<mppsolar::serial::PortError>>(())
    };

    tokio::select! {
        res = connection.run() => res?,
        res = query => res?,
    }

    Ok(())
}
