use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use mppsolar::{Config, Inverter, Query, Telemetry, serial};
use tokio::time::{self, Duration, MissedTickBehavior};

/// Periodically queries an inverter, reconnecting whenever it stops responding.
#[derive(Debug)]
pub struct Poller {
    pub path: String,
    pub queries: Vec<Query>,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_errors: u32,
    pub reconnect_delay: Duration,
    pub once: bool,
}

impl Poller {
    /// Polls until a single round has completed (if `once` is set) or forever.
    ///
    /// Every successful query result is passed to `publish`.
    pub async fn run<F>(&self, mut publish: F) -> Result<()>
    where
        F: FnMut(Query, &Telemetry) -> Result<()>,
    {
        loop {
            let res = self.session(&mut publish).await;

            if self.once {
                return res;
            }

            if let Err(err) = res {
                warn!("Connection reset: {err:#}");
            }

            debug!("Reconnecting in {:?}", self.reconnect_delay);
            time::sleep(self.reconnect_delay).await;
        }
    }

    /// Opens the port and polls until the connection needs to be reset.
    async fn session<F>(&self, publish: &mut F) -> Result<()>
    where
        F: FnMut(Query, &Telemetry) -> Result<()>,
    {
        let port = serial::open(&self.path).context("Failed to open serial port")?;
        let (inverter, connection) = mppsolar::connect(
            port,
            Config {
                timeout: self.timeout,
            },
        );

        info!("Connected to {}", self.path);

        tokio::select! {
            res = connection.run() => res.context("Connection failed"),
            res = self.poll(&inverter, publish) => res,
        }
    }

    /// Runs polling rounds until too many consecutive rounds have failed.
    ///
    /// A round stops at its first failed query.
    async fn poll<E, F>(&self, inverter: &Inverter<E>, publish: &mut F) -> Result<()>
    where
        E: core::error::Error,
        F: FnMut(Query, &Telemetry) -> Result<()>,
    {
        let mut interval = time::interval(self.interval);
        let mut errors = 0;

        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let mut failed = false;

            for &query in &self.queries {
                match inverter.query(query, None).await {
                    Ok(telemetry) => {
                        publish(query, &telemetry).context("Failed to publish result")?;
                    }
                    Err(err) => {
                        warn!("Failed to query {query}: {err}");
                        failed = true;

                        break;
                    }
                }
            }

            if failed {
                errors += 1;

                if self.once {
                    bail!("Polling round failed");
                }

                if errors >= self.max_errors {
                    bail!("{errors} consecutive polling rounds failed");
                }
            } else {
                errors = 0;

                if self.once {
                    return Ok(());
                }
            }
        }
    }
}
