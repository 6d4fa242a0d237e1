//! Communicate with MPP solar inverters via their serial command protocol.
//!
//! # Overview
//!
//! The `mppsolar` crate implements the ASCII command protocol spoken by the
//! MPP family of solar inverters and charge controllers.
//! It offers an asynchronous, platform-agnostic API for querying device
//! information and live telemetry over the inverter's serial port.
//!
//! Depending on your needs, you can:
//!
//! - Use the typed queries on [`Inverter`] to obtain decoded telemetry.
//! - Use [`Inverter::query`] with a [`Query`] to dispatch queries by name.
//! - Send raw commands with [`Inverter::query_raw`].
//! - Work directly with the wire format in the [`frame`] module.
//!
//! # Getting started
//!
//! The inverter exposes an RS-232 port configured as follows:
//!
//! - **Baud rate:** 2400
//! - **Parity:** None
//! - **Data bits:** 8
//! - **Stop bits:** 1
//!
//! Any port implementing the [`embedded_io_async`] `Read` and `Write`
//! traits can be used. If you enable the `native-serial` feature, you can
//! obtain a compatible serial port instance using `serial::open`:
//!
//! ```ignore
//! let port = mppsolar::serial::open("/dev/ttyUSB0")?;
//! ```
//!
//! # Examples
//!
//! A port is split into an [`Inverter`] handle and the [`Connection`]
//! that owns the port. The connection must be driven for queries to
//! make progress, e.g. alongside the code using the handle:
//!
//! ```no_run
//! use mppsolar::{
//!     Config,
//!     embedded_io_async::{Read, Write},
//! };
//!
//! # async fn example<P: Read + Write>(port: P) -> mppsolar::Result<(), P::Error> {
//! let (inverter, connection) = mppsolar::connect(port, Config::default());
//!
//! let queries = async {
//!     let status = inverter.query_general_status(None).await?;
//!
//!     println!("Battery voltage: {} V", status.battery.voltage);
//!     println!("Working mode: {}", inverter.query_working_mode(None).await?);
//!
//!     Ok::<_, mppsolar::Error<P::Error>>(())
//! };
//!
//! tokio::select! {
//!     res = connection.run() => res,
//!     res = queries => res,
//! }
//! # }
//! ```
//!
//! # Protocol details
//!
//! The protocol is strictly half-duplex: the inverter only ever answers a
//! request and frames carry no request identifiers.
//! Responses are therefore matched to requests by order alone, and the
//! [`Connection`] never has more than one request outstanding on the line.
//! Requests issued concurrently through cloned [`Inverter`] handles are
//! queued and executed one after another in submission order.
//!
//! Response frames are protected by a CRC-16 checksum. Corrupted frames
//! are silently dropped, in which case the affected request times out.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod frame;
pub mod telemetry;

mod connection;
mod inverter;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use connection::Connection;
pub use embedded_io_async;
pub use inverter::Inverter;
pub use telemetry::{DecodeError, Query, Telemetry};

use core::{
    fmt::{Display, Formatter},
    time::Duration,
};
use embedded_io_async::{Read, Write};
use tokio::sync::mpsc;

/// Baud rate of the inverter's serial port.
pub const BAUD_RATE: u32 = 2400;

/// Time to wait for a response when no other timeout is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// A specialized [`Result`] type for inverter operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for inverter operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The command cannot be encoded into a request frame.
    InvalidArgument,
    /// No valid response was received within the configured timeout.
    Timeout,
    /// The response does not match the format expected for the command.
    Decode(DecodeError),
    /// The port encountered an unexpected end-of-file.
    UnexpectedEof,
    /// The connection is no longer running.
    Disconnected,
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Decode(err) => write!(f, "decode error: {err}"),
            Self::UnexpectedEof => write!(f, "unexpected end-of-file"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Connection settings.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Config {
    /// Time to wait for a response, unless overridden for a single query.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Splits a port into an [`Inverter`] handle and its [`Connection`].
///
/// The connection takes exclusive ownership of the port and must be
/// driven using [`Connection::run`] for any query to complete.
/// The handle can be cloned freely; all clones share the same request queue.
pub fn connect<P: Read + Write>(port: P, config: Config) -> (Inverter<P::Error>, Connection<P>) {
    let (tx, rx) = mpsc::unbounded_channel();

    (Inverter::new(tx, config), Connection::new(port, rx))
}

#[cfg(test)]
mod tests {
    use crate::{Connection, frame};
    use core::{fmt::Debug, future::Future, time::Duration};
    use embedded_io_adapters::tokio_1::FromTokio;
    use embedded_io_async::{Read, Write};
    use log::LevelFilter;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
        time,
    };

    pub type Port = FromTokio<DuplexStream>;

    pub fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    /// Returns a host port and the simulated inverter on its other end.
    pub fn pipe() -> (Port, FakeInverter) {
        let (host, dev) = tokio::io::duplex(1024);

        (FromTokio::new(host), FakeInverter { stream: dev })
    }

    /// Polls the test body while driving the connection.
    ///
    /// Panics if the connection stops before the test body completes.
    pub async fn drive<P, F>(connection: Connection<P>, test: F) -> F::Output
    where
        P: Read + Write,
        P::Error: Debug,
        F: Future,
    {
        tokio::select! {
            out = test => out,
            res = connection.run() => panic!("connection stopped: {res:?}"),
        }
    }

    /// Inverter side of a test pipe.
    pub struct FakeInverter {
        stream: DuplexStream,
    }

    impl FakeInverter {
        /// Reads the next request frame and returns its command.
        pub async fn expect_request(&mut self) -> String {
            let mut frame = Vec::new();

            loop {
                let byte = self.stream.read_u8().await.unwrap();

                frame.push(byte);

                if byte == frame::END {
                    break;
                }
            }

            assert_eq!(
                frame[..2],
                [frame::START, b'P'],
                "request frame header should be correct"
            );

            let cmd = String::from_utf8(frame[5..frame.len() - 1].to_vec()).unwrap();

            assert_eq!(
                frame,
                frame::encode_request(&cmd).unwrap(),
                "request frame should be correct"
            );

            cmd
        }

        /// Sends a response frame carrying the given payload.
        pub async fn respond(&mut self, payload: &str) {
            self.send_raw(&frame::encode_response(payload).unwrap())
                .await;
        }

        /// Sends raw bytes to the host.
        pub async fn send_raw(&mut self, data: &[u8]) {
            self.stream.write_all(data).await.unwrap();
        }

        /// Asserts that the host sends nothing for the given duration.
        pub async fn expect_silence(&mut self, dur: Duration) {
            let res = time::timeout(dur, self.stream.read_u8()).await;

            assert!(res.is_err(), "host should not send anything");
        }
    }
}
