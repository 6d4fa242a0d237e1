use crate::{Error, Result, frame::FrameDecoder};
use core::time::Duration;
use embedded_io_async::{ErrorType, Read, Write};
use log::{debug, trace};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};

/// Maximum number of bytes taken from the port per read.
const READ_CHUNK_SIZE: usize = 64;

/// Wait used for timeouts too large to be represented as a deadline.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Query waiting in the request queue.
#[derive(Debug)]
pub(crate) struct Request<E> {
    /// Command name, used for logging.
    pub(crate) cmd: String,
    /// Encoded request frame.
    pub(crate) frame: Vec<u8>,
    pub(crate) timeout: Duration,
    pub(crate) reply: oneshot::Sender<Result<String, E>>,
}

/// Worker owning the port of a single inverter.
///
/// The connection executes queued requests strictly one at a time and in
/// submission order. Every request is sent to the port, after which the
/// first valid response payload is taken as its reply. If no payload
/// arrives within the request's timeout, the request fails with
/// [`Error::Timeout`]. Either way, the next request is only sent
/// once the previous exchange has concluded.
///
/// Requests whose caller stopped waiting before they were sent are skipped.
/// A request abandoned while in flight still runs to completion so that its
/// response cannot be mistaken for the reply to the next request.
///
/// Obtained together with its [`Inverter`](crate::Inverter) handle
/// from [`connect`](crate::connect).
#[derive(Debug)]
pub struct Connection<P: ErrorType> {
    port: P,
    decoder: FrameDecoder,
    requests: mpsc::UnboundedReceiver<Request<P::Error>>,
    buf: [u8; READ_CHUNK_SIZE],
}

impl<P: Read + Write> Connection<P> {
    pub(crate) fn new(port: P, requests: mpsc::UnboundedReceiver<Request<P::Error>>) -> Self {
        Self {
            port,
            decoder: FrameDecoder::new(),
            requests,
            buf: [0x00; READ_CHUNK_SIZE],
        }
    }

    /// Runs the connection until it is no longer needed or the port fails.
    ///
    /// Returns `Ok(())` once all [`Inverter`](crate::Inverter) handles have been dropped.
    /// Returns an error if reading from the port fails or the port reaches
    /// end-of-file. Requests that are queued or in flight at that point
    /// fail with [`Error::Disconnected`].
    ///
    /// The port's `read` must be cancel-safe, as reads are abandoned
    /// whenever a new request arrives while the line is idle.
    pub async fn run(mut self) -> Result<(), P::Error> {
        debug!("Connection started");

        loop {
            let req = tokio::select! {
                req = self.requests.recv() => match req {
                    Some(req) => req,
                    None => {
                        debug!("All handles dropped, stopping connection");

                        return Ok(());
                    }
                },
                res = self.port.read(&mut self.buf) => {
                    let len = res?;

                    self.receive_chunk(len)?;
                    self.discard_payloads();

                    continue;
                }
            };

            if req.reply.is_closed() {
                debug!("Skipping abandoned request {:?}", req.cmd);

                continue;
            }

            self.execute(req).await?;
        }
    }

    /// Performs a single request/response exchange.
    ///
    /// Only errors that render the port unusable are returned.
    /// The outcome of the exchange itself is delivered through the request's reply slot.
    async fn execute(&mut self, req: Request<P::Error>) -> Result<(), P::Error> {
        let Request {
            cmd,
            frame,
            timeout,
            reply,
        } = req;
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let mut reply = Some(reply);

        // Anything decoded so far cannot be the response to this request
        self.discard_payloads();

        match time::timeout_at(deadline, self.write(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("Failed to send request {cmd:?}");

                // The line stays reserved until the receive window has passed
                resolve(&mut reply, &cmd, Err(err));
            }
            Err(_) => {
                debug!("Request {cmd:?} timed out while sending");
                resolve(&mut reply, &cmd, Err(Error::Timeout));

                return Ok(());
            }
        }

        let res = match self.receive(deadline).await? {
            Some(payload) => Ok(payload),
            None => {
                debug!("Request {cmd:?} timed out");

                Err(Error::Timeout)
            }
        };

        resolve(&mut reply, &cmd, res);

        Ok(())
    }

    /// Waits for the next valid payload until the deadline.
    ///
    /// Returns `Ok(None)` if the deadline passes first.
    async fn receive(&mut self, deadline: Instant) -> Result<Option<String>, P::Error> {
        loop {
            if let Some(payload) = self.decoder.next_payload() {
                return Ok(Some(payload));
            }

            match time::timeout_at(deadline, self.port.read(&mut self.buf)).await {
                Ok(res) => {
                    let len = res?;

                    self.receive_chunk(len)?;
                }
                Err(_) => return Ok(None),
            }
        }
    }

    /// Feeds the first `len` bytes of the read buffer to the frame decoder.
    fn receive_chunk(&mut self, len: usize) -> Result<(), P::Error> {
        if len == 0 {
            return Err(Error::UnexpectedEof);
        }

        let data = &self.buf[..len];

        trace!("Read from port: {data:02x?}");
        self.decoder.push(data);

        Ok(())
    }

    /// Drops payloads that arrived without a request waiting for them.
    fn discard_payloads(&mut self) {
        while let Some(payload) = self.decoder.next_payload() {
            debug!("Discarding unsolicited payload {payload:?}");
        }
    }

    /// Writes the provided buffer to the port.
    async fn write(&mut self, buf: &[u8]) -> Result<(), P::Error> {
        trace!("Write to port: {buf:02x?}");
        self.port.write_all(buf).await?;
        self.port.flush().await?;

        Ok(())
    }
}

/// Delivers the outcome of a request, unless it has already been delivered.
fn resolve<E>(
    reply: &mut Option<oneshot::Sender<Result<String, E>>>,
    cmd: &str,
    res: Result<String, E>,
) {
    if let Some(reply) = reply.take() {
        if reply.send(res).is_err() {
            debug!("Discarding outcome of abandoned request {cmd:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Config, Error,
        tests::{Port, drive, init_logger, pipe},
    };
    use embedded_io_async::{ErrorType, Read, Write};
    use std::io;
    use tokio::time::Instant;
    use core::time::Duration;
    use tokio::time;

    fn config() -> Config {
        Config {
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn query() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "PI", "command should be correct");
            dev.respond("PI30").await;
        };

        let (_, res) = drive(connection, async {
            tokio::join!(device, inverter.query_raw("PI", None))
        })
        .await;

        assert_eq!(res.ok().as_deref(), Some("PI30"), "payload should be correct");
    }

    #[tokio::test]
    async fn timeout_then_recover() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "MOD", "command should be correct");
            assert_eq!(dev.expect_request().await, "PI", "command should be correct");
            dev.respond("PI30").await;
        };
        let queries = async {
            let first = inverter
                .query_raw("MOD", Some(Duration::from_millis(50)))
                .await;
            let second = inverter.query_raw("PI", None).await;

            (first, second)
        };

        let (_, (first, second)) =
            drive(connection, async { tokio::join!(device, queries) }).await;

        assert!(
            matches!(first, Err(Error::Timeout)),
            "first request should time out"
        );
        assert_eq!(
            second.ok().as_deref(),
            Some("PI30"),
            "second request should succeed"
        );
    }

    #[tokio::test]
    async fn serialize_concurrent_requests() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let other = inverter.clone();
        let device = async {
            let mut seen = Vec::new();

            for _ in 0..3 {
                let cmd = dev.expect_request().await;

                // Nothing else may be sent while this request is outstanding
                dev.expect_silence(Duration::from_millis(20)).await;
                dev.respond(&cmd).await;
                seen.push(cmd);
            }

            seen
        };

        let (seen, a, b, c) = drive(connection, async {
            tokio::join!(
                device,
                inverter.query_raw("A", None),
                other.query_raw("B", None),
                inverter.query_raw("C", None),
            )
        })
        .await;

        assert_eq!(seen, ["A", "B", "C"], "requests should be sent in order");
        assert_eq!(a.ok().as_deref(), Some("A"), "first reply should be correct");
        assert_eq!(b.ok().as_deref(), Some("B"), "second reply should be correct");
        assert_eq!(c.ok().as_deref(), Some("C"), "third reply should be correct");
    }

    #[tokio::test]
    async fn skip_abandoned_queued_request() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "A", "command should be correct");
            time::sleep(Duration::from_millis(50)).await;
            dev.respond("A").await;
            assert_eq!(dev.expect_request().await, "C", "command should be correct");
            dev.respond("C").await;
        };
        let queries = async {
            let abandoned = async {
                time::sleep(Duration::from_millis(5)).await;

                // Gives up while A is still in flight
                time::timeout(Duration::from_millis(10), inverter.query_raw("B", None)).await
            };
            let (a, b) = tokio::join!(inverter.query_raw("A", None), abandoned);
            let c = inverter.query_raw("C", None).await;

            (a, b, c)
        };

        let (_, (a, b, c)) = drive(connection, async { tokio::join!(device, queries) }).await;

        assert_eq!(a.ok().as_deref(), Some("A"), "first reply should be correct");
        assert!(b.is_err(), "abandoned request should not complete");
        assert_eq!(c.ok().as_deref(), Some("C"), "last reply should be correct");
    }

    #[tokio::test]
    async fn finish_abandoned_request_in_flight() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "A", "command should be correct");

            // The next request must wait for the abandoned exchange
            dev.expect_silence(Duration::from_millis(40)).await;
            dev.respond("A").await;
            assert_eq!(dev.expect_request().await, "B", "command should be correct");
            dev.respond("B").await;
        };
        let queries = async {
            let a = time::timeout(Duration::from_millis(10), inverter.query_raw("A", None)).await;
            let b = inverter.query_raw("B", None).await;

            (a, b)
        };

        let (_, (a, b)) = drive(connection, async { tokio::join!(device, queries) }).await;

        assert!(a.is_err(), "abandoned request should not complete");
        assert_eq!(
            b.ok().as_deref(),
            Some("B"),
            "reply should not be taken from the abandoned request"
        );
    }

    #[tokio::test]
    async fn discard_unsolicited_payload() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            dev.respond("first").await;
            time::sleep(Duration::from_millis(20)).await;
            assert_eq!(dev.expect_request().await, "PI", "command should be correct");
            dev.respond("second").await;
        };
        let query = async {
            time::sleep(Duration::from_millis(40)).await;
            inverter.query_raw("PI", None).await
        };

        let (_, res) = drive(connection, async { tokio::join!(device, query) }).await;

        assert_eq!(res.ok().as_deref(), Some("second"), "payload should be correct");
    }

    #[tokio::test]
    async fn skip_corrupted_response() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "PI", "command should be correct");

            let mut corrupted = crate::frame::encode_response("first").unwrap();
            let len = corrupted.len();

            corrupted[len - 2] ^= 0x01;
            dev.send_raw(&corrupted).await;
            dev.respond("second").await;
        };

        let (_, res) = drive(connection, async {
            tokio::join!(device, inverter.query_raw("PI", None))
        })
        .await;

        assert_eq!(res.ok().as_deref(), Some("second"), "payload should be correct");
    }

    #[tokio::test]
    async fn reject_unframeable_command() {
        init_logger();

        let (port, _dev) = pipe();
        let (inverter, _connection) = crate::connect(port, config());

        assert!(
            matches!(
                inverter.query_raw("P\rI", None).await,
                Err(Error::InvalidArgument)
            ),
            "result should be invalid argument error"
        );
    }

    #[tokio::test]
    async fn stop_when_handles_dropped() {
        init_logger();

        let (port, _dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());

        drop(inverter);

        assert!(
            connection.run().await.is_ok(),
            "connection should stop without error"
        );
    }

    #[tokio::test]
    async fn error_unexpected_eof() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async move {
            dev.expect_request().await;
            drop(dev);
        };

        let (res, (), query) =
            tokio::join!(connection.run(), device, inverter.query_raw("PI", None));

        assert!(
            matches!(res, Err(Error::UnexpectedEof)),
            "connection should stop with unexpected end-of-file error"
        );
        assert!(
            matches!(query, Err(Error::Disconnected)),
            "pending request should fail with disconnected error"
        );
    }

    #[tokio::test]
    async fn error_disconnected() {
        init_logger();

        let (port, _dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());

        drop(connection);

        assert!(
            matches!(
                inverter.query_raw("PI", None).await,
                Err(Error::Disconnected)
            ),
            "result should be disconnected error"
        );
    }

    /// Port whose first write fails.
    struct FailFirstWrite {
        inner: Port,
        failed: bool,
    }

    impl ErrorType for FailFirstWrite {
        type Error = io::Error;
    }

    impl Read for FailFirstWrite {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
            self.inner.read(buf).await
        }
    }

    impl Write for FailFirstWrite {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, io::Error> {
            if self.failed {
                self.inner.write(buf).await
            } else {
                self.failed = true;

                Err(io::ErrorKind::BrokenPipe.into())
            }
        }

        async fn flush(&mut self) -> Result<(), io::Error> {
            self.inner.flush().await
        }
    }

    #[tokio::test]
    async fn query_without_timeout() {
        init_logger();

        let (port, mut dev) = pipe();
        let (inverter, connection) = crate::connect(port, config());
        let device = async {
            assert_eq!(dev.expect_request().await, "PI", "command should be correct");
            dev.respond("PI30").await;
        };

        let (_, res) = drive(connection, async {
            tokio::join!(device, inverter.query_raw("PI", Some(Duration::MAX)))
        })
        .await;

        assert_eq!(res.ok().as_deref(), Some("PI30"), "payload should be correct");
    }

    #[tokio::test]
    async fn hold_line_after_write_error() {
        init_logger();

        let (port, mut dev) = pipe();
        let port = FailFirstWrite {
            inner: port,
            failed: false,
        };
        let timeout = Duration::from_millis(200);
        let (inverter, connection) = crate::connect(port, Config { timeout });
        let start = Instant::now();
        let device = async {
            assert_eq!(dev.expect_request().await, "B", "command should be correct");
            dev.respond("B").await;
        };
        let first = async {
            let res = inverter.query_raw("A", None).await;

            (res, start.elapsed())
        };
        let second = async {
            let res = inverter.query_raw("B", None).await;

            (res, start.elapsed())
        };

        let (_, (a, a_elapsed), (b, b_elapsed)) =
            drive(connection, async { tokio::join!(device, first, second) }).await;

        assert!(
            matches!(a, Err(Error::Io(ref err)) if err.kind() == io::ErrorKind::BrokenPipe),
            "first request should fail with input/output error"
        );
        assert!(a_elapsed < timeout, "write error should be returned immediately");
        assert_eq!(b.ok().as_deref(), Some("B"), "second reply should be correct");
        assert!(
            b_elapsed >= timeout,
            "second request should wait for the receive window of the first"
        );
    }
}
