use crate::{
    Config, Error, Result,
    connection::Request,
    frame,
    telemetry::{
        self, Coded, DeviceModel, FeatureFlags, GeneralStatus, PowerStatus, Query,
        RatedInformation, Telemetry, Warning, WorkingMode, mode, rating, status,
    },
};
use core::{fmt::Debug, time::Duration};
use log::debug;
use tokio::sync::{mpsc, oneshot};

/// Handle for querying an inverter.
///
/// Queries are forwarded to the inverter's [`Connection`](crate::Connection),
/// which must be running for them to complete.
/// The handle is cheap to clone, and queries issued concurrently through
/// any of its clones are executed one after another in submission order.
///
/// Every query accepts an optional timeout that overrides the
/// [`Config::timeout`] for that query alone.
/// Dropping a query's future before it completes abandons the query.
pub struct Inverter<E> {
    requests: mpsc::UnboundedSender<Request<E>>,
    timeout: Duration,
}

impl<E> Inverter<E> {
    pub(crate) fn new(requests: mpsc::UnboundedSender<Request<E>>, config: Config) -> Self {
        Self {
            requests,
            timeout: config.timeout,
        }
    }

    /// Sends a raw command and returns the payload of its response.
    ///
    /// Returns [`Error::InvalidArgument`] if the command cannot be framed,
    /// i.e. it is too long or contains a frame marker byte.
    pub async fn query_raw(&self, cmd: &str, timeout: Option<Duration>) -> Result<String, E> {
        let frame = frame::encode_request(cmd).ok_or(Error::InvalidArgument)?;
        let (reply, rx) = oneshot::channel();
        let req = Request {
            cmd: cmd.to_string(),
            frame,
            timeout: timeout.unwrap_or(self.timeout),
            reply,
        };

        if self.requests.send(req).is_err() {
            debug!("Connection not running, dropping request {cmd:?}");

            return Err(Error::Disconnected);
        }

        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Sends a query and decodes its response.
    pub async fn query(&self, query: Query, timeout: Option<Duration>) -> Result<Telemetry, E> {
        let payload = self.query_raw(query.command(), timeout).await?;

        query.decode(&payload).map_err(Error::Decode)
    }

    /// Queries the protocol identifier, e.g. `PI17`.
    pub async fn query_protocol_id(&self, timeout: Option<Duration>) -> Result<String, E> {
        self.query_raw(Query::ProtocolId.command(), timeout).await
    }

    /// Queries the series number.
    pub async fn query_series_number(&self, timeout: Option<Duration>) -> Result<String, E> {
        self.query_decoded(Query::SeriesNumber, timeout, telemetry::decode_series_number)
            .await
    }

    /// Queries the main CPU firmware version.
    pub async fn query_cpu_version(&self, timeout: Option<Duration>) -> Result<String, E> {
        let payload = self.query_raw(Query::CpuVersion.command(), timeout).await?;

        Ok(telemetry::decode_cpu_version(&payload))
    }

    /// Queries the secondary CPU firmware version.
    pub async fn query_second_cpu_version(&self, timeout: Option<Duration>) -> Result<String, E> {
        let payload = self
            .query_raw(Query::SecondCpuVersion.command(), timeout)
            .await?;

        Ok(telemetry::decode_second_cpu_version(&payload))
    }

    /// Queries the device model.
    pub async fn query_device_model(&self, timeout: Option<Duration>) -> Result<DeviceModel, E> {
        self.query_decoded(Query::DeviceModel, timeout, rating::decode_device_model)
            .await
    }

    /// Queries the rated information.
    pub async fn query_rated_information(
        &self,
        timeout: Option<Duration>,
    ) -> Result<RatedInformation, E> {
        self.query_decoded(
            Query::RatedInformation,
            timeout,
            rating::decode_rated_information,
        )
        .await
    }

    /// Queries the general status, e.g. voltages and frequencies.
    pub async fn query_general_status(
        &self,
        timeout: Option<Duration>,
    ) -> Result<GeneralStatus, E> {
        self.query_decoded(Query::GeneralStatus, timeout, status::decode_general_status)
            .await
    }

    /// Queries the power status, e.g. power per phase and power flow directions.
    pub async fn query_power_status(&self, timeout: Option<Duration>) -> Result<PowerStatus, E> {
        self.query_decoded(Query::PowerStatus, timeout, status::decode_power_status)
            .await
    }

    /// Queries the working mode.
    pub async fn query_working_mode(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Coded<WorkingMode>, E> {
        self.query_decoded(Query::WorkingMode, timeout, mode::decode_working_mode)
            .await
    }

    /// Queries the active warnings.
    pub async fn query_warning_status(&self, timeout: Option<Duration>) -> Result<Vec<Warning>, E> {
        self.query_decoded(Query::WarningStatus, timeout, mode::decode_warnings)
            .await
    }

    /// Queries the enabled feature flags.
    pub async fn query_flags(&self, timeout: Option<Duration>) -> Result<FeatureFlags, E> {
        self.query_decoded(Query::Flags, timeout, mode::decode_flags)
            .await
    }

    async fn query_decoded<T>(
        &self,
        query: Query,
        timeout: Option<Duration>,
        decode: fn(&str) -> core::result::Result<T, telemetry::DecodeError>,
    ) -> Result<T, E> {
        let payload = self.query_raw(query.command(), timeout).await?;

        decode(&payload).map_err(Error::Decode)
    }
}

impl<E> Clone for Inverter<E> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            timeout: self.timeout,
        }
    }
}

impl<E> Debug for Inverter<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inverter")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
