//! Decoding of query responses into typed telemetry.
//!
//! Every query supported by the inverter has a [`Query`] variant naming it,
//! and a decoded [`Telemetry`] variant holding its result.
//! The decoders are pure functions of the response payload and can be used
//! without a connection, e.g. for payloads captured elsewhere:
//!
//! ```
//! use mppsolar::{Query, Telemetry};
//!
//! let telemetry = Query::WorkingMode.decode("3").unwrap();
//!
//! if let Telemetry::WorkingMode(mode) = telemetry {
//!     assert_eq!(mode.code, 3);
//!     assert_eq!(mode.to_string(), "battery");
//! }
//! ```
//!
//! Numeric fields are transmitted as ASCII decimal integers.
//! Fields with a fractional unit are scaled down by their documented
//! factor, e.g. a battery voltage of `"0525"` decodes to `52.5` volts.

pub mod mode;
pub mod rating;
pub mod status;

pub use mode::{FeatureFlags, Warning, WorkingMode};
pub use rating::{DeviceModel, RatedInformation};
pub use status::{GeneralStatus, PowerStatus};

use core::fmt::{Display, Formatter};
use strum::{EnumString, VariantArray};

/// Error type for payload decoding.
///
/// Returned when a response payload does not match the format
/// expected for its command.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum DecodeError {
    /// The payload has fewer fields than the command's format requires.
    FieldCount {
        /// Number of fields required.
        expected: usize,
        /// Number of fields received.
        actual: usize,
    },
    /// A field is not a decimal integer.
    InvalidNumber(String),
    /// A length prefix is invalid or exceeds the payload.
    InvalidLength,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::FieldCount { expected, actual } => {
                write!(f, "expected {expected} fields, got {actual}")
            }
            Self::InvalidNumber(field) => write!(f, "invalid number: {field:?}"),
            Self::InvalidLength => write!(f, "invalid length"),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Query supported by the inverter.
///
/// Queries can be parsed from their name, e.g. `"GeneralStatus"`.
#[derive(EnumString, strum::Display, VariantArray, PartialEq, Eq, Hash, Copy, Clone, Debug)]
#[strum(ascii_case_insensitive)]
pub enum Query {
    /// Protocol identifier (`PI`).
    ProtocolId,
    /// Series number (`ID`).
    SeriesNumber,
    /// Main CPU firmware version (`VFW`).
    CpuVersion,
    /// Secondary CPU firmware version (`VFW2`).
    #[strum(to_string = "SecondCpuVersion", serialize = "2ndCpuVersion")]
    SecondCpuVersion,
    /// Device model (`MD`).
    DeviceModel,
    /// Rated information (`PIRI`).
    RatedInformation,
    /// General status (`GS`).
    GeneralStatus,
    /// Power status (`PS`).
    PowerStatus,
    /// Working mode (`MOD`).
    WorkingMode,
    /// Warning status (`WS`).
    WarningStatus,
    /// Feature flags (`FLAG`).
    Flags,
}

impl Query {
    /// All supported queries.
    pub const ALL: &'static [Self] = <Self as VariantArray>::VARIANTS;

    /// Returns the command sent to the inverter for this query.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::ProtocolId => "PI",
            Self::SeriesNumber => "ID",
            Self::CpuVersion => "VFW",
            Self::SecondCpuVersion => "VFW2",
            Self::DeviceModel => "MD",
            Self::RatedInformation => "PIRI",
            Self::GeneralStatus => "GS",
            Self::PowerStatus => "PS",
            Self::WorkingMode => "MOD",
            Self::WarningStatus => "WS",
            Self::Flags => "FLAG",
        }
    }

    /// Returns the topic name under which results of this query are published,
    /// e.g. `general-status`.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::ProtocolId => "protocol-id",
            Self::SeriesNumber => "series-number",
            Self::CpuVersion => "cpu-version",
            Self::SecondCpuVersion => "second-cpu-version",
            Self::DeviceModel => "device-model",
            Self::RatedInformation => "rated-information",
            Self::GeneralStatus => "general-status",
            Self::PowerStatus => "power-status",
            Self::WorkingMode => "working-mode",
            Self::WarningStatus => "warning-status",
            Self::Flags => "flags",
        }
    }

    /// Returns the query sent using the given command, if any.
    #[must_use]
    pub fn from_command(cmd: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|q| q.command() == cmd)
    }

    /// Decodes a response payload to this query.
    pub fn decode(self, payload: &str) -> Result<Telemetry, DecodeError> {
        Ok(match self {
            Self::ProtocolId => Telemetry::ProtocolId(payload.to_string()),
            Self::SeriesNumber => Telemetry::SeriesNumber(decode_series_number(payload)?),
            Self::CpuVersion => Telemetry::CpuVersion(decode_cpu_version(payload)),
            Self::SecondCpuVersion => {
                Telemetry::SecondCpuVersion(decode_second_cpu_version(payload))
            }
            Self::DeviceModel => Telemetry::DeviceModel(rating::decode_device_model(payload)?),
            Self::RatedInformation => {
                Telemetry::RatedInformation(rating::decode_rated_information(payload)?)
            }
            Self::GeneralStatus => {
                Telemetry::GeneralStatus(status::decode_general_status(payload)?)
            }
            Self::PowerStatus => Telemetry::PowerStatus(status::decode_power_status(payload)?),
            Self::WorkingMode => Telemetry::WorkingMode(mode::decode_working_mode(payload)?),
            Self::WarningStatus => Telemetry::WarningStatus(mode::decode_warnings(payload)?),
            Self::Flags => Telemetry::Flags(mode::decode_flags(payload)?),
        })
    }
}

/// Decoded result of a [`Query`].
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(untagged))]
#[derive(PartialEq, Clone, Debug)]
pub enum Telemetry {
    /// Protocol identifier, e.g. `PI17`.
    ProtocolId(String),
    /// Series number.
    SeriesNumber(String),
    /// Main CPU firmware version.
    CpuVersion(String),
    /// Secondary CPU firmware version.
    SecondCpuVersion(String),
    /// Device model.
    DeviceModel(DeviceModel),
    /// Rated information.
    RatedInformation(RatedInformation),
    /// General status.
    GeneralStatus(GeneralStatus),
    /// Power status.
    PowerStatus(PowerStatus),
    /// Working mode.
    WorkingMode(Coded<WorkingMode>),
    /// Active warnings, in catalog order.
    WarningStatus(Vec<Warning>),
    /// Enabled feature flags.
    Flags(FeatureFlags),
}

/// Integer code reported by the inverter together with its meaning.
///
/// Codes without a known meaning keep their raw value
/// and have a `value` of [`None`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Coded<T> {
    /// Raw code as reported.
    pub code: i32,
    /// Decoded meaning of the code, if known.
    pub value: Option<T>,
}

impl<T> Coded<T> {
    /// Looks up the meaning of a raw code.
    pub(crate) fn new(code: i32, lookup: impl FnOnce(u8) -> Option<T>) -> Self {
        Self {
            code,
            value: u8::try_from(code).ok().and_then(lookup),
        }
    }
}

impl<T: Display> Display for Coded<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match &self.value {
            Some(val) => write!(f, "{val}"),
            None => write!(f, "unknown ({})", self.code),
        }
    }
}

#[cfg(feature = "serde")]
impl<T: Copy + Into<&'static str>> serde::Serialize for Coded<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Coded", 2)?;

        state.serialize_field("code", &self.code)?;
        state.serialize_field("description", &self.value.map(Into::into))?;
        state.end()
    }
}

/// Decodes the series number from a length-prefixed `ID` payload.
///
/// The first two characters hold the decimal length of the series number
/// that follows them, e.g. `"14"` followed by 14 characters.
pub fn decode_series_number(payload: &str) -> Result<String, DecodeError> {
    let len: usize = payload
        .get(..2)
        .and_then(|digits| digits.parse().ok())
        .ok_or(DecodeError::InvalidLength)?;

    payload
        .get(2..2 + len)
        .map(str::to_string)
        .ok_or(DecodeError::InvalidLength)
}

/// Decodes the main CPU firmware version from a `VFW` payload.
#[must_use]
pub fn decode_cpu_version(payload: &str) -> String {
    payload
        .strip_prefix("VERFW:")
        .unwrap_or(payload)
        .to_string()
}

/// Decodes the secondary CPU firmware version from a `VFW2` payload.
#[must_use]
pub fn decode_second_cpu_version(payload: &str) -> String {
    payload
        .strip_prefix("VERFW2:")
        .unwrap_or(payload)
        .to_string()
}

/// Utility functions for field decoding.
mod fields {
    use super::DecodeError;

    /// Comma-separated fields of a payload.
    pub(super) struct Fields<'a>(Vec<&'a str>);

    impl<'a> Fields<'a> {
        /// Splits a payload that must contain at least `expected` fields.
        ///
        /// Additional fields are ignored.
        pub(super) fn split(payload: &'a str, expected: usize) -> Result<Self, DecodeError> {
            let fields: Vec<_> = payload.split(',').collect();

            if fields.len() < expected {
                return Err(DecodeError::FieldCount {
                    expected,
                    actual: fields.len(),
                });
            }

            Ok(Self(fields))
        }

        /// Decodes the field at `idx` as an integer.
        pub(super) fn int(&self, idx: usize) -> Result<i32, DecodeError> {
            parse_int(self.0[idx])
        }

        /// Decodes the field at `idx` as an integer divided by `div`.
        pub(super) fn scaled(&self, idx: usize, div: f64) -> Result<f64, DecodeError> {
            Ok(f64::from(self.int(idx)?) / div)
        }

        /// Decodes the field at `idx` as a flag that is set if it equals 1.
        pub(super) fn flag(&self, idx: usize) -> Result<bool, DecodeError> {
            Ok(self.int(idx)? == 1)
        }
    }

    /// Parses a decimal integer field.
    ///
    /// Empty fields are sent for unused values and decode as 0.
    pub(super) fn parse_int(field: &str) -> Result<i32, DecodeError> {
        let field = field.trim();

        if field.is_empty() {
            return Ok(0);
        }

        field
            .parse()
            .map_err(|_| DecodeError::InvalidNumber(field.to_string()))
    }
}
