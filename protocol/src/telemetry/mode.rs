//! Working mode, warning and feature flag decoding.

use crate::telemetry::{Coded, DecodeError, fields::Fields, fields::parse_int};
use bitflags_derive::{FlagsDebug, FlagsDisplay};
use strum::{Display, FromRepr, IntoStaticStr, VariantArray};

/// Inverter working mode.
#[derive(FromRepr, Display, IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum WorkingMode {
    /// Starting up.
    PowerOn,
    /// Standing by without supplying the output.
    Standby,
    /// Output supplied from the AC input.
    Bypass,
    /// Output supplied from the battery.
    Battery,
    /// Stopped due to a fault.
    Fault,
    /// Output supplied from solar and AC input combined.
    Hybrid,
    /// Charging the battery only.
    Charge,
}

/// Battery power flow direction.
#[derive(FromRepr, Display, IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum BatteryDirection {
    /// No power flow.
    #[strum(serialize = "do-nothing")]
    DoNothing,
    /// Battery is charging.
    #[strum(serialize = "charge")]
    Charge,
    /// Battery is discharging.
    #[strum(serialize = "discharge")]
    Discharge,
}

/// Power conversion direction between the DC and AC side.
#[derive(FromRepr, Display, IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ConversionDirection {
    /// No power flow.
    #[strum(serialize = "do-nothing")]
    DoNothing,
    /// Converting from AC to DC.
    #[strum(serialize = "AC-DC")]
    AcToDc,
    /// Converting from DC to AC.
    #[strum(serialize = "DC-AC")]
    DcToAc,
}

/// Power flow direction on the grid line.
#[derive(FromRepr, Display, IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum LineDirection {
    /// No power flow.
    #[strum(serialize = "do-nothing")]
    DoNothing,
    /// Drawing power from the grid.
    #[strum(serialize = "input")]
    Input,
    /// Feeding power into the grid.
    #[strum(serialize = "output")]
    Output,
}

/// Warning reported by the inverter.
///
/// Variants are listed in the order of their position in the `WS` response.
#[derive(VariantArray, Display, IntoStaticStr, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "kebab-case")]
pub enum Warning {
    /// Solar input 1 voltage out of range.
    #[strum(serialize = "solar-input-1-loss")]
    SolarInput1Loss,
    /// Solar input 2 voltage out of range.
    #[strum(serialize = "solar-input-2-loss")]
    SolarInput2Loss,
    /// Solar input 1 voltage too high.
    #[strum(serialize = "solar-input-1-voltage-high")]
    SolarInput1VoltageHigh,
    /// Solar input 2 voltage too high.
    #[strum(serialize = "solar-input-2-voltage-high")]
    SolarInput2VoltageHigh,
    /// Battery voltage too low.
    BatteryUnder,
    /// Battery voltage close to too low.
    BatteryLow,
    /// Battery disconnected.
    BatteryOpen,
    /// Battery voltage too high.
    BatteryHigh,
    /// Battery voltage too low for hybrid mode.
    BatteryLowHybridMode,
    /// Grid voltage too high.
    GridVoltageHigh,
    /// Grid voltage too low.
    GridVoltageLow,
    /// Grid frequency too high.
    GridFrequencyHigh,
    /// Grid frequency too low.
    GridFrequencyLow,
    /// AC input long-time average voltage too high.
    AcInputLongTimeAverageVoltageOver,
    /// AC input voltage out of range.
    AcInputVoltageLoss,
    /// AC input frequency out of range.
    AcInputFrequencyLoss,
    /// AC input islanding detected.
    AcInputIsland,
    /// AC input phases dislocated.
    AcInputPhaseDislocation,
    /// Temperature close to too high.
    OverTemperature,
    /// Output overloaded.
    OverLoad,
    /// Emergency power off active.
    EpoActive,
    /// AC input waveform distorted.
    AcInputWaveLoss,
    /// Battery equalization in progress.
    EqualizationStates,
}

impl Warning {
    /// Returns a human-readable description of the warning.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::SolarInput1Loss => "Solar input 1 voltage exceeds the acceptable range",
            Self::SolarInput2Loss => "Solar input 2 voltage exceeds the acceptable range",
            Self::SolarInput1VoltageHigh => "Solar input 1 voltage exceeds the highest level",
            Self::SolarInput2VoltageHigh => "Solar input 2 voltage exceeds the highest level",
            Self::BatteryUnder => "Battery voltage dropped to an unacceptable level",
            Self::BatteryLow => "Battery voltage near an unacceptable level",
            Self::BatteryOpen => "Battery disconnected",
            Self::BatteryHigh => "Battery voltage exceeds the highest level",
            Self::BatteryLowHybridMode => {
                "Battery voltage dropped to an unacceptable level for hybrid mode"
            }
            Self::GridVoltageHigh => {
                "AC input voltage higher than the highest level of AC feeding voltage"
            }
            Self::GridVoltageLow => {
                "AC input voltage lower than the lowest level of AC feeding voltage"
            }
            Self::GridFrequencyHigh => {
                "AC input frequency higher than the highest level of AC feeding frequency"
            }
            Self::GridFrequencyLow => {
                "AC input frequency lower than the lowest level of AC feeding frequency"
            }
            Self::AcInputLongTimeAverageVoltageOver => {
                "AC input long-time average voltage exceeds the highest level"
            }
            Self::AcInputVoltageLoss => "AC input voltage out of acceptable range",
            Self::AcInputFrequencyLoss => "AC input frequency out of acceptable range",
            Self::AcInputIsland => "AC input islanding detected",
            Self::AcInputPhaseDislocation => "AC input three-phase dislocation",
            Self::OverTemperature => "Machine temperature near an unacceptable level",
            Self::OverLoad => "Connected loads exceed the acceptable level",
            Self::EpoActive => "Emergency power off active",
            Self::AcInputWaveLoss => "AC input waveform distorted",
            Self::EqualizationStates => "Battery equalization in progress",
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Warning {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Warning", 2)?;

        state.serialize_field("name", <&str>::from(self))?;
        state.serialize_field("description", self.description())?;
        state.end()
    }
}

bitflags::bitflags! {
    /// Inverter feature flag.
    ///
    /// Each flag represents a feature that is enabled in the inverter's settings.
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    #[derive(FlagsDisplay, FlagsDebug, PartialEq, Eq, Copy, Clone)]
    pub struct FeatureFlags: u16 {
        /// Buzzer muted.
        const MuteBuzzer = 0x0001;
        /// Buzzer muted in standby mode.
        const MuteBuzzerInStandbyMode = 0x0002;
        /// Buzzer muted in battery mode.
        const MuteBuzzerOnBattery = 0x0004;
        /// Generator accepted as AC input.
        const GeneratorAsAcInput = 0x0008;
        /// Wide AC input voltage range.
        const WideAcInputRange = 0x0010;
        /// Neutral-ground relay enabled.
        const NgRelayFunction = 0x0020;
        /// Power derating on grid voltage.
        const DeratingPowerForGridVoltage = 0x0040;
        /// Power derating on grid frequency.
        const DeratingPowerForGridFrequency = 0x0080;
        /// BMS battery communication enabled.
        const BmsBatteryConnect = 0x0100;
        /// Power derating on low frequency.
        const LowFrequencyDeratingPower = 0x0200;
        /// Low voltage ride-through.
        const LowVoltageRideThrough = 0x0400;
        /// High voltage ride-through.
        const HighVoltageRideThrough = 0x0800;
        /// Charge power limited.
        const ChargePowerLimit = 0x1000;
        /// External current transformer relay connected.
        const ExternalCtRlyConnect = 0x2000;
        /// Solar inputs connected in parallel.
        const PvParallel = 0x4000;
        /// AC output coupling.
        const AcOutputCoupling = 0x8000;
    }
}

/// Decodes the working mode from a `MOD` payload.
pub fn decode_working_mode(payload: &str) -> Result<Coded<WorkingMode>, DecodeError> {
    Ok(Coded::new(parse_int(payload)?, WorkingMode::from_repr))
}

/// Decodes the active warnings from a `WS` payload.
///
/// Positions beyond the known warnings are ignored.
pub fn decode_warnings(payload: &str) -> Result<Vec<Warning>, DecodeError> {
    let mut warnings = Vec::new();

    for (field, &warning) in payload.split(',').zip(Warning::VARIANTS) {
        if parse_int(field)? != 0 {
            warnings.push(warning);
        }
    }

    Ok(warnings)
}

/// Decodes the enabled feature flags from a `FLAG` payload.
///
/// Each of the 16 fields enables its flag if nonzero.
pub fn decode_flags(payload: &str) -> Result<FeatureFlags, DecodeError> {
    let fields = Fields::split(payload, 16)?;
    let mut flags = FeatureFlags::empty();

    for (idx, flag) in FeatureFlags::all().iter().enumerate() {
        if fields.int(idx)? != 0 {
            flags |= flag;
        }
    }

    Ok(flags)
}
