//! General and power status decoding.

use crate::telemetry::{
    Coded, DecodeError,
    fields::Fields,
    mode::{BatteryDirection, ConversionDirection, LineDirection},
};

/// Value measured on each of the three phases R, S and T.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ThreePhase<T> {
    /// Phase R.
    pub r: T,
    /// Phase S.
    pub s: T,
    /// Phase T.
    pub t: T,
}

/// Power per phase in W or VA, with the total over all phases.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct PhasePower {
    /// Power per phase.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub phases: ThreePhase<i32>,
    /// Total power.
    pub total: i32,
}

/// Dual-channel solar input.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct SolarInput {
    /// Channel 1 voltage in V.
    pub voltage1: f64,
    /// Channel 2 voltage in V.
    pub voltage2: f64,
    /// Channel 1 current in A.
    pub current1: f64,
    /// Channel 2 current in A.
    pub current2: f64,
}

/// Battery state.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct Battery {
    /// Voltage in V.
    pub voltage: f64,
    /// Remaining capacity in %.
    pub capacity: i32,
    /// Current in A.
    pub current: f64,
}

/// Three-phase AC line state.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct AcLine {
    /// Voltage per phase in V.
    pub voltage: ThreePhase<f64>,
    /// Frequency in Hz.
    pub frequency: f64,
}

/// General status (`GS`).
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct GeneralStatus {
    /// Solar input.
    pub solar_input: SolarInput,
    /// Battery.
    pub battery: Battery,
    /// AC input.
    pub ac_input: AcLine,
    /// AC output.
    pub ac_output: AcLine,
}

/// Solar input power.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SolarPower {
    /// Channel 1 power in W.
    pub power1: i32,
    /// Channel 2 power in W.
    pub power2: i32,
}

/// AC output power.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct OutputPower {
    /// Active power in W.
    pub active_power: PhasePower,
    /// Apparent power in VA.
    pub apparent_power: PhasePower,
    /// Output load in %.
    pub load: i32,
}

/// Power flow state.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PowerFlow {
    /// Whether the AC output is connected.
    pub ac_output_connected: bool,
    /// Whether solar input 1 is working.
    pub solar_input1_working: bool,
    /// Whether solar input 2 is working.
    pub solar_input2_working: bool,
    /// Battery power direction.
    pub battery_direction: Coded<BatteryDirection>,
    /// DC/AC conversion direction.
    pub conversion_direction: Coded<ConversionDirection>,
    /// Grid line power direction.
    pub line_direction: Coded<LineDirection>,
}

/// Power status (`PS`).
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PowerStatus {
    /// Solar input power.
    pub solar_input: SolarPower,
    /// AC input active power in W.
    pub ac_input: PhasePower,
    /// AC output power.
    pub ac_output: OutputPower,
    /// Power flow state.
    pub status: PowerFlow,
}

/// Decodes a `GS` payload.
///
/// Fields 11 to 13 are reserved and not decoded.
pub fn decode_general_status(payload: &str) -> Result<GeneralStatus, DecodeError> {
    let fields = Fields::split(payload, 18)?;
    let voltages = |idx: usize| -> Result<ThreePhase<f64>, DecodeError> {
        Ok(ThreePhase {
            r: fields.scaled(idx, 10.0)?,
            s: fields.scaled(idx + 1, 10.0)?,
            t: fields.scaled(idx + 2, 10.0)?,
        })
    };

    Ok(GeneralStatus {
        solar_input: SolarInput {
            voltage1: fields.scaled(0, 10.0)?,
            voltage2: fields.scaled(1, 10.0)?,
            current1: fields.scaled(2, 100.0)?,
            current2: fields.scaled(3, 100.0)?,
        },
        battery: Battery {
            voltage: fields.scaled(4, 10.0)?,
            capacity: fields.int(5)?,
            current: fields.scaled(6, 10.0)?,
        },
        ac_input: AcLine {
            voltage: voltages(7)?,
            frequency: fields.scaled(10, 100.0)?,
        },
        ac_output: AcLine {
            voltage: voltages(14)?,
            frequency: fields.scaled(17, 100.0)?,
        },
    })
}

/// Decodes a `PS` payload.
///
/// Field 2 is reserved and not decoded.
pub fn decode_power_status(payload: &str) -> Result<PowerStatus, DecodeError> {
    let fields = Fields::split(payload, 22)?;
    let power = |idx: usize| -> Result<PhasePower, DecodeError> {
        Ok(PhasePower {
            phases: ThreePhase {
                r: fields.int(idx)?,
                s: fields.int(idx + 1)?,
                t: fields.int(idx + 2)?,
            },
            total: fields.int(idx + 3)?,
        })
    };

    Ok(PowerStatus {
        solar_input: SolarPower {
            power1: fields.int(0)?,
            power2: fields.int(1)?,
        },
        ac_input: power(3)?,
        ac_output: OutputPower {
            active_power: power(7)?,
            apparent_power: power(11)?,
            load: fields.int(15)?,
        },
        status: PowerFlow {
            ac_output_connected: fields.flag(16)?,
            solar_input1_working: fields.flag(17)?,
            solar_input2_working: fields.flag(18)?,
            battery_direction: Coded::new(fields.int(19)?, BatteryDirection::from_repr),
            conversion_direction: Coded::new(fields.int(20)?, ConversionDirection::from_repr),
            line_direction: Coded::new(fields.int(21)?, LineDirection::from_repr),
        },
    })
}
