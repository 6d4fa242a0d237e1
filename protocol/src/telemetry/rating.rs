//! Device model and rated information decoding.

use crate::telemetry::{DecodeError, fields::Fields};

/// Device model (`MD`).
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct DeviceModel {
    /// Machine number.
    pub machine_number: i32,
    /// Rated apparent power in VA.
    pub rated_va: i32,
    /// Output power factor.
    pub output_power_factor: f64,
    /// Number of input phases.
    pub input_phases: i32,
    /// Number of output phases.
    pub output_phases: i32,
    /// Nominal output voltage in V.
    pub nominal_output_voltage: f64,
    /// Nominal input voltage in V.
    pub nominal_input_voltage: f64,
    /// Number of battery cells.
    pub battery_cells: i32,
    /// Nominal voltage per battery cell in V.
    pub battery_cell_voltage: f64,
}

/// Rated AC input.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct RatedInput {
    /// Voltage in V.
    pub voltage: f64,
    /// Frequency in Hz.
    pub frequency: f64,
    /// Current in A.
    pub current: f64,
}

/// Rated AC output.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct RatedOutput {
    /// Voltage in V.
    pub voltage: f64,
    /// Current in A.
    pub current: f64,
}

/// Rated information (`PIRI`).
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(PartialEq, Clone, Debug)]
pub struct RatedInformation {
    /// Rated AC input.
    pub input: RatedInput,
    /// Rated AC output.
    pub output: RatedOutput,
    /// Rated MPPT current per solar string in A.
    pub mppt_current_per_string: f64,
    /// Rated battery voltage in V.
    pub battery_voltage: f64,
    /// Number of MPPT trackers.
    pub mppt_trackers: i32,
    /// Machine type code.
    pub machine_type: i32,
    /// Topology code.
    pub topology: i32,
    /// Whether parallel output is enabled.
    pub parallel_output: bool,
}

/// Decodes a `MD` payload.
pub fn decode_device_model(payload: &str) -> Result<DeviceModel, DecodeError> {
    let fields = Fields::split(payload, 9)?;

    Ok(DeviceModel {
        machine_number: fields.int(0)?,
        rated_va: fields.int(1)?,
        output_power_factor: fields.scaled(2, 100.0)?,
        input_phases: fields.int(3)?,
        output_phases: fields.int(4)?,
        nominal_output_voltage: fields.scaled(5, 10.0)?,
        nominal_input_voltage: fields.scaled(6, 10.0)?,
        battery_cells: fields.int(7)?,
        battery_cell_voltage: fields.scaled(8, 10.0)?,
    })
}

/// Decodes a `PIRI` payload.
pub fn decode_rated_information(payload: &str) -> Result<RatedInformation, DecodeError> {
    let fields = Fields::split(payload, 11)?;

    Ok(RatedInformation {
        input: RatedInput {
            voltage: fields.scaled(0, 10.0)?,
            frequency: fields.scaled(1, 10.0)?,
            current: fields.scaled(2, 10.0)?,
        },
        output: RatedOutput {
            voltage: fields.scaled(3, 10.0)?,
            current: fields.scaled(4, 10.0)?,
        },
        mppt_current_per_string: fields.scaled(5, 10.0)?,
        battery_voltage: fields.scaled(6, 10.0)?,
        mppt_trackers: fields.int(7)?,
        machine_type: fields.int(8)?,
        topology: fields.int(9)?,
        parallel_output: fields.flag(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_model() -> Result<(), DecodeError> {
        let model = decode_device_model("1000,5000,80,1,1,2300,2300,4,120")?;

        assert_eq!(
            model,
            DeviceModel {
                machine_number: 1000,
                rated_va: 5000,
                output_power_factor: 0.8,
                input_phases: 1,
                output_phases: 1,
                nominal_output_voltage: 230.0,
                nominal_input_voltage: 230.0,
                battery_cells: 4,
                battery_cell_voltage: 12.0,
            },
            "device model should be correct"
        );

        Ok(())
    }

    #[test]
    fn rated_information() -> Result<(), DecodeError> {
        let info =
            decode_rated_information("2300,500,217,2300,217,1500,480,2,0,1,1,extra")?;

        assert_eq!(
            info,
            RatedInformation {
                input: RatedInput {
                    voltage: 230.0,
                    frequency: 50.0,
                    current: 21.7,
                },
                output: RatedOutput {
                    voltage: 230.0,
                    current: 21.7,
                },
                mppt_current_per_string: 150.0,
                battery_voltage: 48.0,
                mppt_trackers: 2,
                machine_type: 0,
                topology: 1,
                parallel_output: true,
            },
            "rated information should be correct"
        );

        Ok(())
    }

    #[test]
    fn parallel_output_requires_one() -> Result<(), DecodeError> {
        let info = decode_rated_information("2300,500,217,2300,217,1500,480,2,0,1,2")?;

        assert!(!info.parallel_output, "flag should only be set by 1");

        Ok(())
    }

    #[test]
    fn error_field_count() {
        assert_eq!(
            decode_device_model("1000,5000"),
            Err(DecodeError::FieldCount {
                expected: 9,
                actual: 2
            }),
            "result should be field count error"
        );
    }
}
