use crate::prelude::*;

use std::collections::VecDeque;

use crate::connection::Session;
use crate::decoder::{self, round2, CellValue};
use crate::definitions::Parameter;
use crate::validator::Validator;

/// The device tops out at nine PV input strings.
const PV_STRING_COUNT: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    ReadOut,
    Computed,
}

/// One value of a poll cycle, read out of a register block or computed from
/// other values.
#[derive(Debug, Clone, PartialEq)]
pub struct InverterValue {
    pub kind: ValueKind,
    pub name: String,
    pub value: CellValue,
    pub device_class: String,
    pub state_class: Option<String>,
    pub unit: String,
}

/// Per-string power and the aggregate, from the voltage/current pairs of one
/// completed cycle. Pairs with a non-numeric operand contribute nothing.
pub fn compute_values(values: &[InverterValue]) -> Vec<InverterValue> {
    let find = |name: &str| values.iter().find(|value| value.name == name);

    let mut computed = Vec::new();
    let mut total_power: Option<f64> = None;

    for no in 1..=PV_STRING_COUNT {
        let voltage_name = format!("PV{no} Voltage");
        let current_name = format!("PV{no} Current");
        let (Some(voltage), Some(current)) = (find(&voltage_name), find(&current_name)) else {
            continue;
        };

        let (Some(voltage), Some(current)) =
            (voltage.value.as_number(), current.value.as_number())
        else {
            debug!("Skip PV{no} Power: voltage or current is not numeric");
            continue;
        };

        let power = voltage * current;
        total_power = Some(total_power.unwrap_or(0.0) + power);
        debug!(
            "Compute PV{no} Power from {voltage_name} {voltage} and {current_name} {current} = {power}"
        );

        computed.push(InverterValue {
            kind: ValueKind::Computed,
            name: format!("PV{no} Power"),
            value: CellValue::Number(round2(power)),
            device_class: "power".to_string(),
            state_class: Some("measurement".to_string()),
            unit: "W".to_string(),
        });
    }

    if let Some(total_power) = total_power {
        computed.push(InverterValue {
            kind: ValueKind::Computed,
            name: "Total Power".to_string(),
            value: CellValue::Number(round2(total_power)),
            device_class: "power".to_string(),
            state_class: Some("measurement".to_string()),
            unit: "W".to_string(),
        });
    }

    computed
}

/// Walks the parameter list in definition order, one register read per call,
/// then yields the computed values. Single pass; a fresh one is built for
/// every poll cycle.
pub struct Inverter<'a> {
    session: Session,
    parameters: &'a [Parameter],
    validator: &'a Validator,
    position: usize,
    seen: Vec<InverterValue>,
    computed: Option<VecDeque<InverterValue>>,
}

impl<'a> Inverter<'a> {
    pub fn new(session: Session, parameters: &'a [Parameter], validator: &'a Validator) -> Self {
        Self {
            session,
            parameters,
            validator,
            position: 0,
            seen: Vec::with_capacity(parameters.len()),
            computed: None,
        }
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Next value of this cycle, or `None` once the read-outs and the
    /// computed values are exhausted. Every value is validated before it is
    /// handed out; a validation failure ends the cycle.
    pub async fn next_value(&mut self) -> Result<Option<InverterValue>> {
        if self.position < self.parameters.len() {
            let parameter = &self.parameters[self.position];
            self.position += 1;

            let value = self.read_parameter(parameter).await?;
            assert!(
                !self.seen.iter().any(|seen| seen.name == value.name),
                "duplicate parameter name {:?} in definitions",
                value.name
            );
            self.validator.validate(&value)?;
            self.seen.push(value.clone());
            return Ok(Some(value));
        }

        let computed = self
            .computed
            .get_or_insert_with(|| compute_values(&self.seen).into());
        match computed.pop_front() {
            Some(value) => {
                self.validator.validate(&value)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn read_parameter(&mut self, parameter: &Parameter) -> Result<InverterValue> {
        let value = match self
            .session
            .read_registers(parameter.start_register, parameter.length)
            .await
        {
            Ok(response) => match decoder::decode(parameter, &response.data_hex) {
                Ok(value) => value,
                Err(err) => {
                    warn!("{err}");
                    CellValue::no_data()
                }
            },
            Err(err) => match err.downcast_ref::<ReadError>() {
                Some(read_err) if read_err.is_missing_data() => {
                    warn!("{read_err} for {:?}", parameter.name);
                    CellValue::no_data()
                }
                _ => return Err(err),
            },
        };

        Ok(InverterValue {
            kind: ValueKind::ReadOut,
            name: parameter.name.clone(),
            value,
            device_class: parameter.device_class.clone(),
            state_class: parameter.state_class.clone(),
            unit: parameter.unit.clone(),
        })
    }
}
