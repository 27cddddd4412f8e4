use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::inverter::InverterValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecType {
    Float,
    Int,
}

/// Plausibility bounds for one named value. A bound of zero counts as unset.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub spec_type: SpecType,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Validators {
    validators: Vec<ValueSpec>,
}

/// Range-checks decoded values against the model's validation file, keyed by
/// value name. Names without a spec pass through unchecked.
pub struct Validator {
    specs: HashMap<String, ValueSpec>,
}

impl Validator {
    pub fn new(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("Error reading validation file {}: {}", path.display(), err))?;
        let validators: Validators = serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("Error parsing validation file {}: {}", path.display(), err))?;

        info!(
            "Loaded {} validation specs from {}",
            validators.validators.len(),
            path.display()
        );
        Ok(Self::from_specs(validators.validators))
    }

    pub fn from_specs(specs: Vec<ValueSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect(),
        }
    }

    pub fn validate(&self, value: &InverterValue) -> Result<(), ValidationError> {
        let Some(spec) = self.specs.get(&value.name) else {
            debug!("No validation specs for {:?}, ok.", value.name);
            return Ok(());
        };

        // Text values (lookups, the `no data` sentinel) carry no number to
        // check; the publish loop refuses sentinel-bearing cycles anyway.
        let Some(number) = value.value.as_number() else {
            debug!("{:?} is not numeric, nothing to validate", value.name);
            return Ok(());
        };

        let number = match spec.spec_type {
            SpecType::Float => number,
            SpecType::Int => number.trunc(),
        };

        if let Some(min) = spec.min_value {
            if min != 0.0 && number < min {
                return Err(ValidationError::BelowMinimum {
                    name: value.name.clone(),
                    value: number,
                    min,
                });
            }
        }

        if let Some(max) = spec.max_value {
            if max != 0.0 && number > max {
                return Err(ValidationError::AboveMaximum {
                    name: value.name.clone(),
                    value: number,
                    max,
                });
            }
        }

        debug!("{} value {} is valid, ok.", value.name, number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::CellValue;
    use crate::inverter::ValueKind;

    fn value(name: &str, value: CellValue) -> InverterValue {
        InverterValue {
            kind: ValueKind::ReadOut,
            name: name.to_string(),
            value,
            device_class: "voltage".to_string(),
            state_class: Some("measurement".to_string()),
            unit: "V".to_string(),
        }
    }

    fn spec(name: &str, min_value: Option<f64>, max_value: Option<f64>) -> ValueSpec {
        ValueSpec {
            name: name.to_string(),
            spec_type: SpecType::Float,
            min_value,
            max_value,
        }
    }

    #[test]
    fn unknown_name_passes() {
        let validator = Validator::from_specs(vec![]);
        assert!(validator
            .validate(&value("PV1 Voltage", CellValue::Number(9999.0)))
            .is_ok());
    }

    #[test]
    fn inside_bounds_passes() {
        let validator = Validator::from_specs(vec![spec("PV1 Voltage", Some(1.0), Some(300.0))]);
        assert!(validator
            .validate(&value("PV1 Voltage", CellValue::Number(236.0)))
            .is_ok());
    }

    #[test]
    fn below_minimum_reports_minimum_and_value() {
        let validator = Validator::from_specs(vec![spec("PV1 Voltage", Some(1.0), Some(300.0))]);
        let err = validator
            .validate(&value("PV1 Voltage", CellValue::Number(0.5)))
            .unwrap_err();
        assert_eq!(err.to_string(), "PV1 Voltage value 0.5 is less than 1");
    }

    #[test]
    fn above_maximum_reports_maximum_and_value() {
        let validator = Validator::from_specs(vec![spec("PV1 Voltage", Some(1.0), Some(300.0))]);
        let err = validator
            .validate(&value("PV1 Voltage", CellValue::Number(500.0)))
            .unwrap_err();
        assert_eq!(err.to_string(), "PV1 Voltage value 500 is greater than 300");
    }

    #[test]
    fn zero_bound_counts_as_unset() {
        let validator = Validator::from_specs(vec![spec("Total Power", Some(0.0), Some(0.0))]);
        assert!(validator
            .validate(&value("Total Power", CellValue::Number(-5.0)))
            .is_ok());
    }

    #[test]
    fn int_spec_truncates() {
        let validator = Validator::from_specs(vec![ValueSpec {
            name: "Cycle Count".to_string(),
            spec_type: SpecType::Int,
            min_value: Some(1.0),
            max_value: None,
        }]);
        // 1.2 truncates to 1, which is not below the minimum
        assert!(validator
            .validate(&value("Cycle Count", CellValue::Number(1.2)))
            .is_ok());
        assert!(validator
            .validate(&value("Cycle Count", CellValue::Number(0.9)))
            .is_err());
    }

    #[test]
    fn text_values_are_not_checked() {
        let validator = Validator::from_specs(vec![spec("PV1 Voltage", Some(1.0), None)]);
        assert!(validator
            .validate(&value("PV1 Voltage", CellValue::no_data()))
            .is_ok());
    }

    #[test]
    fn parses_spec_file_shape() {
        let yaml = r#"
validators:
  - name: PV1 Voltage
    type: float
    min_value: 1
    max_value: 300
  - name: Daily Production
    type: int
    min_value: 0
    max_value: 100
"#;
        let validators: Validators = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(validators.validators.len(), 2);
        assert_eq!(validators.validators[1].spec_type, SpecType::Int);
    }
}
