use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::decoder::ParserKind;

/// One register-backed value of the inverter, as declared by the model's
/// definition file. Loaded once per run; the poll orchestrator walks these in
/// file order.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub start_register: u16,
    pub length: u16,
    pub group: String,
    pub name: String,
    pub device_class: String,
    pub state_class: Option<String>,
    pub unit: String,
    pub scale: f64,
    pub offset: Option<i64>,
    pub lookup: Option<HashMap<i64, String>>,
    pub parser: ParserKind,
}

// definition file shape {{{
#[derive(Debug, Deserialize)]
struct Definition {
    parameters: Vec<Group>,
}

#[derive(Debug, Deserialize)]
struct Group {
    group: String,
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    name: String,
    class: String,
    state_class: Option<String>,
    uom: String,
    #[serde(default = "Item::default_scale")]
    scale: f64,
    rule: u8,
    registers: Vec<u16>,
    offset: Option<i64>,
    lookup: Option<Vec<LookupEntry>>,
}

impl Item {
    fn default_scale() -> f64 {
        1.0
    }
}

#[derive(Debug, Deserialize)]
struct LookupEntry {
    key: i64,
    value: String,
}
// }}}

fn convert(definition: Definition) -> Result<Vec<Parameter>> {
    let mut parameters = Vec::new();
    for group in definition.parameters {
        for item in group.items {
            let start_register = *item
                .registers
                .first()
                .ok_or_else(|| anyhow!("{:?} has no registers", item.name))?;

            parameters.push(Parameter {
                start_register,
                length: item.registers.len() as u16,
                group: group.group.clone(),
                name: item.name,
                device_class: item.class,
                state_class: item.state_class,
                unit: item.uom,
                scale: item.scale,
                offset: item.offset,
                lookup: item
                    .lookup
                    .map(|entries| entries.into_iter().map(|e| (e.key, e.value)).collect()),
                parser: ParserKind::from(item.rule),
            });
        }
    }
    Ok(parameters)
}

pub fn load_parameters(path: &Path) -> Result<Vec<Parameter>> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow!("Error reading definition file {}: {}", path.display(), err))?;
    let definition: Definition = serde_yaml::from_str(&content)
        .map_err(|err| anyhow!("Error parsing definition file {}: {}", path.display(), err))?;

    let parameters = convert(definition)?;
    info!("Loaded {} parameters from {}", parameters.len(), path.display());
    Ok(parameters)
}
