use crate::prelude::*;

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use serde_json::json;
use std::time::Duration;

use crate::inverter::InverterValue;

const COMPONENT: &str = "sensor";
const DEFAULT_DEVICE_CLASS: &str = "energy";
const DEFAULT_STATE_CLASS: &str = "measurement";

// Message {{{
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}
// }}}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Home Assistant discovery configs plus the state message for one completed
/// poll cycle. One retained config per value, one state carrying them all.
pub fn homeassistant_messages(
    config: &config::Mqtt,
    device_name: &str,
    values: &[InverterValue],
) -> Result<Vec<Message>> {
    let device_id = format!("{}_{}", slugify(config.name_prefix()), slugify(device_name));
    let state_topic = format!("{}/{}/{}/state", config.prefix(), COMPONENT, device_id);

    let identifiers: Vec<String> = {
        let mut ids: Vec<String> = values
            .iter()
            .map(|value| format!("{}_{}", device_id, slugify(&value.name)))
            .collect();
        ids.sort();
        ids
    };

    let mut messages = Vec::with_capacity(values.len() + 1);
    let mut state = serde_json::Map::new();

    for value in values {
        let unique_id = format!("{}_{}", device_id, slugify(&value.name));
        if state.contains_key(&unique_id) {
            bail!("Duplicate unique id {:?} from {:?}", unique_id, value.name);
        }

        let device_class = if value.device_class.is_empty() {
            DEFAULT_DEVICE_CLASS
        } else {
            &value.device_class
        };
        let state_class = value
            .state_class
            .as_deref()
            .unwrap_or(DEFAULT_STATE_CLASS);

        let payload = json!({
            "device": {
                "identifiers": &identifiers,
                "name": device_name,
            },
            "name": &value.name,
            "device_class": device_class,
            "state_class": state_class,
            "state_topic": &state_topic,
            "unit_of_measurement": &value.unit,
            "unique_id": &unique_id,
            "value_template": format!("{{{{ value_json.{unique_id} }}}}"),
        });
        messages.push(Message {
            topic: format!("{}/{}/{}/config", config.prefix(), COMPONENT, unique_id),
            retain: true,
            payload: serde_json::to_string(&payload)?,
        });

        state.insert(unique_id, serde_json::to_value(&value.value)?);
    }

    messages.push(Message {
        topic: state_topic,
        retain: false,
        payload: serde_json::to_string(&state)?,
    });

    Ok(messages)
}

/// The publish sink: hands every cycle's values to the MQTT broker, one
/// short-lived connection per batch.
pub struct Mqtt {
    config: config::Mqtt,
}

impl Mqtt {
    pub fn new(config: config::Mqtt) -> Self {
        Self { config }
    }

    pub async fn publish_values(&self, device_name: &str, values: &[InverterValue]) -> Result<()> {
        if !self.config.enabled() {
            debug!("MQTT publishing disabled, dropping {} values", values.len());
            return Ok(());
        }
        let messages = homeassistant_messages(&self.config, device_name, values)?;
        self.publish(messages).await
    }

    async fn publish(&self, messages: Vec<Message>) -> Result<()> {
        let client_id = format!("deye-bridge-{}", std::process::id());
        let mut options =
            MqttOptions::new(client_id, self.config.host(), self.config.port());
        options.set_keep_alive(Duration::from_secs(10));
        if let (Some(username), Some(password)) =
            (self.config.username(), self.config.password())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, messages.len() + 4);
        let count = messages.len();

        let sender = async {
            for message in &messages {
                client
                    .publish(
                        &message.topic,
                        QoS::AtLeastOnce,
                        message.retain,
                        message.payload.clone(),
                    )
                    .await?;
            }
            client.disconnect().await?;
            Ok::<(), anyhow::Error>(())
        };

        let driver = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(event) => trace!("mqtt: {:?}", event),
                    Err(err) => {
                        return Err(anyhow!(
                            "mqtt connection to {}:{} failed: {}",
                            self.config.host(),
                            self.config.port(),
                            err
                        ))
                    }
                }
            }
            Ok(())
        };

        futures::try_join!(sender, driver)?;
        info!(
            "Published {} message(s) to {}:{}",
            count,
            self.config.host(),
            self.config.port()
        );
        Ok(())
    }
}
