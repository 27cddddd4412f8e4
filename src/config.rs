use crate::prelude::*;

use chrono::NaiveTime;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverter: Inverter,
    pub mqtt: Mqtt,

    #[serde(default)]
    pub daily_reset: DailyReset,

    #[serde(default = "Config::default_definitions_dir")]
    pub definitions_dir: String,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Seconds between poll cycles.
    #[serde(default = "Config::default_poll_interval")]
    pub poll_interval: u64,
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("Error reading config file {}: {}", file, err))?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|err| anyhow!("Error parsing config file {}: {}", file, err))?;
        config.validate()?;
        Ok(config)
    }

    /// Definition and validation files must exist before the first cycle.
    fn validate(&self) -> Result<()> {
        let definition = self.definition_file_path();
        if !definition.is_file() {
            bail!(
                "Wrong inverter model {:?}: file not found: {}",
                self.inverter.model,
                definition.display()
            );
        }

        let validation = self.validation_file_path();
        if !validation.is_file() {
            bail!(
                "Wrong inverter model {:?}: file not found: {}",
                self.inverter.model,
                validation.display()
            );
        }

        Ok(())
    }

    pub fn inverter(&self) -> &Inverter {
        &self.inverter
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.mqtt
    }

    pub fn daily_reset(&self) -> &DailyReset {
        &self.daily_reset
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn poll_interval(&self) -> u64 {
        self.poll_interval
    }

    pub fn definition_file_path(&self) -> PathBuf {
        PathBuf::from(&self.definitions_dir).join(format!("{}.yaml", self.inverter.model))
    }

    pub fn validation_file_path(&self) -> PathBuf {
        PathBuf::from(&self.definitions_dir)
            .join(format!("{}_validations.yaml", self.inverter.model))
    }

    fn default_definitions_dir() -> String {
        "definitions".to_string()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_poll_interval() -> u64 {
        10
    }

    fn default_enabled() -> bool {
        true
    }
}

// Inverter {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    pub host: String,

    #[serde(default = "Inverter::default_port")]
    pub port: u16,

    /// Selects `<definitions_dir>/<model>.yaml` and its validation file.
    pub model: String,

    /// Pacing delay after every send.
    #[serde(default = "Inverter::default_pause_ms")]
    pub pause_ms: u64,

    /// Receive timeout in seconds.
    #[serde(default = "Inverter::default_timeout")]
    pub timeout: u64,

    #[serde(default = "Inverter::default_init_command")]
    pub init_command: String,
}

impl Inverter {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn init_command(&self) -> &str {
        &self.init_command
    }

    fn default_port() -> u16 {
        48899
    }

    fn default_pause_ms() -> u64 {
        100
    }

    fn default_timeout() -> u64 {
        5
    }

    fn default_init_command() -> String {
        "WIFIKIT-214028-READ".to_string()
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,

    #[serde(default = "Mqtt::default_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Home Assistant discovery prefix.
    #[serde(default = "Mqtt::default_prefix")]
    pub prefix: String,

    /// Leading part of the device id, e.g. `inverter_123456789`.
    #[serde(default = "Mqtt::default_name_prefix")]
    pub name_prefix: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    fn default_port() -> u16 {
        1883
    }

    fn default_prefix() -> String {
        "homeassistant".to_string()
    }

    fn default_name_prefix() -> String {
        "inverter".to_string()
    }
} // }}}

// DailyReset {{{
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DailyReset {
    pub enabled: bool,

    /// Must match the counter's name in the definition file.
    pub counter_name: String,

    /// Reset window, local time; `start` inclusive, `end` exclusive.
    pub start: NaiveTime,
    pub end: NaiveTime,

    pub state_file: String,
}

impl Default for DailyReset {
    fn default() -> Self {
        Self {
            enabled: true,
            counter_name: "Daily Production".to_string(),
            start: NaiveTime::from_hms_opt(1, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(3, 0, 0).expect("valid time"),
            state_file: "daily_reset_state.txt".to_string(),
        }
    }
}

impl DailyReset {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn counter_name(&self) -> &str {
        &self.counter_name
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn state_file_path(&self) -> PathBuf {
        PathBuf::from(&self.state_file)
    }
} // }}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
inverter:
  host: 192.168.1.60
  model: deye_2mppt
mqtt:
  host: broker.local
"#,
        )
        .unwrap();

        assert_eq!(config.inverter.port(), 48899);
        assert_eq!(config.inverter.pause(), Duration::from_millis(100));
        assert_eq!(config.inverter.timeout(), Duration::from_secs(5));
        assert_eq!(config.inverter.init_command(), "WIFIKIT-214028-READ");
        assert_eq!(config.mqtt.port(), 1883);
        assert_eq!(config.mqtt.prefix(), "homeassistant");
        assert!(config.mqtt.enabled());
        assert_eq!(config.poll_interval(), 10);
        assert_eq!(config.loglevel(), "info");
        assert_eq!(
            config.definition_file_path(),
            PathBuf::from("definitions/deye_2mppt.yaml")
        );
        assert_eq!(
            config.validation_file_path(),
            PathBuf::from("definitions/deye_2mppt_validations.yaml")
        );

        let reset = config.daily_reset();
        assert!(reset.enabled());
        assert_eq!(reset.counter_name(), "Daily Production");
        assert_eq!(reset.start(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(reset.end(), NaiveTime::from_hms_opt(3, 0, 0).unwrap());
    }

    #[test]
    fn overrides() {
        let config: Config = serde_yaml::from_str(
            r#"
inverter:
  host: 10.0.0.2
  port: 50000
  model: deye_4mppt
  pause_ms: 250
  timeout: 2
mqtt:
  enabled: false
  host: broker.local
  username: user
  password: secret
daily_reset:
  counter_name: Daily Energy
  start: 02:00:00
  end: 04:30:00
loglevel: debug
poll_interval: 30
"#,
        )
        .unwrap();

        assert_eq!(config.inverter.port(), 50000);
        assert_eq!(config.inverter.pause(), Duration::from_millis(250));
        assert!(!config.mqtt.enabled());
        assert_eq!(config.mqtt.username(), Some("user"));
        assert_eq!(config.loglevel(), "debug");
        assert_eq!(config.poll_interval(), 30);
        assert_eq!(config.daily_reset().counter_name(), "Daily Energy");
        assert_eq!(
            config.daily_reset().end(),
            NaiveTime::from_hms_opt(4, 30, 0).unwrap()
        );
    }
}
