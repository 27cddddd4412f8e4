use crate::prelude::*;

use chrono::Local;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::connection::Session;
use crate::daily_reset::DailyReset;
use crate::definitions::{self, Parameter};
use crate::inverter::Inverter;
use crate::mqtt::Mqtt;
use crate::validator::Validator;

/// The outer publish loop: one session, one pass over the parameters, one
/// MQTT batch, then sleep. Every failure after startup is survived.
pub struct Coordinator {
    config: Config,
    parameters: Vec<Parameter>,
    validator: Validator,
    daily_reset: Option<DailyReset>,
    mqtt: Mqtt,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Coordinator {
    /// Startup is the only place that is allowed to fail hard: a missing or
    /// broken definition/validation file means nothing sensible can run.
    pub fn new(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<Self> {
        let parameters = definitions::load_parameters(&config.definition_file_path())?;
        let validator = Validator::new(&config.validation_file_path())?;

        let reset_config = config.daily_reset();
        let daily_reset = if reset_config.enabled() {
            Some(DailyReset::new(
                reset_config.state_file_path(),
                reset_config.counter_name(),
                reset_config.start(),
                reset_config.end(),
                Local::now().naive_local(),
            ))
        } else {
            info!("Daily reset disabled");
            None
        };

        let mqtt = Mqtt::new(config.mqtt().clone());

        Ok(Self {
            config,
            parameters,
            validator,
            daily_reset,
            mqtt,
            shutdown_rx,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.resubscribe();

        loop {
            tokio::select! {
                result = self.poll_once() => {
                    if let Err(err) = result {
                        self.report_cycle_error(err);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received during poll, closing session");
                    break;
                }
            }

            if self.wait_for_next_cycle(&mut shutdown_rx).await {
                break;
            }
        }

        info!("Publish loop stopped");
        Ok(())
    }

    fn report_cycle_error(&self, err: anyhow::Error) {
        if let Some(read_err) = err.downcast_ref::<ReadError>() {
            error!("Poll cycle failed: {read_err}");
        } else if let Some(validation_err) = err.downcast_ref::<ValidationError>() {
            error!("Skip publishing: {validation_err}");
        } else {
            error!("Unexpected error during poll cycle: {err:#}");
        }
    }

    /// One full cycle: handshake, read every parameter, feed the daily reset,
    /// publish. The session signs off on every path out of here; a cancelled
    /// cycle still gets its quit datagram from the session's drop handler.
    async fn poll_once(&mut self) -> Result<()> {
        let session = Session::connect(self.config.inverter()).await?;
        let device_name = session.info().serial.to_string();

        if let Some(daily_reset) = &mut self.daily_reset {
            daily_reset.begin_cycle(Local::now().naive_local());
        }

        let mut inverter = Inverter::new(session, &self.parameters, &self.validator);
        let daily_reset = &mut self.daily_reset;

        let outcome = async {
            let mut values = Vec::new();
            while let Some(value) = inverter.next_value().await? {
                if let Some(daily_reset) = daily_reset.as_mut() {
                    daily_reset
                        .observe(&value, inverter.session_mut(), Local::now().naive_local())
                        .await?;
                }
                debug!("{}: {}", value.name, value.value);
                values.push(value);
            }
            Ok::<_, anyhow::Error>(values)
        }
        .await;

        inverter.into_session().sign_off().await;
        let values = outcome?;

        // One missing register makes the whole snapshot untrustworthy.
        if let Some(missing) = values.iter().find(|value| value.value.is_no_data()) {
            warn!("Missing data for {:?}, skip publishing", missing.name);
            return Ok(());
        }

        self.mqtt.publish_values(&device_name, &values).await
    }

    /// Countdown sleep between cycles. Returns true when a shutdown arrived.
    async fn wait_for_next_cycle(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        for remaining in (1..=self.config.poll_interval()).rev() {
            debug!("Next poll in {remaining}s");
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    return true;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
        false
    }
}
