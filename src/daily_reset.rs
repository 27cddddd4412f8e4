use crate::prelude::*;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::path::{Path, PathBuf};

use crate::connection::RegisterWriter;
use crate::inverter::InverterValue;

/// Base register of the device clock: year+month, day+hour, minute+second.
pub const CLOCK_REGISTER: u16 = 0x16;

/// Push the wall clock into the device. The counter rollover hangs off this:
/// the firmware only rolls `Daily Production` when its clock is set.
pub async fn set_current_time(
    writer: &mut (dyn RegisterWriter + Send),
    now: NaiveDateTime,
) -> Result<String> {
    let values = [
        (((now.year() % 100) as u16) << 8) | now.month() as u16,
        ((now.day() as u16) << 8) | now.hour() as u16,
        ((now.minute() as u16) << 8) | now.second() as u16,
    ];
    writer.write_registers(CLOCK_REGISTER, &values).await
}

/// The date of the last successful reset, mirrored to a one-line state file.
#[derive(Debug)]
pub struct ResetState {
    state_file: PathBuf,
    last_reset: Option<NaiveDate>,
}

impl ResetState {
    /// Load the persisted date. Without one (fresh install, unreadable or
    /// corrupt file) the reset counts as already done today.
    pub fn load(state_file: PathBuf, today: NaiveDate) -> Self {
        let mut state = Self {
            last_reset: Self::read(&state_file),
            state_file,
        };
        if state.last_reset.is_none() {
            warn!("No last reset date, assume the reset is done for today");
            state.mark_done(today);
        }
        state
    }

    fn read(path: &Path) -> Option<NaiveDate> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                info!("Can not read last reset date from {}: {}", path.display(), err);
                return None;
            }
        };

        match raw.trim().parse() {
            Ok(date) => {
                info!("Read last reset date: {}", date);
                Some(date)
            }
            Err(err) => {
                error!("Can not parse last reset date {:?}: {}", raw.trim(), err);
                None
            }
        }
    }

    pub fn last_reset(&self) -> Option<NaiveDate> {
        self.last_reset
    }

    pub fn done_on(&self, today: NaiveDate) -> bool {
        self.last_reset == Some(today)
    }

    /// Persist a successful reset. The stored date never moves backwards.
    pub fn mark_done(&mut self, today: NaiveDate) {
        if self.last_reset.map_or(true, |last| today > last) {
            info!(
                "Store reset date {} to {}",
                today,
                self.state_file.display()
            );
            if let Err(err) = std::fs::write(&self.state_file, today.to_string()) {
                error!(
                    "Can not write state file {}: {}",
                    self.state_file.display(),
                    err
                );
            }
            self.last_reset = Some(today);
        } else {
            info!("Reset already recorded for today, not touching the disk");
        }
    }
}

/// Forces the `Daily Production` counter to roll over once per day.
///
/// The device never resets the counter on its own; setting its clock inside
/// a configured early-morning window makes it roll. The write is repeated on
/// every nonzero counter read until a read of exactly zero confirms the roll,
/// which is then persisted.
pub struct DailyReset {
    state: ResetState,
    counter_name: String,
    window_start: NaiveTime,
    window_end: NaiveTime,
    reset_needed: bool,
    set_time_count: u64,
    successful_count: u64,
}

impl DailyReset {
    pub fn new(
        state_file: PathBuf,
        counter_name: &str,
        window_start: NaiveTime,
        window_end: NaiveTime,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            state: ResetState::load(state_file, now.date()),
            counter_name: counter_name.to_string(),
            window_start,
            window_end,
            reset_needed: false,
            set_time_count: 0,
            successful_count: 0,
        }
    }

    pub fn reset_needed(&self) -> bool {
        self.reset_needed
    }

    /// Recompute `reset_needed` for the cycle that is about to run: inside
    /// the `[start, end)` window and not yet reset today.
    pub fn begin_cycle(&mut self, now: NaiveDateTime) {
        let in_window = now.time() >= self.window_start && now.time() < self.window_end;
        self.reset_needed = in_window && !self.state.done_on(now.date());
        debug!(
            "reset_needed={} (window {}-{}, last reset {:?})",
            self.reset_needed, self.window_start, self.window_end, self.state.last_reset
        );
    }

    /// Inspect one polled value. Only the configured counter is ever acted
    /// on, and only while a reset is due.
    pub async fn observe(
        &mut self,
        value: &InverterValue,
        writer: &mut (dyn RegisterWriter + Send),
        now: NaiveDateTime,
    ) -> Result<()> {
        if !self.reset_needed {
            debug!("Not needed: last reset {:?}", self.state.last_reset);
            return Ok(());
        }

        if value.name != self.counter_name {
            debug!("Ignore {:?} (it is not {:?})", value.name, self.counter_name);
            return Ok(());
        }

        match value.value.as_number() {
            Some(counter) if counter != 0.0 => {
                info!(
                    "Counter at {counter}, set current time to reset it (write #{})",
                    self.set_time_count + 1
                );
                set_current_time(writer, now).await?;
                self.set_time_count += 1;
            }
            Some(_) => {
                self.state.mark_done(now.date());
                self.reset_needed = false;
                self.successful_count += 1;
                info!(
                    "Successfully reset counter ({} resets since start)",
                    self.successful_count
                );
            }
            None => {
                warn!(
                    "Counter {:?} is not numeric: {}",
                    value.name, value.value
                );
            }
        }
        Ok(())
    }
}
