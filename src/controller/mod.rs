//! # Power Controller Module
//!
//! Command surface of the external power controller board: the peripheral
//! that cuts and restores the device's power according to the schedule
//! document.
//!
//! This module handles:
//! - Running controller utility commands as bounded subprocess calls
//! - Sensor readings: temperature, battery voltage, internal voltage and
//!   current
//! - Voltage threshold management (low / recovery)
//! - Clock synchronization with network time
//! - Applying the schedule document, with exponential-backoff retries
//!
//! Every reading returns a typed `Result`; the orchestrator records
//! failures in telemetry and keeps the cycle going.

pub mod command;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::{FieldcamError, Result};
pub use command::{CommandRunner, ShellCommandRunner};

/// Execution bound for controller utility commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Execution bound for the apply-schedule script (it reprograms the RTC
/// alarms and can take a while).
const APPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Success marker in the apply-schedule output.
const NEXT_STARTUP_MARKER: &str = "Schedule next startup at:";

/// Width of the `YYYY-mm-dd HH:MM:SS` timestamp trailing the marker line.
const NEXT_STARTUP_WIDTH: usize = 19;

/// Returned by [`PowerController::apply_schedule`] when every attempt
/// failed: "next wake unknown". Callers continue regardless.
pub const APPLY_FAILURE_SENTINEL: &str = "-";

/// Interface to the power controller board.
#[derive(Debug)]
pub struct PowerController<R: CommandRunner> {
    runner: R,
    controller_dir: String,
    max_apply_attempts: u32,
}

impl<R: CommandRunner> PowerController<R> {
    pub fn new(runner: R, controller_dir: impl Into<String>, max_apply_attempts: u32) -> Self {
        Self {
            runner,
            controller_dir: controller_dir.into(),
            max_apply_attempts,
        }
    }

    /// Run a controller utility command and return its trimmed output.
    async fn run_command(&self, command: &str) -> Result<String> {
        let script = format!(
            "cd {} && . ./utilities.sh && {}",
            self.controller_dir, command
        );
        let output = self.runner.run(&script, COMMAND_TIMEOUT).await?;
        Ok(output.trim().to_string())
    }

    /// Sync the controller clock with network time.
    pub async fn sync_time_with_network(&self) -> Result<()> {
        let output = self.run_command("net_to_system && system_to_rtc").await?;
        info!("Time synchronized with network: {}", output);
        Ok(())
    }

    /// Current temperature reading in °C.
    pub async fn get_temperature(&self) -> Result<f64> {
        let raw = self.run_command("get_temperature").await?;
        let temperature = parse_temperature(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable temperature reading: {raw}"))
        })?;
        info!("Temperature: {} °C", temperature);
        Ok(temperature)
    }

    /// Battery (input) voltage in V.
    pub async fn get_battery_voltage(&self) -> Result<f64> {
        let raw = self.run_command("get_input_voltage").await?;
        let voltage = parse_voltage(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable battery voltage: {raw}"))
        })?;
        info!("Battery voltage: {} V", voltage);
        Ok(voltage)
    }

    /// Internal (5V rail) voltage in V.
    pub async fn get_internal_voltage(&self) -> Result<f64> {
        let raw = self.run_command("get_output_voltage").await?;
        let voltage = parse_voltage(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable internal voltage: {raw}"))
        })?;
        info!("Output voltage: {} V", voltage);
        Ok(voltage)
    }

    /// Internal (5V rail) current in A.
    pub async fn get_internal_current(&self) -> Result<f64> {
        let raw = self.run_command("get_output_current").await?;
        let current = parse_voltage(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable internal current: {raw}"))
        })?;
        info!("Output current: {} A", current);
        Ok(current)
    }

    /// Low voltage cutoff threshold in V; 0.0 when disabled.
    pub async fn get_low_voltage_threshold(&self) -> Result<f64> {
        let raw = self.run_command("get_low_voltage_threshold").await?;
        let threshold = parse_threshold(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable low voltage threshold: {raw}"))
        })?;
        info!("Low voltage threshold: {} V", threshold);
        Ok(threshold)
    }

    /// Recovery voltage threshold in V; 0.0 when disabled.
    pub async fn get_recovery_voltage_threshold(&self) -> Result<f64> {
        let raw = self.run_command("get_recovery_voltage_threshold").await?;
        let threshold = parse_threshold(&raw).ok_or_else(|| {
            FieldcamError::Controller(format!("unparseable recovery voltage threshold: {raw}"))
        })?;
        info!("Recovery voltage threshold: {} V", threshold);
        Ok(threshold)
    }

    /// Set the low voltage cutoff threshold (2.0–25.0 V, or 0 to disable).
    ///
    /// The write is skipped when the controller already holds the
    /// requested value.
    pub async fn set_low_voltage_threshold(&self, voltage: f64) -> Result<()> {
        validate_threshold(voltage)?;

        let current = self.get_low_voltage_threshold().await?;
        if tenths(current) == tenths(voltage) {
            info!("Low voltage threshold already set to: {} V", voltage);
            return Ok(());
        }

        let output = self
            .run_command(&format!("set_low_voltage_threshold {}", tenths(voltage)))
            .await?;
        info!("Set low voltage threshold to: {} V", output);
        Ok(())
    }

    /// Set the recovery voltage threshold (2.0–25.0 V, or 0 to disable).
    pub async fn set_recovery_voltage_threshold(&self, voltage: f64) -> Result<()> {
        validate_threshold(voltage)?;

        let current = self.get_recovery_voltage_threshold().await?;
        if tenths(current) == tenths(voltage) {
            info!("Recovery voltage threshold already set to: {} V", voltage);
            return Ok(());
        }

        let output = self
            .run_command(&format!(
                "set_recovery_voltage_threshold {}",
                tenths(voltage)
            ))
            .await?;
        info!("Set recovery voltage threshold to: {} V", output);
        Ok(())
    }

    /// Apply the schedule document to the controller.
    ///
    /// Retries with exponential backoff; a failed attempt triggers a
    /// network time sync first, since RTC drift is the most common cause
    /// of apply failures. Exhausting all attempts yields
    /// [`APPLY_FAILURE_SENTINEL`] ("next wake unknown") rather than an
    /// error: the cycle continues either way.
    pub async fn apply_schedule(&self) -> String {
        let script = format!("cd {} && sudo ./runScript.sh", self.controller_dir);

        for attempt in 0..self.max_apply_attempts {
            match self.runner.run(&script, APPLY_TIMEOUT).await {
                Ok(output) => {
                    if let Some(next_startup) = parse_next_startup(&output) {
                        info!("Schedule applied, next startup at {}", next_startup);
                        return next_startup;
                    }

                    warn!(
                        "Failed to apply schedule: {}",
                        output.lines().next().unwrap_or("")
                    );
                    if let Err(e) = self.sync_time_with_network().await {
                        warn!("Could not synchronize time with network: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to apply schedule: {} (attempt {})", e, attempt);
                }
            }

            if attempt + 1 < self.max_apply_attempts {
                sleep(Duration::from_secs(1u64 << attempt)).await;
            }
        }

        APPLY_FAILURE_SENTINEL.to_string()
    }
}

fn tenths(voltage: f64) -> i64 {
    (voltage * 10.0).round() as i64
}

fn validate_threshold(voltage: f64) -> Result<()> {
    if (2.0..=25.0).contains(&voltage) || voltage == 0.0 {
        Ok(())
    } else {
        Err(FieldcamError::Controller(format!(
            "voltage must be between 2.0 and 25.0 V (or 0 to disable), got {voltage}"
        )))
    }
}

/// Parse a `"<c>°C / <f>°F"` reading into °C.
fn parse_temperature(raw: &str) -> Option<f64> {
    let celsius = raw.split('/').next()?.trim();
    celsius.trim_end_matches("°C").trim().parse().ok()
}

/// Parse a voltage/current reading, tolerating a trailing unit letter.
fn parse_voltage(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim()
        .parse()
        .ok()
}

/// Parse a threshold reading; `disabled` maps to 0.0.
fn parse_threshold(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw == "disabled" {
        return Some(0.0);
    }
    parse_voltage(raw)
}

/// Find the next-wake timestamp in the last two output lines of the
/// apply-schedule script.
fn parse_next_startup(output: &str) -> Option<String> {
    for line in output.lines().rev().take(2) {
        if line.contains(NEXT_STARTUP_MARKER) {
            return tail_chars(line, NEXT_STARTUP_WIDTH).map(str::to_string);
        }
    }
    None
}

/// Last `n` characters of a string (char-aware).
fn tail_chars(s: &str, n: usize) -> Option<&str> {
    let count = s.chars().count();
    if count < n {
        return None;
    }
    if count == n {
        return Some(s);
    }
    let (idx, _) = s.char_indices().nth(count - n)?;
    Some(&s[idx..])
}
