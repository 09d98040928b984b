//! # FieldCam
//!
//! Control plane for an unattended, solar/battery-powered field camera.
//!
//! One invocation is one wake cycle: connect to the remote store, sync and
//! validate settings, regenerate and apply the power schedule, assemble
//! the cycle's telemetry record and deliver (or spool) it, then hand
//! control back to the power controller. Every step is best-effort; no
//! failure aborts the cycle, because the device must still go back to
//! sleep on schedule even when everything else is broken.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveTime};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fieldcam::config::{Config, DEFAULT_CONFIG_PATH};
use fieldcam::controller::{
    CommandRunner, PowerController, ShellCommandRunner, APPLY_FAILURE_SENTINEL,
};
use fieldcam::scheduler::Scheduler;
use fieldcam::settings::Settings;
use fieldcam::store::FileStore;
use fieldcam::telemetry::TelemetryLog;

/// Execution bound for the system shutdown command.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Without a device configuration the cycle still runs offline with
    // defaults: the controller must receive a schedule no matter what.
    let (config, config_error) = match Config::load(DEFAULT_CONFIG_PATH) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    // Console plus a daily-rolling local log file; the file is the only
    // on-site debugging artifact on a headless device.
    std::fs::create_dir_all(&config.paths.log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&config.paths.log_dir, "fieldcam.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    info!("FieldCam v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut errors: Vec<String> = Vec::new();
    if let Some(e) = config_error {
        record_failure(&mut errors, "Could not load device configuration", e);
    }

    // Remote store session
    let mut store = if config.store.host.is_empty() {
        warn!("No store host configured - running cycle offline");
        FileStore::disconnected()
    } else {
        FileStore::connect(
            &config.store.host,
            config.store.port,
            &config.store.username,
            &config.store.password,
        )
        .await
    };

    if !config.store.host.is_empty() && !store.connected() {
        errors.push("Could not connect to file store".to_string());
    }

    if store.connected() && !config.store.directory.is_empty() {
        if let Err(e) = store.change_directory(&config.store.directory, true) {
            record_failure(&mut errors, "Could not change directory on file store", e);
        }
    }

    if store.connected() && config.store.multiple_cameras {
        let camera_dir = config.camera_directory_name();
        if let Err(e) = store.change_directory(&camera_dir, true) {
            record_failure(&mut errors, "Could not enter camera directory", e);
        }
    }

    // Settings sync: download the shared document, or bootstrap the store
    // from the local copy so state is self-healing.
    let settings_path = config.paths.local_dir.join(&config.telemetry.settings_file);
    if store.connected() {
        match store.list_files() {
            Ok(files) if files.iter().any(|f| f == &config.telemetry.settings_file) => {
                // Informational only, so a failed query falls back to now
                let modified = store
                    .get_file_last_modified_date(&config.telemetry.settings_file)
                    .unwrap_or_else(|_| Local::now().naive_local());
                info!("Remote settings last modified: {}", modified);

                if let Err(e) =
                    store.download_file(&config.telemetry.settings_file, &settings_path)
                {
                    record_failure(&mut errors, "Could not download settings", e);
                }
            }
            Ok(_) => {
                info!("No settings document on the store - uploading local settings");
                if !settings_path.exists() {
                    if let Err(e) = Settings::defaults().save_to_file(&settings_path) {
                        record_failure(&mut errors, "Could not write default settings", e);
                    }
                }
                if let Err(e) =
                    store.upload_file(&config.telemetry.settings_file, &settings_path, false)
                {
                    record_failure(&mut errors, "Could not upload settings", e);
                }
            }
            Err(e) => record_failure(&mut errors, "Could not list store files", e),
        }
    }

    let settings = Settings::load(&settings_path);
    if !settings.is_valid() {
        let message = "Settings document was repaired with default values";
        warn!("{}", message);
        errors.push(message.to_string());
    }

    let runner = ShellCommandRunner;
    let controller = PowerController::new(
        runner,
        config.controller.dir.clone(),
        config.controller.apply_attempts,
    );

    // Controller clock sync (needs the network anyway, so only when the
    // store is reachable)
    if settings.get_bool("timeSync").unwrap_or(false) && store.connected() {
        if let Err(e) = controller.sync_time_with_network().await {
            record_failure(&mut errors, "Could not synchronize time with network", e);
        }
    }

    // Voltage thresholds from settings
    let low_threshold = settings.get_f64("lowVoltageThreshold").unwrap_or(0.0);
    if let Err(e) = controller.set_low_voltage_threshold(low_threshold).await {
        record_failure(&mut errors, "Could not set low voltage threshold", e);
    }

    let recovery_threshold = settings.get_f64("recoveryVoltageThreshold").unwrap_or(0.0);
    if let Err(e) = controller
        .set_recovery_voltage_threshold(recovery_threshold)
        .await
    {
        record_failure(&mut errors, "Could not set recovery voltage threshold", e);
    }

    // Build the wake schedule for this cycle
    let mut scheduler = Scheduler::new(config.paths.schedule_file.clone());
    {
        let spec = scheduler.spec_mut();
        let minutes = settings.get_i64("intervalMinutes").unwrap_or(30) as u32;
        let hours = settings.get_i64("intervalHours").unwrap_or(0) as u32;
        spec.set_interval(minutes, hours);

        if let Some(start) = time_setting(&settings, "startTimeHour", "startTimeMinute") {
            spec.set_start_time(start);
        }
        if let Some(end) = time_setting(&settings, "endTimeHour", "endTimeMinute") {
            spec.set_end_time(end);
        }

        if settings.get_bool("enableSunriseSunset").unwrap_or(false) {
            let latitude = settings.get_f64("latitude").unwrap_or(0.0);
            let longitude = settings.get_f64("longitude").unwrap_or(0.0);
            spec.set_sun_window(latitude, longitude);
        }
    }

    // Battery-adaptive cadence, only on a fresh successful reading: a
    // failed read must not masquerade as an empty battery.
    let battery_voltage = match controller.get_battery_voltage().await {
        Ok(voltage) => {
            let half = settings.get_f64("batteryVoltageHalf").unwrap_or(12.0);
            let state = scheduler
                .spec_mut()
                .apply_battery_policy(voltage, half, low_threshold);
            info!("Battery state: {:?}", state);
            Some(voltage)
        }
        Err(e) => {
            record_failure(&mut errors, "Could not get battery voltage", e);
            None
        }
    };

    match scheduler.generate_schedule() {
        Ok(true) => info!("Schedule document updated"),
        Ok(false) => {}
        Err(e) => record_failure(&mut errors, "Could not write schedule document", e),
    }

    let next_startup_time = controller.apply_schedule().await;
    if next_startup_time == APPLY_FAILURE_SENTINEL {
        errors.push("Failed to apply schedule".to_string());
    }

    // Remaining sensor readings for this cycle's record
    let temperature = reading(
        &mut errors,
        "Could not get temperature",
        controller.get_temperature().await,
    );
    let internal_voltage = reading(
        &mut errors,
        "Could not get internal voltage",
        controller.get_internal_voltage().await,
    );
    let internal_current = reading(
        &mut errors,
        "Could not get internal current",
        controller.get_internal_current().await,
    );

    // Assemble and deliver telemetry
    let mut telemetry = TelemetryLog::new(
        config.paths.spool_file.clone(),
        config.telemetry.legacy_spool_delete,
    );
    telemetry.add(
        "timestamp",
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    telemetry.add("next_startup_time", next_startup_time.clone());
    telemetry.add("battery_voltage", option_value(battery_voltage));
    telemetry.add("internal_voltage", option_value(internal_voltage));
    telemetry.add("internal_current", option_value(internal_current));
    telemetry.add("temperature", option_value(temperature));
    telemetry.add("error", errors.join("; "));

    flush_telemetry(&mut store, &mut telemetry, &config);

    // Controller's own diagnostics, appended to the remote log on request
    if settings.get_bool("uploadDiagnostics").unwrap_or(false) && store.connected() {
        let controller_dir = Path::new(&config.controller.dir);
        if let Err(e) = store.append_file(
            "controllerDiagnostics.txt",
            &controller_dir.join("wittyPi.log"),
            false,
        ) {
            warn!("Could not upload controller diagnostics: {}", e);
        }
        if let Err(e) = store.append_file(
            "controllerSchedule.txt",
            &controller_dir.join("schedule.log"),
            false,
        ) {
            warn!("Could not upload controller schedule log: {}", e);
        }
    }

    if let Err(e) = store.quit() {
        warn!("Could not close store session: {}", e);
    }

    // Hand control back to the power controller
    if settings.get_bool("shutdown").unwrap_or(true) {
        info!("Cycle complete, shutting down now.");
        if let Err(e) = runner.run("sudo shutdown -h now", SHUTDOWN_TIMEOUT).await {
            warn!("Could not shut down: {}", e);
        }
    } else {
        info!("Cycle complete, shutdown disabled.");
    }

    Ok(())
}

/// Deliver the cycle's telemetry, or spool it locally while offline.
fn flush_telemetry(store: &mut FileStore, telemetry: &mut TelemetryLog, config: &Config) {
    if !store.connected() {
        // Offline: grow the spool monotonically until connectivity returns
        if let Err(e) = telemetry.append_diagnostics_to_file() {
            warn!("Could not spool telemetry locally: {}", e);
        }
        return;
    }

    if let Err(e) = telemetry.load_diagnostics() {
        warn!("Could not load spooled telemetry: {}", e);
    }

    let data = match telemetry.get_data_as_bytes() {
        Ok(data) => data,
        Err(e) => {
            warn!("Could not serialize telemetry: {}", e);
            return;
        }
    };

    match store.append_file_from_bytes(&config.telemetry.remote_log, &data) {
        Ok(()) => {
            if !config.telemetry.legacy_spool_delete {
                if let Err(e) = telemetry.discard_spool() {
                    warn!("Could not discard delivered spool: {}", e);
                }
            }
        }
        Err(e) => {
            warn!("Could not deliver telemetry: {}", e);
            if !config.telemetry.legacy_spool_delete {
                // Keep the whole combined sequence for the next cycle
                if let Err(e) = telemetry.save_diagnostics() {
                    warn!("Could not rewrite telemetry spool: {}", e);
                }
            }
        }
    }
}

fn record_failure(errors: &mut Vec<String>, context: &str, error: impl std::fmt::Display) {
    warn!("{}: {}", context, error);
    errors.push(format!("{context}: {error}"));
}

fn reading(
    errors: &mut Vec<String>,
    context: &str,
    result: fieldcam::error::Result<f64>,
) -> Option<f64> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            record_failure(errors, context, e);
            None
        }
    }
}

fn option_value(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn time_setting(settings: &Settings, hour_key: &str, minute_key: &str) -> Option<NaiveTime> {
    let hour = settings.get_i64(hour_key)?;
    let minute = settings.get_i64(minute_key)?;
    NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_option_value_maps_missing_readings_to_null() {
        assert_eq!(option_value(Some(12.4)), json!(12.4));
        assert_eq!(option_value(None), Value::Null);
    }

    #[test]
    fn test_time_setting_reads_validated_fields() {
        let settings = Settings::defaults();
        assert_eq!(
            time_setting(&settings, "startTimeHour", "startTimeMinute"),
            NaiveTime::from_hms_opt(8, 0, 0)
        );
        assert_eq!(time_setting(&settings, "noSuchHour", "noSuchMinute"), None);
    }

    #[test]
    fn test_record_failure_accumulates_context() {
        let mut errors = Vec::new();
        record_failure(&mut errors, "Could not frobnicate", "gears jammed");
        assert_eq!(errors, ["Could not frobnicate: gears jammed"]);
    }
}
