//! # Power-Cycle Scheduler Module
//!
//! Converts a desired wake window and cadence into the line-oriented
//! schedule document consumed by the external power controller.
//!
//! This module handles:
//! - Validating wake-window and interval inputs (invalid input is rejected
//!   field-by-field, keeping the previous value)
//! - Sunrise/sunset wake windows for a coordinate
//! - Battery-adaptive cadence (Normal / Conserving / Critical)
//! - Rendering the daily schedule document (ON/OFF segments totalling
//!   exactly 1440 minutes)
//! - Change-aware writes, so the controller's storage is only touched when
//!   the schedule actually changed
//!
//! Applying the rendered document to the controller hardware lives in
//! [`crate::controller`].

pub mod sun;

use std::fs;
use std::path::PathBuf;

use chrono::{Local, NaiveTime, Timelike};
use tracing::{info, warn};

use crate::error::Result;

/// Minutes the controller keeps power on per wake. Hardware-imposed floor
/// covering boot plus one capture/upload cycle.
pub const MAX_ON_MINUTES: u32 = 4;

/// First calendar day covered by any generated schedule.
pub const HORIZON_BEGIN_DATE: &str = "2020-01-01";

/// Last instant covered by any generated schedule (the controller cannot
/// represent dates beyond 2037).
pub const HORIZON_END: &str = "2037-12-31 23:59:59";

/// Minutes in one daily schedule cycle.
const MINUTES_PER_DAY: u32 = 1440;

/// Battery state derived from the instantaneous voltage reading.
///
/// Recomputed fresh every cycle; there is no hysteresis, because the
/// schedule itself is regenerated from scratch each wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Normal,
    /// Voltage between the quarter and half thresholds: wake half as often.
    Conserving,
    /// Voltage at or below the quarter threshold: one wake per day.
    Critical,
}

/// Desired wake window and cadence, rebuilt from settings every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    start_time: NaiveTime,
    end_time: NaiveTime,
    interval_minutes: u32,
    interval_hours: u32,
    round_to_interval: bool,
}

impl Default for ScheduleSpec {
    fn default() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
            interval_minutes: 30,
            interval_hours: 0,
            round_to_interval: false,
        }
    }
}

impl ScheduleSpec {
    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn interval_hours(&self) -> u32 {
        self.interval_hours
    }

    /// Total interval length in minutes.
    pub fn interval_total_minutes(&self) -> u32 {
        self.interval_hours * 60 + self.interval_minutes
    }

    /// Set the interval length with basic validity checks.
    ///
    /// Hours and minutes are validated independently; an invalid component
    /// is rejected with a warning and the previous value kept. Minutes must
    /// leave room for the ON segment unless an hours component carries the
    /// interval.
    pub fn set_interval(&mut self, minutes: u32, hours: u32) {
        if hours < 24 {
            self.interval_hours = hours;
        } else {
            warn!("Invalid interval length (hours): {}", hours);
        }

        if minutes > MAX_ON_MINUTES && minutes <= 59 {
            self.interval_minutes = minutes;
        } else if self.interval_hours > 0 && minutes <= 59 {
            self.interval_minutes = minutes;
        } else {
            warn!("Invalid interval length (minutes): {}", minutes);
        }
    }

    /// Set the start of the wake window.
    ///
    /// Rejected (previous value kept) when the window could not fit one
    /// interval before the end of the day.
    pub fn set_start_time(&mut self, start_time: NaiveTime) {
        let limit = NaiveTime::from_hms_opt(
            23 - self.interval_hours,
            59 - self.interval_minutes,
            0,
        );

        match limit {
            Some(limit) if start_time < limit => self.start_time = start_time,
            _ => warn!("Invalid start time: {}", start_time),
        }
    }

    /// Set the end of the wake window. Always accepted.
    pub fn set_end_time(&mut self, end_time: NaiveTime) {
        self.end_time = end_time;
    }

    /// Start the wake window at sunrise and end it at sunset for the given
    /// coordinate. Times get floored onto the interval grid at rendering.
    pub fn set_sun_window(&mut self, latitude: f64, longitude: f64) {
        match sun::solar_window(latitude, longitude, Local::now().date_naive()) {
            Some((sunrise, sunset)) => {
                info!("Next sunrise: {}", sunrise.format("%H:%M"));
                self.set_start_time(sunrise.time());

                info!("Next sunset: {}", sunset.format("%H:%M"));
                self.set_end_time(sunset.time());

                self.round_to_interval = true;
            }
            None => warn!(
                "Could not determine sunrise/sunset for ({}, {})",
                latitude, longitude
            ),
        }
    }

    /// Floor a time onto the interval grid (e.g. 05:32 with a 5 minute
    /// interval becomes 05:30). Only the minutes component of the interval
    /// is considered.
    pub fn round_time_to_nearest_interval(&self, time: NaiveTime) -> NaiveTime {
        if self.interval_minutes == 0 {
            return time;
        }

        let minute = (time.minute() / self.interval_minutes) * self.interval_minutes;
        time.with_minute(minute).unwrap_or(time)
    }

    /// Number of wake repetitions between (and including) the start and end
    /// time.
    ///
    /// Start and end are compared on one calendar day and swapped when
    /// start is later, so the result is the absolute intra-day span. A
    /// window crossing midnight is therefore counted as its daytime
    /// complement, not as the overnight span.
    pub fn num_repetitions_per_day(&self) -> u32 {
        let interval = self.interval_total_minutes();
        if interval == 0 {
            return 1;
        }

        let start = minutes_of_day(self.start_time);
        let end = minutes_of_day(self.end_time);
        let span = if start > end { start - end } else { end - start };

        span / interval + 1
    }

    /// Adapt the cadence to the current battery voltage.
    ///
    /// Stateless feedback: the thresholds split the range into three
    /// bands. Between quarter and half the interval length doubles; at or
    /// below quarter the window collapses to a single daily wake.
    pub fn apply_battery_policy(
        &mut self,
        battery_voltage: f64,
        half_threshold: f64,
        low_threshold: f64,
    ) -> PowerState {
        let quarter = half_threshold - (half_threshold - low_threshold) / 2.0;

        if battery_voltage > quarter && battery_voltage < half_threshold {
            // Halve the wake frequency; the interval stays within one day.
            let doubled = (self.interval_total_minutes() * 2).min(23 * 60 + 59);
            self.interval_hours = doubled / 60;
            self.interval_minutes = doubled % 60;
            warn!(
                "Battery voltage {} V below half threshold - doubling interval to {}h{}m",
                battery_voltage, self.interval_hours, self.interval_minutes
            );
            PowerState::Conserving
        } else if battery_voltage <= quarter {
            self.end_time = self.start_time;
            warn!(
                "Battery voltage {} V critical - reducing to one wake per day",
                battery_voltage
            );
            PowerState::Critical
        } else {
            PowerState::Normal
        }
    }

    /// Render the daily schedule document.
    ///
    /// ON and OFF segments always total one calendar day (1440 minutes),
    /// since the controller loops the document daily; the final OFF
    /// segment returns control to the start of the next day's schedule.
    pub fn render(&self) -> String {
        let mut schedule = format!(
            "BEGIN\t{} {:02}:{:02}:00\nEND\t{}\n",
            HORIZON_BEGIN_DATE,
            self.start_time.hour(),
            self.start_time.minute(),
            HORIZON_END,
        );

        let repetitions = self.num_repetitions_per_day();
        let interval = self.interval_total_minutes();
        let off_minutes = interval.saturating_sub(MAX_ON_MINUTES);

        for _ in 0..repetitions.saturating_sub(1) {
            schedule.push_str(&format!(
                "ON\tM{}\nOFF\t{}\n",
                MAX_ON_MINUTES,
                format_off_duration(off_minutes)
            ));
        }

        // Last repetition has no interval gap after it
        schedule.push_str(&format!("ON\tM{}\n", MAX_ON_MINUTES));

        // Remainder of the 24-hour cycle
        let remaining = i64::from(MINUTES_PER_DAY) - i64::from(repetitions * interval)
            + i64::from(off_minutes);
        if remaining > 0 {
            schedule.push_str(&format!(
                "OFF\t{}",
                format_off_duration(remaining as u32)
            ));
        }

        schedule
    }
}

fn minutes_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Format an OFF duration as hours and minutes, omitting zero components
/// (`H20 M26`, `H23`, `M26`).
fn format_off_duration(total_minutes: u32) -> String {
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 0 && minutes > 0 {
        format!("H{hours} M{minutes}")
    } else if hours > 0 {
        format!("H{hours}")
    } else {
        format!("M{minutes}")
    }
}

/// Scheduler: owns the current [`ScheduleSpec`] and the on-disk schedule
/// document.
#[derive(Debug)]
pub struct Scheduler {
    spec: ScheduleSpec,
    schedule_path: PathBuf,
}

impl Scheduler {
    pub fn new(schedule_path: PathBuf) -> Self {
        Self {
            spec: ScheduleSpec::default(),
            schedule_path,
        }
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut ScheduleSpec {
        &mut self.spec
    }

    /// Generate the daily schedule and write it to the schedule document.
    ///
    /// The rendered text is compared byte-for-byte with the existing
    /// document and only written on change, minimizing writes to the
    /// controller's storage. Returns whether the document was (re)written.
    pub fn generate_schedule(&mut self) -> Result<bool> {
        if self.spec.round_to_interval {
            self.spec.start_time =
                self.spec.round_time_to_nearest_interval(self.spec.start_time);
            self.spec.end_time =
                self.spec.round_time_to_nearest_interval(self.spec.end_time);
        }

        if self.spec.start_time > self.spec.end_time {
            std::mem::swap(&mut self.spec.start_time, &mut self.spec.end_time);
        }

        let schedule = self.spec.render();

        match fs::read_to_string(&self.schedule_path) {
            Ok(existing) if existing == schedule => {
                info!("Schedule did not change.");
                Ok(false)
            }
            Ok(_) => {
                info!("Schedule changed - writing new schedule document.");
                fs::write(&self.schedule_path, schedule)?;
                Ok(true)
            }
            Err(_) => {
                warn!("Schedule document not found. Writing new schedule document.");
                fs::write(&self.schedule_path, schedule)?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn spec(start: NaiveTime, end: NaiveTime, minutes: u32, hours: u32) -> ScheduleSpec {
        let mut spec = ScheduleSpec::default();
        spec.set_interval(minutes, hours);
        spec.set_start_time(start);
        spec.set_end_time(end);
        spec
    }

    /// Sum the ON/OFF durations of a rendered document, in minutes.
    fn total_minutes(document: &str) -> u32 {
        document
            .lines()
            .skip(2)
            .map(|line| {
                let duration = line.split('\t').nth(1).unwrap();
                duration
                    .split(' ')
                    .map(|part| {
                        let value: u32 = part[1..].parse().unwrap();
                        match part.as_bytes()[0] {
                            b'H' => value * 60,
                            b'M' => value,
                            other => panic!("unexpected duration component: {}", other as char),
                        }
                    })
                    .sum::<u32>()
            })
            .sum()
    }

    #[test]
    fn test_round_time_to_nearest_interval_is_a_floor() {
        let mut spec = ScheduleSpec::default();

        spec.set_interval(15, 0);
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 15)), time(5, 15));
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 20)), time(5, 15));
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 30)), time(5, 30));

        spec.set_interval(30, 0);
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 20)), time(5, 0));

        spec.set_interval(5, 0);
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 32)), time(5, 30));

        spec.set_interval(29, 0);
        assert_eq!(spec.round_time_to_nearest_interval(time(5, 30)), time(5, 29));
    }

    #[test]
    fn test_num_repetitions_per_day() {
        // Degraded 3-minute interval, constructed directly: the setter
        // would reject it.
        let s = ScheduleSpec {
            start_time: time(0, 0),
            end_time: time(0, 17),
            interval_minutes: 3,
            interval_hours: 0,
            round_to_interval: false,
        };
        assert_eq!(s.num_repetitions_per_day(), 6);

        let mut s = ScheduleSpec::default();
        s.set_interval(15, 0);
        s.set_start_time(time(5, 0));
        s.set_end_time(time(6, 0));
        assert_eq!(s.num_repetitions_per_day(), 5);

        let mut s = ScheduleSpec::default();
        s.set_interval(0, 1);
        s.set_start_time(time(6, 0));
        s.set_end_time(time(18, 0));
        assert_eq!(s.num_repetitions_per_day(), 13);
    }

    #[test]
    fn test_num_repetitions_identical_start_end_is_one() {
        let s = spec(time(8, 0), time(8, 0), 30, 0);
        assert_eq!(s.num_repetitions_per_day(), 1);
    }

    #[test]
    fn test_num_repetitions_long_interval() {
        // 09:00..12:25 with a 4h01m interval: the span (205 min) fits no
        // full interval, leaving the single initial repetition.
        let s = spec(time(9, 0), time(12, 25), 1, 4);
        assert_eq!(s.num_repetitions_per_day(), 1);
    }

    #[test]
    fn test_num_repetitions_swaps_inverted_window() {
        // An overnight window is counted as its absolute intra-day span.
        let mut s = ScheduleSpec::default();
        s.set_interval(0, 1);
        s.set_start_time(time(22, 0));
        s.set_end_time(time(4, 0));
        assert_eq!(s.num_repetitions_per_day(), 19);
    }

    #[test]
    fn test_set_interval_rejects_invalid_components() {
        let mut s = ScheduleSpec::default();

        // Minutes not above the ON floor, no hours component: rejected
        s.set_interval(3, 0);
        assert_eq!(s.interval_minutes(), 30);
        assert_eq!(s.interval_hours(), 0);

        // Hours out of range rejected, minutes accepted
        s.set_interval(25, 24);
        assert_eq!(s.interval_minutes(), 25);
        assert_eq!(s.interval_hours(), 0);

        // Small minutes become valid once an hours component carries the interval
        s.set_interval(0, 2);
        assert_eq!(s.interval_minutes(), 0);
        assert_eq!(s.interval_hours(), 2);
    }

    #[test]
    fn test_set_start_time_rejects_late_start() {
        let mut s = ScheduleSpec::default();
        s.set_interval(30, 0);

        s.set_start_time(time(23, 40));
        assert_eq!(s.start_time(), time(8, 0));

        s.set_start_time(time(6, 30));
        assert_eq!(s.start_time(), time(6, 30));
    }

    #[test]
    fn test_set_end_time_always_accepted() {
        let mut s = ScheduleSpec::default();
        s.set_end_time(time(23, 59));
        assert_eq!(s.end_time(), time(23, 59));
    }

    #[test]
    fn test_render_known_document() {
        let s = spec(time(7, 30), time(11, 0), 30, 0);
        let expected = "BEGIN\t2020-01-01 07:30:00\nEND\t2037-12-31 23:59:59\n\
            ON\tM4\nOFF\tM26\nON\tM4\nOFF\tM26\nON\tM4\nOFF\tM26\nON\tM4\nOFF\tM26\n\
            ON\tM4\nOFF\tM26\nON\tM4\nOFF\tM26\nON\tM4\nOFF\tM26\nON\tM4\nOFF\tH20 M26";
        assert_eq!(s.render(), expected);
    }

    #[test]
    fn test_render_short_window() {
        let s = spec(time(12, 0), time(12, 5), 5, 0);
        let expected = "BEGIN\t2020-01-01 12:00:00\nEND\t2037-12-31 23:59:59\n\
            ON\tM4\nOFF\tM1\nON\tM4\nOFF\tH23 M51";
        assert_eq!(s.render(), expected);
    }

    #[test]
    fn test_render_whole_hour_remainder_keeps_off_segment() {
        // 2 repetitions of a 56-minute interval leave exactly 23 hours;
        // the final OFF must still be emitted, with the zero minutes
        // component omitted.
        let s = spec(time(9, 0), time(9, 56), 56, 0);
        assert!(s.render().ends_with("OFF\tH23"));
        assert_eq!(total_minutes(&s.render()), 1440);
    }

    #[test]
    fn test_rendered_documents_cover_exactly_one_day() {
        let cases = [
            (time(7, 30), time(11, 0), 30, 0),
            (time(5, 20), time(21, 40), 15, 0),
            (time(0, 0), time(23, 59), 5, 0),
            (time(8, 0), time(8, 0), 30, 0),
            (time(6, 0), time(18, 0), 0, 1),
            (time(9, 0), time(12, 25), 1, 4),
            (time(10, 0), time(11, 30), 45, 2),
        ];

        for (start, end, minutes, hours) in cases {
            let s = spec(start, end, minutes, hours);
            assert_eq!(
                total_minutes(&s.render()),
                1440,
                "schedule for {start}..{end} interval {hours}h{minutes}m"
            );
        }
    }

    #[test]
    fn test_generate_schedule_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.wpi");
        let mut scheduler = Scheduler::new(path.clone());

        assert!(scheduler.generate_schedule().unwrap());
        let first = fs::read_to_string(&path).unwrap();

        // Unchanged inputs: not rewritten
        assert!(!scheduler.generate_schedule().unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), first);

        // Changed inputs: rewritten
        scheduler.spec_mut().set_interval(15, 0);
        assert!(scheduler.generate_schedule().unwrap());
        assert_ne!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_generate_schedule_rounds_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.wpi");
        let mut scheduler = Scheduler::new(path);

        let spec = scheduler.spec_mut();
        spec.set_interval(15, 0);
        spec.set_start_time(time(20, 10));
        spec.set_end_time(time(5, 20));
        spec.round_to_interval = true;

        scheduler.generate_schedule().unwrap();

        // Both times floored onto the grid, then swapped into order
        assert_eq!(scheduler.spec().start_time(), time(5, 15));
        assert_eq!(scheduler.spec().end_time(), time(20, 0));
    }

    #[test]
    fn test_battery_policy_normal() {
        let mut s = spec(time(8, 0), time(20, 0), 30, 0);
        let state = s.apply_battery_policy(12.5, 12.0, 11.0);
        assert_eq!(state, PowerState::Normal);
        assert_eq!(s.interval_total_minutes(), 30);
        assert_eq!(s.end_time(), time(20, 0));
    }

    #[test]
    fn test_battery_policy_conserving_doubles_interval() {
        let mut s = spec(time(8, 0), time(20, 0), 30, 0);
        let state = s.apply_battery_policy(11.8, 12.0, 11.0);
        assert_eq!(state, PowerState::Conserving);
        assert_eq!(s.interval_hours(), 1);
        assert_eq!(s.interval_minutes(), 0);
    }

    #[test]
    fn test_battery_policy_critical_collapses_to_single_wake() {
        let mut s = spec(time(8, 0), time(20, 0), 30, 0);
        let state = s.apply_battery_policy(11.5, 12.0, 11.0);
        assert_eq!(state, PowerState::Critical);
        assert_eq!(s.num_repetitions_per_day(), 1);
    }

    #[test]
    fn test_battery_policy_doubling_caps_below_one_day() {
        let mut s = ScheduleSpec::default();
        s.set_interval(59, 23);
        s.apply_battery_policy(11.8, 12.0, 11.0);
        assert_eq!(s.interval_hours(), 23);
        assert_eq!(s.interval_minutes(), 59);
    }
}
