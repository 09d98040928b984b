//! Sunrise/sunset computation for sun-tracking wake windows.

use chrono::{DateTime, Datelike, Local, NaiveDate};

/// Today's sunrise and sunset for a coordinate, in local time.
///
/// Returns `None` when the timestamps cannot be represented (the
/// astronomical model yields no meaningful result, e.g. polar day/night).
pub fn solar_window(
    latitude: f64,
    longitude: f64,
    date: NaiveDate,
) -> Option<(DateTime<Local>, DateTime<Local>)> {
    let (sunrise_ts, sunset_ts) =
        sunrise::sunrise_sunset(latitude, longitude, date.year(), date.month(), date.day());

    let sunrise = DateTime::from_timestamp(sunrise_ts, 0)?.with_timezone(&Local);
    let sunset = DateTime::from_timestamp(sunset_ts, 0)?.with_timezone(&Local);

    if sunset <= sunrise {
        return None;
    }

    Some((sunrise, sunset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equatorial_day_is_about_twelve_hours() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        let (sunrise, sunset) = solar_window(0.0, 0.0, date).unwrap();

        let daylight = sunset - sunrise;
        assert!(
            (10..=14).contains(&daylight.num_hours()),
            "unexpected daylight duration: {:?}",
            daylight
        );
    }

    #[test]
    fn test_midlatitude_summer_day_is_long() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let (sunrise, sunset) = solar_window(46.8, 9.5, date).unwrap();

        let daylight = sunset - sunrise;
        assert!(daylight.num_hours() >= 14, "daylight: {:?}", daylight);
    }
}
