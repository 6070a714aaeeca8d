// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `DateTime`.

use std::{
    fmt,
    io::{Read, Write},
    ops::{Add, Sub},
    str::FromStr,
};

use chrono::{Duration, TimeZone, Utc};

use crate::types::encoding::*;

const NANOS_PER_TICK: i64 = 100;
const TICKS_PER_SECOND: i64 = 1_000_000_000 / NANOS_PER_TICK;

pub type DateTimeUtc = chrono::DateTime<Utc>;

lazy_static! {
    /// The OPC UA epoch, Jan 1 1601 00:00:00 UTC
    static ref EPOCH: DateTimeUtc = Utc
        .with_ymd_and_hms(1601, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    /// Dates after Dec 31 9999 23:59:59 are encoded as i64::MAX ticks
    static ref ENDTIMES: DateTimeUtc = Utc
        .with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
}

/// A date/time value in 100 nanosecond ticks since 1601-01-01, wrapping a chrono value.
/// Serializes as its ticks.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub struct DateTime {
    date_time: DateTimeUtc,
}

impl BinaryEncoder<DateTime> for DateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_i64(stream, i64::from(*self))
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let ticks = read_i64(stream)?;
        // The offset compensates for clock skew between client and server
        Ok(DateTime::from(ticks) - decoding_options.client_offset)
    }
}

impl Default for DateTime {
    fn default() -> Self {
        DateTime::epoch()
    }
}

impl Add<Duration> for DateTime {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        DateTime::from(self.date_time + duration)
    }
}

impl Sub<Duration> for DateTime {
    type Output = Self;

    fn sub(self, duration: Duration) -> Self {
        self + -duration
    }
}

impl Sub<DateTime> for DateTime {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.date_time.signed_duration_since(earlier.date_time)
    }
}

impl From<DateTimeUtc> for DateTime {
    fn from(date_time: DateTimeUtc) -> Self {
        // Truncate to tick granularity so a value survives encoding unchanged
        let ticks = Self::duration_to_ticks(date_time.signed_duration_since(*EPOCH));
        DateTime {
            date_time: Self::ticks_to_chrono(ticks),
        }
    }
}

impl From<i64> for DateTime {
    fn from(value: i64) -> Self {
        if value == i64::MAX {
            Self::endtimes()
        } else {
            DateTime {
                date_time: Self::ticks_to_chrono(value),
            }
        }
    }
}

/// Clamped to the encodable range, 0 before 1601 and `i64::MAX` after the end of 9999.
impl From<DateTime> for i64 {
    fn from(value: DateTime) -> Self {
        if value.date_time > *ENDTIMES {
            i64::MAX
        } else {
            value.ticks().max(0)
        }
    }
}

impl From<DateTime> for DateTimeUtc {
    fn from(value: DateTime) -> Self {
        value.date_time
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.date_time.to_rfc3339())
    }
}

impl FromStr for DateTime {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTimeUtc::from_str(s).map(DateTime::from).map_err(|e| {
            error!("Cannot parse date {}, error = {}", s, e);
        })
    }
}

impl DateTime {
    /// Constructs from the current time
    pub fn now() -> DateTime {
        DateTime::from(Utc::now())
    }

    /// Constructs from the current time with an offset
    pub fn now_with_offset(offset: Duration) -> DateTime {
        DateTime::from(Utc::now() + offset)
    }

    /// Creates a null date time (i.e. the epoch)
    pub fn null() -> DateTime {
        DateTime::epoch()
    }

    /// Tests if the date time is null (i.e. equal to epoch)
    pub fn is_null(&self) -> bool {
        self.ticks() == 0
    }

    pub fn epoch() -> DateTime {
        DateTime { date_time: *EPOCH }
    }

    pub fn endtimes() -> DateTime {
        DateTime {
            date_time: *ENDTIMES,
        }
    }

    /// Constructs from a year, month, day, hour, minute, second. Out of range fields give the epoch.
    pub fn ymd_hms(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .map(DateTime::from)
            .unwrap_or_default()
    }

    /// Returns the time in ticks, of 100 nanosecond intervals
    pub fn ticks(&self) -> i64 {
        Self::duration_to_ticks(self.date_time.signed_duration_since(*EPOCH))
    }

    fn ticks_to_chrono(ticks: i64) -> DateTimeUtc {
        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
        *EPOCH + Duration::seconds(secs) + Duration::nanoseconds(nanos)
    }

    fn duration_to_ticks(duration: Duration) -> i64 {
        // Whole nanoseconds would overflow i64 over this range so seconds go separately
        let seconds = duration.num_seconds();
        let remainder = (duration - Duration::seconds(seconds))
            .num_nanoseconds()
            .unwrap_or(0);
        seconds * TICKS_PER_SECOND + remainder / NANOS_PER_TICK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_after_epoch() {
        let dt = DateTime::ymd_hms(1601, 1, 1, 0, 0, 1);
        assert_eq!(dt.ticks(), TICKS_PER_SECOND);
        assert_eq!(DateTime::from(dt.ticks()), dt);
        assert!(DateTime::null().is_null());
    }

    #[test]
    fn ticks_are_clamped() {
        assert_eq!(DateTime::from(i64::MAX), DateTime::endtimes());
        assert_eq!(i64::from(DateTime::endtimes() + Duration::days(1)), i64::MAX);
        assert_eq!(i64::from(DateTime::epoch() - Duration::days(1)), 0);
    }

    #[test]
    fn serializes_as_ticks() {
        let dt = DateTime::ymd_hms(2024, 3, 1, 12, 0, 0);
        let json = serde_json::to_string(&dt).unwrap();
        assert_eq!(json, dt.ticks().to_string());
        assert_eq!(serde_json::from_str::<DateTime>(&json).unwrap(), dt);
    }
}
