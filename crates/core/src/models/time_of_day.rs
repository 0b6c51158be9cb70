use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Offset, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SchedulerError;

/// 一天中的时刻（时:分），不含日期和时区
///
/// 允许 `24:00`，表示当天结束（即次日零点）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub const MIDNIGHT_END: TimeOfDay = TimeOfDay { hour: 24, minute: 0 };

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        let valid = (hour < 24 && minute < 60) || (hour == 24 && minute == 0);
        valid.then_some(Self { hour, minute })
    }

    pub fn from_time<T: Timelike>(time: &T) -> Self {
        Self {
            hour: time.hour(),
            minute: time.minute(),
        }
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn is_before(&self, other: &TimeOfDay) -> bool {
        self < other
    }

    /// 该时刻落在 `date` 所在日期（按 `date` 的时区）时的时间点
    pub fn on_date<Tz: TimeZone>(&self, date: &DateTime<Tz>) -> DateTime<Tz> {
        let naive = date.date_naive().and_time(NaiveTime::MIN)
            + Duration::hours(i64::from(self.hour))
            + Duration::minutes(i64::from(self.minute));

        let tz = date.timezone();
        match tz.from_local_datetime(&naive) {
            chrono::LocalResult::Single(t) => t,
            chrono::LocalResult::Ambiguous(earliest, _) => earliest,
            // 夏令时跳变的空档：沿用当前偏移量
            chrono::LocalResult::None => {
                let offset = date.offset().fix().local_minus_utc();
                tz.from_utc_datetime(&(naive - Duration::seconds(i64::from(offset))))
            }
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchedulerError::Serialization(format!("无效的时刻: {s:?}"));

        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        TimeOfDay::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl_sqlite_text_type!(TimeOfDay);
