use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TimeOfDay;

/// Worker的每周睡眠计划
///
/// - `days_of_week`: 以空格分隔的两字母小写星期名，如 `"mo tu we"`；为空表示每天
/// - `start_time`: 为空表示从零点开始
/// - `end_time`: 为空表示到午夜结束
/// - `next_check`: 下一次需要重新评估该计划的时间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SleepSchedule {
    pub worker_id: Uuid,
    pub is_active: bool,
    pub days_of_week: String,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub next_check: Option<DateTime<Utc>>,
}

impl SleepSchedule {
    pub fn new(worker_id: Uuid) -> Self {
        Self {
            worker_id,
            is_active: false,
            days_of_week: String::new(),
            start_time: None,
            end_time: None,
            next_check: None,
        }
    }
}
