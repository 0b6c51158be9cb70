use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Local, TimeZone, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use farm_core::{
    models::{SleepSchedule, TimeOfDay, WorkerStatus, WorkerUpdate},
    traits::{ChangeBroadcaster, Clock, SleepScheduleRepository, WorkerRepository},
    SchedulerError, SchedulerResult,
};

/// Worker睡眠/唤醒计划调度器
///
/// 计划按 `Tz` 时区的本地时间解释，默认使用Manager所在机器的时区。
pub struct SleepScheduler<Tz: TimeZone = Local> {
    schedule_repo: Arc<dyn SleepScheduleRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    broadcaster: Arc<dyn ChangeBroadcaster>,
    clock: Arc<dyn Clock>,
    check_interval: std::time::Duration,
    tz: Tz,
}

impl SleepScheduler<Local> {
    pub fn new(
        schedule_repo: Arc<dyn SleepScheduleRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        broadcaster: Arc<dyn ChangeBroadcaster>,
        clock: Arc<dyn Clock>,
        check_interval: std::time::Duration,
    ) -> Self {
        Self {
            schedule_repo,
            worker_repo,
            broadcaster,
            clock,
            check_interval,
            tz: Local,
        }
    }
}

impl<Tz> SleepScheduler<Tz>
where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    /// 换用其他时区解释睡眠计划
    pub fn with_timezone<T: TimeZone>(self, tz: T) -> SleepScheduler<T> {
        SleepScheduler {
            schedule_repo: self.schedule_repo,
            worker_repo: self.worker_repo,
            broadcaster: self.broadcaster,
            clock: self.clock,
            check_interval: self.check_interval,
            tz,
        }
    }

    fn now(&self) -> DateTime<Tz> {
        self.clock.now().with_timezone(&self.tz)
    }

    /// 每隔固定间隔检查到期的睡眠计划，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval = ?self.check_interval, "启动睡眠计划调度器");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，睡眠计划调度器退出");
                    return;
                }
                _ = tokio::time::sleep(self.check_interval) => {
                    self.check_schedules().await;
                }
            }
        }
    }

    pub async fn fetch_schedule(&self, worker_id: Uuid) -> SchedulerResult<Option<SleepSchedule>> {
        self.schedule_repo.fetch_worker_sleep_schedule(worker_id).await
    }

    /// 保存Worker的新睡眠计划并立即应用
    pub async fn set_schedule(
        &self,
        worker_id: Uuid,
        mut schedule: SleepSchedule,
    ) -> SchedulerResult<()> {
        schedule.worker_id = worker_id;

        if let (Some(start), Some(end)) = (schedule.start_time, schedule.end_time) {
            if end.is_before(&start) {
                schedule.start_time = Some(end);
                schedule.end_time = Some(start);
            }
        }
        schedule.days_of_week = cleanup_days_of_week(&schedule.days_of_week);
        schedule.next_check = Some(calculate_next_check(&self.now(), &schedule));

        self.schedule_repo
            .set_worker_sleep_schedule(&schedule)
            .await
            .map_err(|e| {
                SchedulerError::DatabaseOperation(format!(
                    "保存Worker {worker_id} 的睡眠计划失败: {e}"
                ))
            })?;

        self.apply_sleep_schedule(&schedule).await
    }

    /// Worker此刻按计划应处的状态，没有计划时为 `awake`
    pub async fn worker_status(&self, worker_id: Uuid) -> SchedulerResult<WorkerStatus> {
        let schedule = self
            .schedule_repo
            .fetch_worker_sleep_schedule(worker_id)
            .await?;
        Ok(scheduled_worker_status(&self.now(), schedule.as_ref()))
    }

    /// 计划要求的状态与Worker当前（或已请求的）状态不一致时，请求Worker切换
    pub async fn apply_sleep_schedule(&self, schedule: &SleepSchedule) -> SchedulerResult<()> {
        let mut worker = self
            .worker_repo
            .get_worker(schedule.worker_id)
            .await?
            .ok_or(SchedulerError::WorkerNotFound {
                id: schedule.worker_id,
            })?;

        let scheduled = scheduled_worker_status(&self.now(), Some(schedule));
        let already_requested =
            worker.status_requested == Some(scheduled) && !worker.lazy_status_request;
        let already_there = worker.status == scheduled && worker.status_requested.is_none();
        if already_requested || already_there {
            trace!(worker = %worker.identifier(), status = %scheduled, "Worker已处于计划状态");
            return Ok(());
        }

        match worker.status_requested {
            Some(previous) => info!(
                worker = %worker.identifier(),
                current_status = %worker.status,
                scheduled_status = %scheduled,
                previous_request = %previous,
                "睡眠计划覆盖之前请求的状态"
            ),
            None => info!(
                worker = %worker.identifier(),
                current_status = %worker.status,
                scheduled_status = %scheduled,
                "睡眠计划请求Worker切换状态"
            ),
        }

        // 渲染任务可能持续数小时，计划切换不等待当前任务结束
        worker.status_change_request(scheduled, false);

        self.worker_repo
            .save_worker_status(&worker)
            .await
            .map_err(|e| {
                SchedulerError::DatabaseOperation(format!(
                    "保存Worker {} 状态失败: {e}",
                    worker.identifier()
                ))
            })?;

        self.broadcaster
            .broadcast_worker_update(WorkerUpdate::new(&worker));
        Ok(())
    }

    /// 检查所有到期的睡眠计划
    pub async fn check_schedules(&self) {
        let to_check = match self
            .schedule_repo
            .fetch_sleep_schedules_to_check(self.clock.now())
            .await
        {
            Ok(schedules) => schedules,
            Err(e) => {
                error!("获取待检查的睡眠计划失败: {}", e);
                return;
            }
        };

        if to_check.is_empty() {
            trace!("没有需要检查的睡眠计划");
            return;
        }

        debug!(num_workers = to_check.len(), "检查Worker睡眠计划");
        for mut schedule in to_check {
            self.check_schedule(&mut schedule).await;
        }
    }

    async fn check_schedule(&self, schedule: &mut SleepSchedule) {
        schedule.next_check = Some(calculate_next_check(&self.now(), schedule));

        if let Err(e) = self
            .schedule_repo
            .set_worker_sleep_schedule_next_check(schedule)
            .await
        {
            error!(worker_id = %schedule.worker_id, "更新睡眠计划下次检查时间失败: {}", e);
            return;
        }

        if let Err(e) = self.apply_sleep_schedule(schedule).await {
            error!(worker_id = %schedule.worker_id, "应用睡眠计划失败: {}", e);
        }
    }
}

/// 给定时间点Worker按计划应处的状态
pub fn scheduled_worker_status<Tz: TimeZone>(
    now: &DateTime<Tz>,
    schedule: Option<&SleepSchedule>,
) -> WorkerStatus {
    let Some(schedule) = schedule else {
        return WorkerStatus::Awake;
    };
    if !schedule.is_active {
        return WorkerStatus::Awake;
    }

    if !schedule.days_of_week.trim().is_empty() {
        let weekday = weekday_abbreviation(now);
        if !schedule
            .days_of_week
            .split_whitespace()
            .any(|day| day == weekday)
        {
            return WorkerStatus::Awake;
        }
    }

    let tod = TimeOfDay::from_time(now);
    let before_start = schedule.start_time.is_some_and(|start| tod.is_before(&start));
    let after_end = schedule.end_time.is_some_and(|end| !tod.is_before(&end));
    if before_start || after_end {
        return WorkerStatus::Awake;
    }

    WorkerStatus::Asleep
}

/// 规范化星期列表：小写、去除多余空白、只保留前两个字母
pub fn cleanup_days_of_week(days_of_week: &str) -> String {
    days_of_week
        .split_whitespace()
        .map(|day| day.to_lowercase().chars().take(2).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 下一次需要重新评估计划的时间：当天结束、开始时刻、结束时刻中最早的一个
///
/// 已经过去的时刻顺延到第二天。
pub fn calculate_next_check<Tz: TimeZone>(
    now: &DateTime<Tz>,
    schedule: &SleepSchedule,
) -> DateTime<Utc> {
    let next_occurrence = |tod: TimeOfDay| {
        let today = tod.on_date(now);
        if today >= *now {
            return today;
        }
        match now.clone().checked_add_days(Days::new(1)) {
            Some(tomorrow) => tod.on_date(&tomorrow),
            None => today,
        }
    };

    [
        Some(TimeOfDay::MIDNIGHT_END),
        schedule.start_time,
        schedule.end_time,
    ]
    .into_iter()
    .flatten()
    .map(next_occurrence)
    .map(|t| t.with_timezone(&Utc))
    .min()
    .unwrap_or_else(|| now.with_timezone(&Utc))
}

fn weekday_abbreviation<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    now.weekday().to_string().to_lowercase().chars().take(2).collect()
}
