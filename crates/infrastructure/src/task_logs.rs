//! 任务日志文件存储
//!
//! 目录布局：`<root>/job-<作业ID前4位>/<作业ID>/task-<任务ID>.txt`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use farm_core::{
    traits::{Clock, TaskLogSink},
    SchedulerResult,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct TaskLogStorage {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    // 同一文件的追加与轮转不能交错
    write_lock: Mutex<()>,
}

impl TaskLogStorage {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        info!("任务日志目录: {}", root.display());

        Self {
            root,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_log_path(&self, job_id: Uuid, task_id: Uuid) -> PathBuf {
        let job = job_id.to_string();
        self.root
            .join(format!("job-{}", &job[..4]))
            .join(&job)
            .join(format!("task-{task_id}.txt"))
    }

    /// 追加原始文本，缺少结尾换行时自动补上；空文本不创建文件
    pub async fn write(&self, job_id: Uuid, task_id: Uuid, text: &str) -> SchedulerResult<()> {
        if text.is_empty() {
            return Ok(());
        }

        let path = self.task_log_path(job_id, task_id);
        let _guard = self.write_lock.lock().await;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                error!("创建任务日志目录失败 {}: {}", dir.display(), e);
                e
            })?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                error!("打开任务日志失败 {}: {}", path.display(), e);
                e
            })?;

        let mut content = text.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// 轮转任务日志：`task.txt` 改名为 `task.txt.1`，已有的编号依次加一
    ///
    /// 日志文件不存在时什么都不做。
    pub async fn rotate(&self, job_id: Uuid, task_id: Uuid) -> SchedulerResult<()> {
        let path = self.task_log_path(job_id, task_id);
        let _guard = self.write_lock.lock().await;

        if fs::metadata(&path).await.is_err() {
            debug!("任务日志不存在，无需轮转: {}", path.display());
            return Ok(());
        }

        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Ok(());
        };
        let prefix = format!("{}.", file_name.to_string_lossy());

        let mut numbered = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(number) = name
                .strip_prefix(&prefix)
                .and_then(|suffix| suffix.parse::<u32>().ok())
            {
                numbered.push(number);
            }
        }
        numbered.sort_unstable_by(|a, b| b.cmp(a));

        let numbered_path = |n: u32| dir.join(format!("{prefix}{n}"));
        for number in numbered {
            if let Err(e) = fs::rename(numbered_path(number), numbered_path(number + 1)).await {
                warn!("轮转任务日志 {}.{} 失败: {}", path.display(), number, e);
            }
        }
        fs::rename(&path, numbered_path(1)).await?;

        debug!("任务日志已轮转: {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl TaskLogSink for TaskLogStorage {
    async fn write_timestamped(
        &self,
        job_id: Uuid,
        task_id: Uuid,
        text: &str,
    ) -> SchedulerResult<()> {
        let now = self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.write(job_id, task_id, &format!("{now} {text}")).await
    }
}
