//! 任务编排 (Job Orchestrator)
//!
//! 受理抓取请求、登记任务并在后台任务中驱动会话：
//! 获取会话 -> (可选) 推断章节数 -> 抓取循环 -> 释放会话 -> 终态。
//! 无论成功、失败或取消，会话都会在后台任务结束前释放。

use std::any::Any;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::core::config::AppConfig;
use crate::core::error::{Result, SpiderError};
use crate::core::event::{EventSender, JobEvent};
use crate::core::job::{JobId, JobStatus, ScrapeJob};
use crate::core::model::{DiscoveryResult, NovelDir, TocTarget};
use crate::core::registry::JobRegistry;
use crate::engine::discovery::ChapterIndexResolver;
use crate::engine::fetch::{ChapterOutcome, FetchLoop, FetchSummary, ProgressSink};
use crate::interfaces::{PageReader, PageSession};

/// 更新结果中最多列出的缺失章节数
const MISSING_PREVIEW: usize = 20;

/// 抓取请求
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub toc: String,
    pub start: u32,
    /// 缺省时先推断章节总数
    pub end: Option<u32>,
}

/// 受理回执
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub message: String,
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub message: String,
    pub status: JobStatus,
}

/// 增量更新结果
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub message: String,
    pub total: u32,
    pub local: usize,
    /// 缺失章节 (至多前 20 个)
    pub missing: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// 补缺计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapPlan {
    UpToDate,
    /// 覆盖全部缺失章节的单一连续区间，区间内已存在的章节由抓取循环跳过
    Fetch {
        range: RangeInclusive<u32>,
        missing: Vec<u32>,
    },
}

/// 计算 `{1..=total} \ existing`
pub fn plan_gap_fill(existing: &BTreeSet<u32>, total: u32) -> GapPlan {
    let missing: Vec<u32> = (1..=total).filter(|i| !existing.contains(i)).collect();

    match (missing.first(), missing.last()) {
        (Some(&first), Some(&last)) => GapPlan::Fetch {
            range: first..=last,
            missing,
        },
        _ => GapPlan::UpToDate,
    }
}

/// 任务编排器
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    reader: Arc<dyn PageReader>,
    registry: JobRegistry,
    config: Arc<AppConfig>,
    events: Option<EventSender>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    admission: Option<Arc<Semaphore>>,
}

#[bon::bon]
impl Orchestrator {
    #[builder]
    pub fn new(
        reader: Arc<dyn PageReader>,
        config: Arc<AppConfig>,
        events: Option<EventSender>,
    ) -> Self {
        let admission = config
            .scraper
            .max_concurrent_jobs
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            inner: Arc::new(Inner {
                reader,
                registry: JobRegistry::new(),
                config,
                events,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                admission,
            }),
        }
    }

    /// 受理抓取请求
    ///
    /// 参数校验在登记任务之前完成，非法请求不会留下任务记录。
    pub fn submit(&self, request: ScrapeRequest) -> Result<Submission> {
        let target = TocTarget::parse(&request.toc)?;

        if request.start < 1 {
            return Err(SpiderError::Parse(format!(
                "start must be >= 1, got {}",
                request.start
            )));
        }
        if let Some(end) = request.end
            && end < request.start
        {
            return Err(SpiderError::Parse(format!(
                "end ({}) must be >= start ({})",
                end, request.start
            )));
        }

        let job_id = JobId::generate();
        let (status, message) = match request.end {
            Some(_) => (JobStatus::Pending, "Scraping started"),
            None => (JobStatus::Detecting, "Detecting chapters..."),
        };

        let mut job = ScrapeJob::new(job_id.clone(), request.toc.trim(), status);
        let total = request.end.map(|end| end - request.start + 1);
        if let (Some(end), Some(total)) = (request.end, total) {
            job.start = Some(request.start);
            job.end = Some(end);
            job.total = total;
            job.novel_title = Some(target.display_title());
        }

        let cancel = self.inner.shutdown.child_token();
        self.inner.registry.create(job, cancel.clone())?;

        info!("任务已登记: {} ({})", job_id, target.index_url());
        self.inner.emit(JobEvent::JobSubmitted {
            job_id: job_id.clone(),
            toc_url: target.index_url(),
        });

        let inner = self.inner.clone();
        let id = job_id.clone();
        let start = request.start;
        let end = request.end;
        self.inner
            .tracker
            .spawn(async move { inner.run_job(id, target, start, end, cancel).await });

        Ok(Submission {
            job_id,
            message: message.to_string(),
            total,
        })
    }

    pub fn status(&self, id: &JobId) -> Result<ScrapeJob> {
        self.inner.registry.get(id)
    }

    /// 请求取消，对终态任务幂等
    pub fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        let status = self.inner.registry.request_cancel(id)?;
        let message = if status == JobStatus::Cancelling {
            self.inner.emit(JobEvent::StatusChanged {
                job_id: id.clone(),
                status,
            });
            "Cancellation requested".to_string()
        } else {
            format!("Job already {}", status)
        };
        Ok(CancelOutcome { message, status })
    }

    /// 删除任务记录
    pub fn remove(&self, id: &JobId) -> Result<ScrapeJob> {
        self.inner.registry.remove(id)
    }

    pub fn list(&self) -> Vec<ScrapeJob> {
        self.inner.registry.list()
    }

    /// 等待任务进入终态
    pub async fn wait(&self, id: &JobId) -> Result<ScrapeJob> {
        self.inner.registry.wait_terminal(id).await
    }

    /// 仅推断章节总数
    pub async fn detect(&self, toc: &str) -> Result<DiscoveryResult> {
        let target = TocTarget::parse(toc)?;
        let (result, _) = self.inner.discover_once(&target).await?;
        Ok(result)
    }

    /// 增量更新：推断总数，与本地产物比对后仅为缺失区间提交任务
    pub async fn update(&self, toc: &str) -> Result<UpdateOutcome> {
        let target = TocTarget::parse(toc)?;
        let (found, title) = self.inner.discover_once(&target).await?;

        let dir = NovelDir::new(self.inner.config.output_root(), &target);
        let existing = dir.scan_existing().await?;
        debug!("本地已有 {} 章，远端共 {} 章", existing.len(), found.total);

        let (range, missing) = match plan_gap_fill(&existing, found.total) {
            GapPlan::UpToDate => {
                info!("已是最新: {}", target.slug());
                return Ok(UpdateOutcome {
                    message: "Novel is up to date".to_string(),
                    total: found.total,
                    local: existing.len(),
                    missing: Vec::new(),
                    job_id: None,
                });
            }
            GapPlan::Fetch { range, missing } => (range, missing),
        };

        let submission = self.submit(ScrapeRequest {
            toc: toc.to_string(),
            start: *range.start(),
            end: Some(*range.end()),
        })?;

        if let Some(title) = title {
            let _ = self.inner.registry.update(&submission.job_id, |job| {
                job.novel_title = Some(title);
                true
            });
        }

        Ok(UpdateOutcome {
            message: format!("Started scraping {} missing chapters", missing.len()),
            total: found.total,
            local: existing.len(),
            missing: missing.into_iter().take(MISSING_PREVIEW).collect(),
            job_id: Some(submission.job_id),
        })
    }

    /// 取消全部任务并等待所有后台任务退出 (会话均已释放)
    pub async fn shutdown(&self) {
        info!("正在关闭，等待 {} 个任务释放会话...", self.inner.registry.len());
        self.inner.registry.cancel_all();
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Inner {
    fn emit(&self, event: JobEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// 打开临时会话执行推断，完成后立即释放
    async fn discover_once(
        &self,
        target: &TocTarget,
    ) -> Result<(DiscoveryResult, Option<String>)> {
        let mut session = self.reader.open().await?;
        let result = ChapterIndexResolver::new(&self.config.site)
            .discover(session.as_mut(), target, &self.config.browser)
            .await;

        if let Err(e) = session.close().await {
            warn!("释放会话失败: {}", e);
        }
        result
    }

    async fn run_job(
        self: Arc<Self>,
        id: JobId,
        target: TocTarget,
        start: u32,
        end: Option<u32>,
        cancel: CancellationToken,
    ) {
        // 排队等待准入，期间可被取消
        let _permit = match &self.admission {
            Some(semaphore) => tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => {
                    self.finalize(&id, &cancel, Ok(FetchSummary::default()));
                    return;
                }
            },
            None => None,
        };

        let mut session = match self.reader.open().await {
            Ok(session) => session,
            Err(e) => {
                self.finalize(&id, &cancel, Err(e));
                return;
            }
        };
        debug!("任务 {} 已获取 {} 会话", id, self.reader.name());

        // 驱动过程中的 panic 转为任务失败，会话照常释放
        let driving = self.drive(session.as_mut(), &id, &target, start, end, &cancel);
        let outcome = AssertUnwindSafe(driving)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(SpiderError::Internal(panic_message(panic.as_ref())))
            });

        if let Err(e) = session.close().await {
            warn!("释放会话失败 ({}): {}", id, e);
        }

        self.finalize(&id, &cancel, outcome);
    }

    async fn drive(
        &self,
        session: &mut dyn PageSession,
        id: &JobId,
        target: &TocTarget,
        start: u32,
        end: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<FetchSummary> {
        let end = match end {
            Some(end) => end,
            None => {
                let (found, title) = ChapterIndexResolver::new(&self.config.site)
                    .discover(session, target, &self.config.browser)
                    .await?;

                let title = title.unwrap_or_else(|| target.display_title());
                self.registry.update(id, |job| {
                    job.novel_title = Some(title.clone());
                    true
                })?;
                self.emit(JobEvent::TitleResolved {
                    job_id: id.clone(),
                    title,
                });
                found.total
            }
        };

        if cancel.is_cancelled() {
            return Ok(FetchSummary {
                cancelled: true,
                ..Default::default()
            });
        }

        // 推断出的总数小于起点时区间为空，任务以 0/0 完成
        let total = end.checked_sub(start).map_or(0, |span| span.saturating_add(1));
        self.registry.update(id, |job| {
            job.start = Some(start);
            job.end = Some(end);
            job.total = total;
            true
        })?;
        if self.registry.transition(id, JobStatus::Running)? {
            self.emit(JobEvent::StatusChanged {
                job_id: id.clone(),
                status: JobStatus::Running,
            });
        }
        self.emit(JobEvent::RangeResolved {
            job_id: id.clone(),
            start,
            end,
            total,
        });

        if total == 0 {
            info!("任务 {} 无需抓取 (起点 {} 超过总数 {})", id, start, end);
            return Ok(FetchSummary::default());
        }

        let dir = NovelDir::new(self.config.output_root(), target);
        let progress = JobProgress {
            registry: &self.registry,
            events: self.events.as_ref(),
            job_id: id,
            total,
        };

        FetchLoop::new(&self.config, cancel.clone())
            .run(session, target, start..=end, &dir, &progress)
            .await
    }

    /// 写入终态
    ///
    /// 已请求取消的任务总是以 `cancelled` 结束，与循环结果无关。
    fn finalize(&self, id: &JobId, cancel: &CancellationToken, outcome: Result<FetchSummary>) {
        let summary = outcome.as_ref().copied().unwrap_or_default();

        let (status, error) = if cancel.is_cancelled() {
            (JobStatus::Cancelled, None)
        } else {
            match &outcome {
                Ok(_) => (JobStatus::Completed, None),
                Err(e) => (JobStatus::Failed, Some(e.to_string())),
            }
        };

        let updated = self.registry.update(id, |job| match status {
            JobStatus::Cancelled => {
                if job.error.is_none() {
                    job.error = Some("Cancelled".to_string());
                }
                job.transition(JobStatus::Cancelled)
            }
            JobStatus::Completed => job.complete(),
            _ => job.fail(error.clone().unwrap_or_default()),
        });

        match (&updated, status) {
            (Err(_), _) => debug!("任务 {} 已被移除，跳过终态写入", id),
            (Ok(_), JobStatus::Completed) => info!(
                "任务完成: {} (成功 {} | 失败 {})",
                id, summary.succeeded, summary.failed
            ),
            (Ok(_), JobStatus::Failed) => {
                error!("任务失败: {} ({})", id, error.as_deref().unwrap_or_default())
            }
            (Ok(_), _) => info!("任务已取消: {}", id),
        }

        self.emit(JobEvent::JobFinished {
            job_id: id.clone(),
            status,
            succeeded: summary.succeeded,
            failed: summary.failed,
            error,
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "background task panicked".to_string())
}

/// 将抓取进度写回注册表并转发给 UI
struct JobProgress<'a> {
    registry: &'a JobRegistry,
    events: Option<&'a EventSender>,
    job_id: &'a JobId,
    total: u32,
}

impl ProgressSink for JobProgress<'_> {
    fn report(&self, index: u32, processed: u32, outcome: &ChapterOutcome) {
        let failed = matches!(outcome, ChapterOutcome::Failed { .. });

        let _ = self.registry.update(self.job_id, |job| {
            let advanced = job.advance(processed);
            if failed {
                job.failed += 1;
            }
            advanced || failed
        });

        let Some(events) = self.events else {
            return;
        };
        if let ChapterOutcome::Failed { error } = outcome {
            events.emit(JobEvent::ChapterFailed {
                job_id: self.job_id.clone(),
                index,
                error: error.clone(),
            });
        }
        events.emit(JobEvent::ChapterProgress {
            job_id: self.job_id.clone(),
            index,
            current: processed,
            total: self.total,
        });
    }
}
