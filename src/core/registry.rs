//! 任务注册表 (Job Registry)
//!
//! 核心中唯一的共享可变状态。外层 `RwLock` 只保护映射本身，
//! 每个条目内部由 `watch` 通道串行化修改，并向轮询方广播变更。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{Result, SpiderError};
use crate::core::job::{JobId, JobStatus, ScrapeJob};

/// 单个任务条目
struct JobSlot {
    state: watch::Sender<ScrapeJob>,
    cancel: CancellationToken,
}

/// 并发任务表
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &JobId) -> Result<Arc<JobSlot>> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SpiderError::JobNotFound(id.clone()))
    }

    /// 登记新任务，ID 已存在时拒绝
    pub fn create(&self, job: ScrapeJob, cancel: CancellationToken) -> Result<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(SpiderError::RegistryConflict(job.id));
        }

        let id = job.id.clone();
        let (state, _) = watch::channel(job);
        jobs.insert(id, Arc::new(JobSlot { state, cancel }));
        Ok(())
    }

    /// 获取任务快照
    pub fn get(&self, id: &JobId) -> Result<ScrapeJob> {
        Ok(self.slot(id)?.state.borrow().clone())
    }

    /// 原地修改任务，闭包返回 true 时通知订阅方
    pub fn update<F>(&self, id: &JobId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut ScrapeJob) -> bool,
    {
        let slot = self.slot(id)?;
        Ok(slot.state.send_if_modified(f))
    }

    /// 状态迁移，非法迁移被忽略并返回 false
    pub fn transition(&self, id: &JobId, next: JobStatus) -> Result<bool> {
        self.update(id, |job| job.transition(next))
    }

    /// 推进进度 (单调)
    pub fn advance(&self, id: &JobId, current: u32) -> Result<bool> {
        self.update(id, |job| job.advance(current))
    }

    /// 请求取消
    ///
    /// 对终态任务是幂等的，直接返回既有状态。
    pub fn request_cancel(&self, id: &JobId) -> Result<JobStatus> {
        let slot = self.slot(id)?;
        let mut status = JobStatus::Cancelling;

        slot.state.send_if_modified(|job| {
            if job.is_terminal() || job.status == JobStatus::Cancelling {
                status = job.status;
                return false;
            }
            job.transition(JobStatus::Cancelling);
            job.error = Some("Cancelled by user".to_string());
            true
        });

        if status == JobStatus::Cancelling {
            slot.cancel.cancel();
        }
        Ok(status)
    }

    /// 订阅任务变更
    pub fn subscribe(&self, id: &JobId) -> Result<watch::Receiver<ScrapeJob>> {
        Ok(self.slot(id)?.state.subscribe())
    }

    /// 等待任务进入终态
    pub async fn wait_terminal(&self, id: &JobId) -> Result<ScrapeJob> {
        let mut rx = self.subscribe(id)?;
        let job = rx
            .wait_for(|job| job.is_terminal())
            .await
            .map(|job| job.clone());

        match job {
            Ok(job) => Ok(job),
            // 条目已被移除
            Err(_) => Err(SpiderError::JobNotFound(id.clone())),
        }
    }

    /// 删除任务记录，非终态任务同时触发取消
    pub fn remove(&self, id: &JobId) -> Result<ScrapeJob> {
        let slot = self
            .jobs
            .write()
            .remove(id)
            .ok_or_else(|| SpiderError::JobNotFound(id.clone()))?;

        let job = slot.state.borrow().clone();
        if !job.is_terminal() {
            debug!("移除运行中的任务，触发取消: {}", id);
            slot.cancel.cancel();
        }
        Ok(job)
    }

    /// 所有任务快照
    pub fn list(&self) -> Vec<ScrapeJob> {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().values().cloned().collect();
        let mut jobs: Vec<ScrapeJob> = slots.iter().map(|s| s.state.borrow().clone()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// 取消所有未结束的任务
    pub fn cancel_all(&self) {
        let ids: Vec<JobId> = self.jobs.read().keys().cloned().collect();
        for id in ids {
            let _ = self.request_cancel(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}
