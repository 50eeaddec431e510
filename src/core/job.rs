//! 任务状态机 (Job Lifecycle)
//!
//! `pending/detecting -> running -> {completed | failed | cancelled}`，
//! 任意非终态均可进入 `cancelling`，其后只能到达 `cancelled`。

use serde::Serialize;
use strum::{Display, EnumString};
use uuid::Uuid;

/// 任务唯一标识 (不透明令牌)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// 生成随机 ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Detecting,
    Running,
    /// 已请求取消，等待抓取循环在下一个章节边界处响应
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (Cancelling, Cancelled) => true,
            (Cancelling, _) => false,
            (_, Cancelling | Cancelled | Failed) => true,
            (Pending, Detecting | Running) => true,
            (Detecting, Running) => true,
            (Running, Completed) => true,
            _ => false,
        }
    }
}

/// 抓取任务
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeJob {
    pub id: JobId,
    pub status: JobStatus,
    /// 已处理章节数 (含跳过与失败)
    pub current: u32,
    /// 预期处理章节数
    pub total: u32,
    /// 失败章节数
    pub failed: u32,
    pub novel_title: Option<String>,
    pub error: Option<String>,
    pub toc_url: String,
    /// 已确定的抓取区间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

impl ScrapeJob {
    pub fn new(id: JobId, toc_url: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id,
            status,
            current: 0,
            total: 0,
            failed: 0,
            novel_title: None,
            error: None,
            toc_url: toc_url.into(),
            start: None,
            end: None,
        }
    }

    /// 执行状态迁移，非法迁移返回 false 且不修改状态
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// 推进进度，计数只增不减
    pub fn advance(&mut self, current: u32) -> bool {
        if current <= self.current {
            return false;
        }
        self.current = current;
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        let message = message.into();
        self.error = Some(if message.is_empty() {
            "Unknown error".to_string()
        } else {
            message
        });
        true
    }

    pub fn complete(&mut self) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.error = None;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn job(status: JobStatus) -> ScrapeJob {
        ScrapeJob::new(JobId::from("job-1"), "https://a.test/s/index/x", status)
    }

    #[test]
    fn forward_transitions_are_accepted() {
        let mut j = job(JobStatus::Detecting);
        assert!(j.transition(JobStatus::Running));
        assert!(j.complete());
        assert_eq!(j.status, JobStatus::Completed);
        assert!(j.error.is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            let mut j = job(terminal);
            assert!(!j.transition(JobStatus::Running));
            assert!(!j.transition(JobStatus::Cancelling));
            assert!(!j.fail("late"));
            assert_eq!(j.status, terminal);
        }
    }

    #[test]
    fn running_cannot_move_back() {
        let mut j = job(JobStatus::Running);
        assert!(!j.transition(JobStatus::Detecting));
        assert!(!j.transition(JobStatus::Pending));
    }

    #[test]
    fn cancelling_only_leads_to_cancelled() {
        let mut j = job(JobStatus::Running);
        assert!(j.transition(JobStatus::Cancelling));
        assert!(!j.transition(JobStatus::Running));
        assert!(!j.complete());
        assert!(j.transition(JobStatus::Cancelled));
    }

    #[test]
    fn failure_always_carries_a_message() {
        let mut j = job(JobStatus::Running);
        assert!(j.fail(""));
        assert_eq!(j.error.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn progress_never_decreases() {
        let mut j = job(JobStatus::Running);
        assert!(j.advance(3));
        assert!(!j.advance(2));
        assert!(!j.advance(3));
        assert_eq!(j.current, 3);
    }

    #[test]
    fn status_round_trips_through_its_name() {
        assert_eq!(JobStatus::Cancelling.to_string(), "cancelling");
        assert_eq!(JobStatus::from_str("detecting").unwrap(), JobStatus::Detecting);
        let json = serde_json::to_string(&job(JobStatus::Pending)).unwrap();
        assert!(json.contains(r#""status":"pending""#));
        assert!(json.contains(r#""id":"job-1""#));
    }
}
