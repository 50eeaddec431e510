//! 事件系统定义
//!
//! 用于 Engine 与 UI 之间的完全解耦通信

use flume::{Receiver, Sender};

use crate::core::job::{JobId, JobStatus};

/// 任务事件类型
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// 任务已登记
    JobSubmitted { job_id: JobId, toc_url: String },

    /// 书名已确定
    TitleResolved { job_id: JobId, title: String },

    /// 抓取区间已确定
    RangeResolved {
        job_id: JobId,
        start: u32,
        end: u32,
        total: u32,
    },

    /// 状态变更
    StatusChanged { job_id: JobId, status: JobStatus },

    /// 章节处理进度
    ChapterProgress {
        job_id: JobId,
        index: u32,
        current: u32,
        total: u32,
    },

    /// 章节失败 (已写入旁路错误记录)
    ChapterFailed {
        job_id: JobId,
        index: u32,
        error: String,
    },

    /// 任务结束
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        succeeded: u32,
        failed: u32,
        error: Option<String>,
    },
}

/// 事件发送器
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<JobEvent>,
}

impl EventSender {
    pub fn new(tx: Sender<JobEvent>) -> Self {
        Self { tx }
    }

    /// 发送事件
    pub fn emit(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }
}

/// 事件接收器
pub struct EventReceiver {
    rx: Receiver<JobEvent>,
}

impl EventReceiver {
    pub fn new(rx: Receiver<JobEvent>) -> Self {
        Self { rx }
    }

    /// 异步接收事件
    pub async fn recv_async(&self) -> Option<JobEvent> {
        self.rx.recv_async().await.ok()
    }
}

/// 创建事件通道
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender::new(tx), EventReceiver::new(rx))
}
