//! 终端进度渲染引擎 (Terminal UI Progress Engine)
//!
//! 基于 `indicatif` 实现非阻塞式进度条编排，每个任务一条状态行与一条章节进度条。

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::core::event::{EventReceiver, JobEvent};
use crate::core::job::{JobId, JobStatus};

/// 全局 TUI 容器 (Singleton)
static MULTI: OnceLock<MultiProgress> = OnceLock::new();

/// 获取全局进度容器实例
pub fn get_multi() -> &'static MultiProgress {
    MULTI.get_or_init(MultiProgress::new)
}

/// 单个任务的进度条
struct JobBars {
    main_bar: ProgressBar,
    chapter_bar: Option<ProgressBar>,
}

/// 进度协调器 (Progress Orchestrator)
#[derive(Default)]
pub struct Ui {
    jobs: HashMap<JobId, JobBars>,
}

impl Ui {
    /// 激活事件监听循环，发送端全部关闭后退出
    pub fn run(receiver: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ui = Ui::default();
            while let Some(event) = receiver.recv_async().await {
                ui.handle_event(event);
            }
        })
    }

    fn handle_event(&mut self, event: JobEvent) {
        let multi = get_multi();

        match event {
            JobEvent::JobSubmitted { job_id, toc_url } => {
                let bar = multi.add(ProgressBar::new_spinner());
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                {
                    bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
                }
                bar.set_message(format!("🔍 {}", truncate_string(&toc_url, 60)));
                bar.enable_steady_tick(Duration::from_millis(100));
                self.jobs.insert(
                    job_id,
                    JobBars {
                        main_bar: bar,
                        chapter_bar: None,
                    },
                );
            }
            JobEvent::TitleResolved { job_id, title } => {
                if let Some(bars) = self.jobs.get(&job_id) {
                    bars.main_bar.set_message(format!("📚 {}", title));
                }
            }
            JobEvent::RangeResolved {
                job_id,
                start,
                end,
                total,
            } => {
                if let Some(bars) = self.jobs.get_mut(&job_id) {
                    let bar = multi.add(ProgressBar::new(total as u64));
                    if let Ok(style) = ProgressStyle::default_bar().template(
                        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
                    ) {
                        bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
                    }
                    bar.set_message(format!("#{}..#{}", start, end));
                    bars.chapter_bar = Some(bar);
                }
            }
            JobEvent::StatusChanged { job_id, status } => {
                if let Some(bars) = self.jobs.get(&job_id)
                    && status == JobStatus::Cancelling
                {
                    bars.main_bar.set_message("⏹ CANCELLING: finishing current chapter...");
                }
            }
            JobEvent::ChapterProgress {
                job_id,
                index,
                current,
                ..
            } => {
                if let Some(JobBars {
                    chapter_bar: Some(bar),
                    ..
                }) = self.jobs.get(&job_id)
                {
                    bar.set_position(current as u64);
                    bar.set_message(format!("Chapter {}", index));
                }
            }
            JobEvent::ChapterFailed {
                job_id,
                index,
                error,
            } => {
                if let Some(bars) = self.jobs.get(&job_id) {
                    bars.main_bar.set_message(format!(
                        "⚠️ Chapter {}: {}",
                        index,
                        truncate_string(&error, 50)
                    ));
                }
            }
            JobEvent::JobFinished {
                job_id,
                status,
                succeeded,
                failed,
                error,
            } => {
                let Some(bars) = self.jobs.remove(&job_id) else {
                    return;
                };
                match status {
                    JobStatus::Completed => {
                        if let Some(bar) = &bars.chapter_bar {
                            bar.finish_with_message("✅ DOWNLOADED");
                        }
                        bars.main_bar.finish_with_message(format!(
                            "✅ TASK FINISHED ({} ok, {} failed)",
                            succeeded, failed
                        ));
                    }
                    JobStatus::Cancelled => {
                        if let Some(bar) = &bars.chapter_bar {
                            bar.abandon();
                        }
                        bars.main_bar.abandon_with_message("⏹ CANCELLED");
                    }
                    _ => {
                        if let Some(bar) = &bars.chapter_bar {
                            bar.abandon();
                        }
                        bars.main_bar.abandon_with_message(format!(
                            "❌ FAILED: {}",
                            error.unwrap_or_default()
                        ));
                    }
                }
            }
        }
    }
}

/// 执行语义化字符串截断
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
