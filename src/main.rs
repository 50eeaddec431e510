//! 应用程序入口 (Application Entrypoint)
//!
//! 负责 CLI 指令解析、遥测层初始化、依赖注入及系统生命周期管理。

use std::io;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::MakeWriter;

use chapter_spider::core::config::AppConfig;
use chapter_spider::core::event::create_event_channel;
use chapter_spider::core::job::{JobId, JobStatus, ScrapeJob};
use chapter_spider::engine::{Orchestrator, ScrapeRequest};
use chapter_spider::network::build_reader;
use chapter_spider::ui::{Ui, get_multi};

/// 进度条感知的日志写入器 (TUI-aware Log Writer)
///
/// 确保非同步日志输出不会破坏终端进度条的渲染布局。
struct IndicatifWriter;

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let _ = get_multi().println(s.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&self) -> Self::Writer {
        IndicatifWriter
    }
}

/// 命令行界面脚手架 (CLI Scaffolding)
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 抓取指定区间的章节
    Scrape {
        /// 目录页地址 (`<base>/s/index/<slug>` 或 `<base>/s/<slug>`)
        #[arg(short, long)]
        toc: String,
        /// 起始章节 (从 1 开始)
        #[arg(short, long, default_value_t = 1)]
        start: u32,
        /// 结束章节，缺省时自动推断
        #[arg(short, long)]
        end: Option<u32>,
        /// 以 JSON 输出最终任务状态
        #[arg(long)]
        json: bool,
    },
    /// 与本地产物比对，仅抓取缺失章节
    Update {
        #[arg(short, long)]
        toc: String,
        #[arg(long)]
        json: bool,
    },
    /// 仅推断章节总数
    Detect {
        #[arg(short, long)]
        toc: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 遥测层初始化 (Telemetry Layer Initialization)
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(IndicatifWriter)
        .with_target(false)
        .with_ansi(true)
        .init();

    // 依赖项初始化与注入 (Dependency Injection)
    let config = Arc::new(AppConfig::load()?);
    let cli = Cli::parse();
    let reader = build_reader(config.clone())?;

    match cli.command {
        Commands::Scrape {
            toc,
            start,
            end,
            json,
        } => {
            let (event_sender, event_receiver) = create_event_channel();
            let ui_handle = (!json).then(|| Ui::run(event_receiver));

            // 编排器在此作用域内释放，事件通道随之关闭
            let job = {
                let orchestrator = Orchestrator::builder()
                    .reader(reader)
                    .config(config.clone())
                    .maybe_events((!json).then_some(event_sender))
                    .build();

                let submission = orchestrator.submit(ScrapeRequest { toc, start, end })?;
                tracing::info!("{} (job {})", submission.message, submission.job_id);

                run_to_end(&orchestrator, &submission.job_id).await?
            };

            if let Some(handle) = ui_handle {
                let _ = handle.await;
            }
            report(&job, json)?;
        }
        Commands::Update { toc, json } => {
            let (event_sender, event_receiver) = create_event_channel();
            let ui_handle = (!json).then(|| Ui::run(event_receiver));

            let (outcome, job) = {
                let orchestrator = Orchestrator::builder()
                    .reader(reader)
                    .config(config.clone())
                    .maybe_events((!json).then_some(event_sender))
                    .build();

                let outcome = orchestrator.update(&toc).await?;
                let job = match &outcome.job_id {
                    Some(id) => Some(run_to_end(&orchestrator, id).await?),
                    None => {
                        orchestrator.shutdown().await;
                        None
                    }
                };
                (outcome, job)
            };

            if let Some(handle) = ui_handle {
                let _ = handle.await;
            }

            if json {
                let value = serde_json::json!({ "update": outcome, "job": job });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!(
                    "{} (remote {}, local {})",
                    outcome.message, outcome.total, outcome.local
                );
                if !outcome.missing.is_empty() {
                    println!("missing: {:?}", outcome.missing);
                }
                if let Some(job) = &job {
                    report(job, false)?;
                }
            }
        }
        Commands::Detect { toc } => {
            let orchestrator = Orchestrator::builder()
                .reader(reader)
                .config(config.clone())
                .build();
            let result = orchestrator.detect(&toc).await?;
            println!("{} chapters (strategy: {})", result.total, result.strategy);
        }
    }

    Ok(())
}

/// 等待任务结束；Ctrl-C 请求取消，随后仍等待会话释放
async fn run_to_end(orchestrator: &Orchestrator, job_id: &JobId) -> anyhow::Result<ScrapeJob> {
    // 信号处理与优雅退出 (Signal Handling)
    let signal_orchestrator = orchestrator.clone();
    let signal_job = job_id.clone();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，正在取消任务...");
            let _ = signal_orchestrator.cancel(&signal_job);
        }
    });

    let job = orchestrator.wait(job_id).await;
    signal.abort();
    orchestrator.shutdown().await;
    Ok(job?)
}

fn report(job: &ScrapeJob, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
    } else {
        println!(
            "{} [{}] {}/{} chapters, {} failed",
            job.novel_title.as_deref().unwrap_or(&job.toc_url),
            job.status,
            job.current,
            job.total,
            job.failed
        );
    }

    if job.status == JobStatus::Failed {
        anyhow::bail!(
            "job {} failed: {}",
            job.id,
            job.error.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}
