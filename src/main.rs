//! Hive - 多智能体监督系统
//!
//! 入口：初始化日志、加载配置、组装 Supervisor，运行一次任务。
//! 事件以 JSON 行写到 stdout，最后输出 RunOutcome；失败时退出码为 1。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hive::agents::MockAgentExecutor;
use hive::config::load_config;
use hive::core::{create_llm_from_config, SupervisorBuilder};
use hive::oracle::MockOracle;
use hive::pipeline::{RunEvent, Task};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "hive", version, about = "Coordinate specialist LLM agents on a task")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 不访问任何 LLM 后端，使用 Mock 协作方
    #[arg(long)]
    offline: bool,

    /// 任务文本
    #[arg(required = true)]
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let (tx, mut rx) = mpsc::unbounded_channel::<RunEvent>();

    let builder = SupervisorBuilder::from_config(&cfg).with_event_sender(tx);
    let llm = if cli.offline {
        None
    } else {
        create_llm_from_config(&cfg)
    };
    let builder = match llm {
        Some(llm) => builder.with_llm(llm),
        None => {
            tracing::info!("Running with mock collaborators");
            builder
                .with_oracle(Arc::new(MockOracle::new()))
                .with_executor(Arc::new(MockAgentExecutor::new()))
        }
    };
    let supervisor = builder.build().context("Failed to build supervisor")?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        }
    });

    // Ctrl+C 取消会话令牌，当前运行以 Cancelled 结束
    let session = supervisor.session().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            session.cancel();
        }
    });

    let outcome = supervisor.run(Task::new(cli.task.join(" "))).await;
    drop(supervisor);
    printer.await.context("Event printer failed")?;

    let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
    println!("{json}");
    if outcome.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}
