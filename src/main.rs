//! sage - 工具增强的财报问答智能体
//!
//! 用法：
//!   sage [--config PATH] [--session PATH] [--markdown] [问题...]
//! 给出问题则回答一次后退出；否则进入交互模式（逐行读取 stdin，空行或 exit 退出）。
//! Ctrl-C 取消当前这一轮；在提示符处按 Ctrl-C 退出。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sage::agent::Agent;
use sage::config::load_config;
use sage::memory::{ConversationPersistence, ConversationState};
use sage::react::RunContext;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "sage")]
#[command(about = "Tool-augmented question answering over financial reports", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to config/default.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session file to restore and save the conversation
    #[arg(long)]
    session: Option<PathBuf>,

    /// Print the answer with a markdown sources section
    #[arg(long)]
    markdown: bool,

    /// Question to answer; omit for interactive mode
    #[arg(trailing_var_arg = true)]
    question: Vec<String>,
}

struct Session {
    agent: Agent,
    state: ConversationState,
    persistence: Option<ConversationPersistence>,
    markdown: bool,
}

impl Session {
    async fn ask(&mut self, question: &str) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let ctx = RunContext::new().with_cancel_token(cancel.clone());
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let reply = self.agent.ask_with(&mut self.state, question, &ctx).await;
        watcher.abort();
        let reply = reply.context("agent run failed")?;

        tracing::info!(
            iterations = reply.result.iteration_count,
            terminated_by = ?reply.result.terminated_by,
            "run finished"
        );
        if self.markdown {
            println!("{}", reply.answer.to_markdown());
        } else {
            println!("{}", reply.answer.to_plain());
        }

        if let Some(p) = &self.persistence {
            p.save(&self.state)?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sage::observability::init();

    let args = Cli::parse();
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    let agent = Agent::from_config(&cfg).context("Failed to create agent")?;

    let persistence = args
        .session
        .or_else(|| cfg.session.path.clone())
        .map(ConversationPersistence::new);
    let state = match &persistence {
        Some(p) => match p.load()? {
            Some(state) => {
                tracing::info!(path = %p.path().display(), turns = state.len(), "session restored");
                state
            }
            None => agent.new_conversation(),
        },
        None => agent.new_conversation(),
    };

    let mut session = Session {
        agent,
        state,
        persistence,
        markdown: args.markdown,
    };

    if !args.question.is_empty() {
        return session.ask(&args.question.join(" ")).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Ask a question (empty line or 'exit' to quit):");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() || line == "exit" || line == "quit" {
            break;
        }
        if let Err(e) = session.ask(line).await {
            tracing::error!(error = %e, "question failed");
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}
