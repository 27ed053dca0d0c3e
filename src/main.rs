//! COMSOL Agent 终端对话
//!
//! 入口：加载配置、初始化日志、创建 Agent 运行时，并在终端中逐行读取用户输入。
//! 命令：quit / exit、/snapshot、/resync、/cancel、/clear；待确认时输入 y 或 n。

use std::io::Write;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use comsol_agent::core::{create_agent, create_agent_builder, AgentError, AgentHandle};
use comsol_agent::observability;
use comsol_agent::turn::{TurnEvent, TurnReport};

type InFlight = Option<JoinHandle<Result<TurnReport, AgentError>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let builder = create_agent_builder(std::env::args().nth(1).map(Into::into));
    observability::init(&builder.config().app.log_level);

    let agent = create_agent(builder)
        .await
        .context("Failed to create agent")?;
    let mut events = agent.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: InFlight = None;

    println!("COMSOL Agent ready. Type a request, /snapshot, /resync, /cancel, /clear or quit.");
    prompt();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                if !handle_line(&agent, line.trim(), &mut in_flight).await? {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => tracing::debug!("skipped {} progress events", n),
                Err(RecvError::Closed) => break,
            },
            joined = wait_turn(&mut in_flight) => {
                in_flight = None;
                match joined.context("Turn task panicked")? {
                    Ok(report) => println!("\n{}\n", report.reply),
                    Err(e) => eprintln!("\nError: {e}\n"),
                }
                prompt();
            }
        }
    }

    let _ = agent.quit();
    Ok(())
}

/// 等待进行中的一轮；没有时永远挂起
async fn wait_turn(
    in_flight: &mut InFlight,
) -> Result<Result<TurnReport, AgentError>, tokio::task::JoinError> {
    match in_flight.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// 句柄错误：配置类致命错误退出，其余（如运行时已停止）打印后继续
fn report(err: AgentError) -> anyhow::Result<()> {
    if err.is_fatal() {
        return Err(err.into());
    }
    eprintln!("Error: {err}");
    Ok(())
}

/// 处理一行输入；返回 false 表示退出
async fn handle_line(agent: &AgentHandle, line: &str, in_flight: &mut InFlight) -> anyhow::Result<bool> {
    // 确认提示期间也可取消整轮
    if line == "/cancel" {
        if in_flight.is_some() {
            agent.cancel();
            println!("Cancelling after the current action...");
        } else {
            println!("Nothing to cancel.");
        }
        return Ok(true);
    }

    if let Some(request) = agent.pending_confirmation() {
        let approve = matches!(line.to_lowercase().as_str(), "y" | "yes");
        match agent.confirm(approve) {
            Ok(()) if !approve => println!("Declined {}.", request.label),
            Ok(()) => {}
            Err(e) => report(e)?,
        }
        return Ok(true);
    }

    match line {
        "" => {}
        "quit" | "exit" => return Ok(false),
        _ if in_flight.is_some() => {
            println!("A request is still running; wait for it or type /cancel.");
        }
        "/snapshot" => {
            let view = match agent.snapshot().await {
                Ok(view) => view,
                Err(e) => {
                    report(e)?;
                    return Ok(true);
                }
            };
            println!("Revision {}\n{}", view.revision, view.snapshot.summary());
            let (prompt_tokens, completion_tokens, total) = view.token_usage;
            if total > 0 {
                println!("Tokens used: {prompt_tokens} prompt + {completion_tokens} completion = {total}");
            }
            prompt();
        }
        "/resync" => {
            match agent.resync().await {
                Ok(corrections) if corrections.is_empty() => {
                    println!("Snapshot already matches the live model.")
                }
                Ok(corrections) => {
                    println!("Re-synchronised with the live model:");
                    for c in corrections {
                        println!("  - {c}");
                    }
                }
                Err(e) => eprintln!("Resync failed: {e}"),
            }
            prompt();
        }
        "/clear" => {
            match agent.clear() {
                Ok(()) => println!("Conversation history cleared."),
                Err(e) => report(e)?,
            }
            prompt();
        }
        text => {
            let agent = agent.clone();
            let text = text.to_string();
            *in_flight = Some(tokio::spawn(async move { agent.submit(text).await }));
        }
    }
    Ok(true)
}

fn print_event(event: &TurnEvent) {
    match event {
        TurnEvent::Proposal { actions, .. } if !actions.is_empty() => {
            println!("Plan: {}", actions.join(", "));
        }
        TurnEvent::ValidationFailed { action, reason, revising } => {
            let next = if *revising { " (asking for a revised plan)" } else { "" };
            println!("  ! {action}: {reason}{next}");
        }
        TurnEvent::ConfirmationRequired { request } => {
            print!("{} ", request.prompt());
            let _ = std::io::stdout().flush();
        }
        TurnEvent::ActionStarted { label } => println!("  > {label}"),
        TurnEvent::ActionFinished { label, status, detail, .. } => match detail {
            Some(detail) => println!("  [{status}] {label}: {detail}"),
            None => println!("  [{status}] {label}"),
        },
        TurnEvent::ActionSkipped { label, reason } => println!("  [skipped] {label}: {reason}"),
        TurnEvent::Error { text } => tracing::debug!("turn error: {}", text),
        _ => {}
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
