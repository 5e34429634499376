//! Ghost 命令行入口
//!
//! 初始化日志、加载配置组装 RuntimeContext，然后执行子命令；不带子命令时进入对话。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use ghost::core::{ChatSession, ReplySource, RuntimeContext, TurnOutcome};
use ghost::environment::InstallStep;
use ghost::secrets::ApiKeyName;

/// 带长期记忆大脑服务的聊天路由
#[derive(Parser)]
#[command(name = "ghost", version, about, long_about = None)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 详细日志（-v debug，-vv trace）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// 以 JSON 输出状态类命令的结果
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 探测 Python 运行环境与大脑服务状态
    Status,
    /// 安装运行环境与大脑服务包
    Install,
    /// 启动大脑服务
    Start,
    /// 停止大脑服务
    Stop,
    /// 检查大脑服务健康状态
    Health,
    /// 检索大脑记忆
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 3)]
        top_k: usize,
    },
    /// 大脑记忆统计
    Stats,
    /// 把聊天记录目录嵌入大脑记忆
    Embed {
        /// 默认取配置中的 brain.chat_history_path
        path: Option<String>,
    },
    /// 管理 API Key
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },
    /// 交互式对话
    Chat {
        /// 覆盖配置中的模型
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// 保存 Key（openai / google / anthropic）
    Set { name: ApiKeyName, value: String },
    /// 显示哪些 Key 已配置
    Status,
    /// 删除所有已保存的 Key
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    ghost::observability::init(level);

    let mut ctx = RuntimeContext::init(cli.config.clone()).context("Failed to load configuration")?;
    ctx.shutdown().install_signal_handlers();

    let result = run(&mut ctx, cli).await;
    ctx.teardown().await;
    result
}

async fn run(ctx: &mut RuntimeContext, cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Chat { model: None }) {
        Commands::Status => {
            let status = ctx.provisioner().status().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status.summary());
                println!("  python installed:    {}", status.python_installed);
                println!(
                    "  python version:      {}",
                    status.python_version.as_deref().unwrap_or("-")
                );
                println!("  using system python: {}", status.using_system_python);
                println!("  miniforge installed: {}", status.miniforge_installed);
                println!(
                    "  conda version:       {}",
                    status.conda_version.as_deref().unwrap_or("-")
                );
                println!("  brain environment:   {}", status.brain_environment_exists);
                println!("  brain package:       {}", status.brain_package_installed);
                println!(
                    "  brain version:       {}",
                    status.brain_version.as_deref().unwrap_or("-")
                );
                println!("  brain server:        {}", status.brain_server_running);
            }
        }
        Commands::Install => {
            let cancel = ctx.shutdown().child_token();
            let ok = ctx
                .provisioner()
                .install(
                    |event| {
                        if event.step == InstallStep::Error {
                            eprintln!(
                                "[{:>3}%] {}: {}",
                                event.progress,
                                event.message,
                                event.error.as_deref().unwrap_or("unknown error")
                            );
                        } else {
                            println!("[{:>3}%] {}", event.progress, event.message);
                        }
                    },
                    cancel,
                )
                .await;
            if !ok {
                anyhow::bail!("installation failed");
            }
        }
        Commands::Start => {
            let started = tokio::select! {
                _ = ctx.shutdown().wait_for_shutdown() => anyhow::bail!("start interrupted"),
                started = ctx.supervisor().start() => started,
            };
            if !started {
                anyhow::bail!("brain server did not become healthy");
            }
            println!("Brain server started");
        }
        Commands::Stop => {
            if !ctx.supervisor().stop().await {
                anyhow::bail!("failed to stop brain server");
            }
            println!("Brain server stopped");
        }
        Commands::Health => {
            let health = ctx.health_check().check().await;
            println!("{}", health.describe());
            if !health.is_healthy() {
                anyhow::bail!("brain server is not healthy");
            }
        }
        Commands::Search { query, top_k } => {
            let mut coordinator = ctx.new_coordinator();
            coordinator.initialize().await;
            let chunks = coordinator.search_memory(&query, top_k).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else if chunks.is_empty() {
                println!("No memories found");
            } else {
                for (i, chunk) in chunks.iter().enumerate() {
                    println!("{}. {}", i + 1, chunk);
                }
            }
        }
        Commands::Stats => {
            let mut coordinator = ctx.new_coordinator();
            coordinator.initialize().await;
            let stats = coordinator
                .memory_stats()
                .await
                .context("memory stats unavailable (is the brain server running?)")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Embed { path } => {
            let path = path.unwrap_or_else(|| ctx.config().brain.chat_history_path.clone());
            let mut coordinator = ctx.new_coordinator();
            coordinator.initialize().await;
            let report = coordinator
                .embed_chat_history(&path)
                .await
                .context("chat history embedding failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
                for error in &report.errors {
                    eprintln!("  {}", error);
                }
            }
        }
        Commands::Keys { action } => run_keys(ctx, action)?,
        Commands::Chat { model } => {
            let mut chat = ctx.chat_session().await;
            if let Some(model) = model {
                chat.set_model(model);
            }
            chat_loop(ctx, &mut chat).await?;
            chat.coordinator().wait_for_mirrors().await;
        }
    }
    Ok(())
}

fn run_keys(ctx: &RuntimeContext, action: KeysCommand) -> anyhow::Result<()> {
    let keys = ctx.keys();
    match action {
        KeysCommand::Set { name, value } => {
            keys.set(name, &value)?;
            println!("{} API key saved", name);
        }
        KeysCommand::Status => {
            for (name, configured) in keys.status() {
                let mark = if configured { "configured" } else { "missing" };
                println!("{:<10} {:<18} {}", name.display_name(), name.env_var(), mark);
            }
        }
        KeysCommand::Clear => {
            keys.clear_all()?;
            println!("All API keys cleared");
        }
    }
    Ok(())
}

const CHAT_HELP: &str = "/model <name>  switch model\n\
/search <text>  search brain memory\n\
/clear          clear history\n\
/refresh        reload config and reconnect the brain\n\
/status         brain status\n\
/quit           exit";

async fn chat_loop(ctx: &mut RuntimeContext, chat: &mut ChatSession) -> anyhow::Result<()> {
    let brain = if chat.coordinator().is_brain_available() {
        "brain connected"
    } else {
        "brain offline"
    };
    println!("ghost chat ({}, {}). /help for commands.", chat.model(), brain);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = ctx.shutdown().wait_for_shutdown() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" | "exit" => break,
                "help" => println!("{}", CHAT_HELP),
                "clear" => {
                    chat.coordinator_mut().clear_messages().await;
                    println!("History cleared");
                }
                "model" if !arg.trim().is_empty() => {
                    chat.set_model(arg.trim());
                    let pushed = chat
                        .coordinator()
                        .brain()
                        .update_config(serde_json::json!({ "model_name": arg.trim() }))
                        .await;
                    tracing::debug!(pushed, "model switch forwarded to brain");
                    println!("Model set to {}", chat.model());
                }
                "model" => println!("Current model: {}", chat.model()),
                "search" => {
                    for chunk in chat.coordinator().search_memory(arg.trim(), 3).await {
                        println!("- {}", chunk);
                    }
                }
                "refresh" => {
                    let mut settings = ctx.reload()?;
                    settings.model = chat.model().to_string();
                    let ok = chat.coordinator_mut().refresh_brain_integration(settings).await;
                    println!("{}", if ok { "Brain reconnected" } else { "Brain offline" });
                }
                "status" => println!("{}", ctx.health_check().check().await.describe()),
                _ => println!("Unknown command. /help for commands."),
            }
            continue;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let printer = tokio::spawn(async move {
            let mut streamed = false;
            while let Some(token) = rx.recv().await {
                print!("{}", token);
                let _ = std::io::stdout().flush();
                streamed = true;
            }
            streamed
        });

        let cancel = ctx.shutdown().child_token();
        let outcome = chat.submit_until(input, Some(&tx), &cancel).await;
        drop(tx);
        let streamed = printer.await.unwrap_or(false);

        match outcome {
            TurnOutcome::Reply { text, source } => {
                if streamed {
                    println!();
                } else {
                    println!("{}", text);
                }
                if source == ReplySource::Brain {
                    tracing::debug!("reply served by brain");
                }
            }
            TurnOutcome::Failed { message } => eprintln!("Error: {}", message),
            TurnOutcome::Ignored => {}
            TurnOutcome::Cancelled => {
                println!();
                break;
            }
        }
    }
    Ok(())
}
