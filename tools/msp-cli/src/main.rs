//! MSP 命令行工具
//!
//! 用法：
//!   msp check [PATH]                     # 检查脚本文件或目录
//!   msp dump FILE [--json]               # 输出对话图
//!   msp play FILE [-c NAME] [--var k=v]  # 在终端中播放

mod config;
mod terminal;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser as ClapParser, Subcommand};
use msp_runtime::script::{conversations_to_json, find_conversation};
use msp_runtime::{
    Conversation, DialogueEngine, DiagnosticLevel, Parser, VariableStore, validate_conversations,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use config::CliConfig;
use terminal::{TerminalView, register_demo_functions, run_session};

#[derive(ClapParser)]
#[command(name = "msp")]
#[command(about = "对话脚本检查、导出与终端播放工具", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(long, default_value = "msp.json", global = true)]
    config: PathBuf,

    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 检查脚本：解析并校验文件或目录
    Check {
        /// 脚本文件或目录，默认使用配置中的 scripts_dir
        path: Option<PathBuf>,
    },

    /// 输出解析后的对话图
    Dump {
        /// 脚本文件
        file: PathBuf,

        /// 以 JSON 格式输出
        #[arg(long)]
        json: bool,
    },

    /// 在终端中播放脚本
    Play {
        /// 脚本文件
        file: PathBuf,

        /// 开始的对话名
        #[arg(short, long)]
        conversation: Option<String>,

        /// 初始变量（可重复），形如 key=value
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("变量格式应为 key=value: {}", raw)),
    }
}

fn main() {
    let cli = Cli::parse();

    let config = CliConfig::load(&cli.config);
    if let Err(e) = config.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
    init_logging(&config, cli.verbose);

    let result = match cli.command {
        Commands::Check { path } => {
            let path = path.unwrap_or_else(|| config.scripts_dir.clone());
            check(&path, &config).map(|ok| {
                if !ok {
                    std::process::exit(1);
                }
            })
        }
        Commands::Dump { file, json } => dump(&file, &config, json),
        Commands::Play {
            file,
            conversation,
            vars,
        } => play(&file, &config, conversation, vars),
    };

    if let Err(e) = result {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(config: &CliConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.to_ascii_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// 用配置中的初始变量构建变量仓库
fn initial_variables(config: &CliConfig) -> VariableStore {
    let mut vars = VariableStore::new();
    for (key, value) in &config.variables {
        vars.set(key, value.as_str());
    }
    vars
}

/// 收集待检查的脚本文件
fn collect_scripts(path: &Path, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("路径不存在: {:?}", path);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// 读取并解析单个脚本
fn parse_file(
    path: &Path,
    vars: &VariableStore,
    parser: &mut Parser,
) -> anyhow::Result<Vec<Conversation>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("读取 {:?} 失败", path))?;
    let source_id = path.to_string_lossy();
    let conversations = parser.parse_text(&source_id, &text, vars)?;
    Ok(conversations)
}

/// 检查脚本，返回是否全部通过
fn check(path: &Path, config: &CliConfig) -> anyhow::Result<bool> {
    let files = collect_scripts(path, config.extension())?;
    if files.is_empty() {
        println!("⚠️ 没有找到 .{} 文件: {:?}", config.extension(), path);
        return Ok(true);
    }

    let vars = initial_variables(config);
    let mut parser = Parser::new();
    let mut failed = 0usize;
    let mut warnings = 0usize;

    for file in &files {
        debug!(file = ?file, "检查脚本");
        let conversations = match parse_file(file, &vars, &mut parser) {
            Ok(conversations) => conversations,
            Err(e) => {
                println!("❌ {:?}: {:#}", file, e);
                failed += 1;
                continue;
            }
        };

        let source_id = file.to_string_lossy();
        let mut result = validate_conversations(&source_id, &conversations);
        result.merge(parser.warnings().iter().cloned().collect());

        for diagnostic in result.filter_by_level(DiagnosticLevel::Info) {
            println!("  {}", diagnostic);
        }
        warnings += result.warning_count();

        if result.has_errors() {
            println!("❌ {:?}: {} 个错误", file, result.error_count());
            failed += 1;
        } else {
            println!("✅ {:?}: {} 段对话", file, conversations.len());
        }
    }

    println!();
    println!(
        "检查完成: {} 个文件，{} 个失败，{} 个警告",
        files.len(),
        failed,
        warnings
    );
    Ok(failed == 0)
}

/// 输出对话图
fn dump(file: &Path, config: &CliConfig, json: bool) -> anyhow::Result<()> {
    let vars = initial_variables(config);
    let conversations = parse_file(file, &vars, &mut Parser::new())?;

    if json {
        println!("{}", conversations_to_json(&conversations)?);
    } else {
        for conversation in &conversations {
            println!("{}", conversation.outline());
        }
    }
    Ok(())
}

/// 在终端中播放
fn play(
    file: &Path,
    config: &CliConfig,
    conversation: Option<String>,
    vars: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut engine = DialogueEngine::new(TerminalView::new(std::io::stdout()));
    *engine.variables_mut() = initial_variables(config);
    for (key, value) in &vars {
        engine.variables_mut().set(key, value.as_str());
    }
    register_demo_functions(engine.functions_mut());

    let mut parser = Parser::new();
    let conversations = parse_file(file, engine.variables(), &mut parser)?;
    for warning in parser.warnings() {
        info!("{}", warning);
    }

    let start = match conversation.or_else(|| config.start_conversation.clone()) {
        Some(name) => find_conversation(&conversations, &name)
            .with_context(|| format!("找不到对话: {}", name))?,
        None => 0,
    };

    println!("▶ 回车推进，数字选择，p 暂停，q 退出");
    engine.start_parsed(conversations, start)?;
    run_session(&mut engine, std::io::stdin().lock())
}
