//! # Terminal 模块
//!
//! 终端播放器：基于标准输入输出的 [`DialogueView`] 实现与交互循环。
//!
//! ## 操作
//!
//! - 回车：推进到下一行
//! - 数字：选择对应编号的选项（从 1 开始）
//! - `p`：暂停 / 继续
//! - `q`：退出

use std::io::{BufRead, Write};

use anyhow::Context;
use msp_runtime::{
    Choice, Conversation, DialogueEngine, DialogueView, FunctionRegistry, Line, Waiting,
};
use tracing::{debug, warn};

/// 终端视图
///
/// 文本立即输出，因此 `is_still_displaying` 总是 `false`。
pub struct TerminalView<W: Write> {
    out: W,
}

impl<W: Write> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// 输出一行提示
    pub fn note(&mut self, message: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.out, "{}", message) {
            warn!(error = %e, "终端输出失败");
        }
    }

    /// 底层输出
    pub fn writer(&self) -> &W {
        &self.out
    }
}

impl<W: Write> DialogueView for TerminalView<W> {
    fn set_view(&mut self, _conversation: &Conversation, line_index: usize, line: &Line) {
        debug!(line = line_index, "显示行");
        match &line.speaker {
            Some(speaker) => self.note(format_args!("{}: {}", speaker, line.text())),
            None => self.note(line.text()),
        }
    }

    fn clear_view(&mut self) {}

    fn is_still_displaying(&self) -> bool {
        false
    }

    fn pause(&mut self) {
        self.note("⏸ 已暂停（输入 p 继续）");
    }

    fn resume(&mut self) {
        self.note("▶ 继续");
    }

    fn display_choices(&mut self, _conversation: &Conversation, choices: &[Choice]) {
        for (index, choice) in choices.iter().enumerate() {
            self.note(format_args!("  [{}] {}", index + 1, choice.text));
        }
    }
}

/// 注册演示用的宿主函数
///
/// - `PlayerName()`：返回 `player_name` 变量，未设置时为 `"Player"`
/// - `Set(name, value)`：设置变量
pub fn register_demo_functions(functions: &mut FunctionRegistry) {
    functions.register_with_arity("PlayerName", 0, |ctx, _args| {
        ctx.variables()
            .get_string("player_name")
            .unwrap_or("Player")
            .to_string()
    });

    functions.register_with_arity("Set", 2, |ctx, args| {
        let name = args[0].to_string();
        let value = args[1].to_string();
        ctx.variables_mut().set(&name, value);
    });
}

/// 玩家输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 推进
    Advance,
    /// 选择选项（0 起始）
    Select(usize),
    /// 暂停 / 继续
    TogglePause,
    /// 退出
    Quit,
    /// 无法识别
    Unknown(String),
}

impl Command {
    /// 解析一行输入
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::Advance;
        }
        if input.eq_ignore_ascii_case("q") {
            return Self::Quit;
        }
        if input.eq_ignore_ascii_case("p") {
            return Self::TogglePause;
        }
        match input.parse::<usize>() {
            Ok(number) if number > 0 => Self::Select(number - 1),
            _ => Self::Unknown(input.to_string()),
        }
    }
}

/// 运行交互会话，直到对话结束、停机、退出或输入耗尽
pub fn run_session<W: Write>(
    engine: &mut DialogueEngine<TerminalView<W>>,
    mut input: impl BufRead,
) -> anyhow::Result<()> {
    let mut buffer = String::new();

    loop {
        let waiting = engine.tick();
        match waiting {
            Waiting::Idle => {
                engine.view_mut().note("=== 对话结束 ===");
                return Ok(());
            }
            Waiting::Halted => {
                engine.view_mut().note("=== 播放因错误中止 ===");
                return Ok(());
            }
            _ => {}
        }

        buffer.clear();
        let read = input.read_line(&mut buffer).context("读取输入失败")?;
        if read == 0 {
            engine.stop();
            return Ok(());
        }

        match Command::parse(&buffer) {
            Command::Quit => {
                engine.stop();
                return Ok(());
            }
            Command::TogglePause => {
                if engine.is_paused() {
                    engine.resume();
                } else {
                    engine.pause();
                }
            }
            Command::Advance if engine.is_paused() => {
                engine.view_mut().note("已暂停，输入 p 继续");
            }
            Command::Advance => match waiting {
                Waiting::Choice { .. } => engine.view_mut().note("请输入选项编号"),
                Waiting::View | Waiting::Plugin { .. } => {
                    engine.proceed();
                }
                _ => {
                    engine.advance_to_next_line();
                }
            },
            Command::Select(index) => {
                if let Err(e) = engine.select_choice(index) {
                    engine.view_mut().note(format_args!("❌ {}", e));
                }
            }
            Command::Unknown(raw) => {
                engine
                    .view_mut()
                    .note(format_args!("无法识别的输入: {}（回车 / 数字 / p / q）", raw));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msp_runtime::DialogueAsset;

    fn play(script: &str, input: &str) -> String {
        let mut engine = DialogueEngine::new(TerminalView::new(Vec::new()));
        register_demo_functions(engine.functions_mut());
        engine
            .start(&DialogueAsset::new("test", script), 0)
            .unwrap();
        run_session(&mut engine, input.as_bytes()).unwrap();
        String::from_utf8(engine.view().writer().clone()).unwrap()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(Command::parse("\n"), Command::Advance);
        assert_eq!(Command::parse(" Q "), Command::Quit);
        assert_eq!(Command::parse("p"), Command::TogglePause);
        assert_eq!(Command::parse("2"), Command::Select(1));
        assert_eq!(Command::parse("0"), Command::Unknown("0".to_string()));
        assert_eq!(Command::parse("go"), Command::Unknown("go".to_string()));
    }

    #[test]
    fn test_plays_to_end() {
        let output = play("[Alice]\nHello.\n\nBye.", "\n\n");
        assert_eq!(output, "Alice: Hello.\nBye.\n=== 对话结束 ===\n");
    }

    #[test]
    fn test_choice_selection() {
        let script = "Pick one.\n- Left -> L\n- Right -> R\n\
                      {{DialogueName(L)}}\nWent left.\n\
                      {{DialogueName(R)}}\nWent right.";
        let output = play(script, "\n2\n\n");

        assert!(output.contains("  [1] Left\n  [2] Right\n"));
        assert!(output.contains("请输入选项编号"));
        assert!(output.contains("Went right."));
        assert!(!output.contains("Went left."));
    }

    #[test]
    fn test_pause_blocks_advance() {
        let output = play("One.\n\nTwo.", "p\n\np\n\n");

        let pause = output.find("⏸").unwrap();
        let hint = output.find("已暂停，输入 p 继续").unwrap();
        let two = output.find("Two.").unwrap();
        assert!(pause < hint && hint < two);
    }

    #[test]
    fn test_quit_and_eof_stop() {
        let output = play("One.\n\nTwo.", "q\n");
        assert!(!output.contains("Two."));

        let output = play("One.\n\nTwo.", "");
        assert_eq!(output, "One.\n");
    }

    #[test]
    fn test_demo_functions() {
        let output = play(
            "Hi {{PlayerName()}}.{{Set(player_name, Bob)}}\n\nHi {{PlayerName()}}.",
            "\n\n",
        );
        assert!(output.starts_with("Hi Player.\nHi Bob.\n"));
    }
}
