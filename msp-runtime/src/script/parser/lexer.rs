//! # 行分类器
//!
//! 把每个物理行归为恰好一种 token。优先级（先匹配者胜）：
//!
//! ```text
//! 注释 → 说话者 → 选项 → If → IfVar → Else → EndIf → Label → Goto → Loop
//!      → 通用指令（Image / DialogueName / ConversationName）→ 句子
//! ```
//!
//! 指令必须占满整行；句子中间的 `{{...}}` 留给内联调用提取。

use std::sync::OnceLock;

use regex::Regex;

use super::helpers::split_metadata;

/// 行 token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// 空行
    Blank,
    /// `# ...`
    Comment,
    /// `[Name]`
    Speaker(&'a str),
    /// `- Text -> Target ##meta`
    Choice {
        text: &'a str,
        target: &'a str,
        metadata: Option<&'a str>,
    },
    If(&'a str),
    IfVar(&'a str),
    Else,
    EndIf,
    Label(&'a str),
    Goto(&'a str),
    Loop(&'a str),
    Image(&'a str),
    /// `DialogueName(...)` 或 `ConversationName(...)`
    DialogueName(&'a str),
    /// 普通句子文本（原样）
    Sentence(&'a str),
}

macro_rules! line_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static REGEX: OnceLock<Regex> = OnceLock::new();
            REGEX.get_or_init(|| Regex::new($pattern).expect("line regex must compile"))
        }
    };
}

line_regex!(comment_regex, r"^\s*#");
line_regex!(speaker_regex, r"^\s*\[(.+?)\]\s*$");
line_regex!(choice_regex, r"^\s*-\s*(.+?)\s*->\s*(.+?)\s*$");
line_regex!(if_regex, r"(?i)^\s*\{\{\s*If\s*\((.+?)\)\s*\}\}\s*$");
line_regex!(if_var_regex, r"(?i)^\s*\{\{\s*IfVar\s*\((.+?)\)\s*\}\}\s*$");
line_regex!(else_regex, r"(?i)^\s*\{\{\s*Else\s*\}\}\s*$");
line_regex!(end_if_regex, r"(?i)^\s*\{\{\s*EndIf\s*\}\}\s*$");
line_regex!(label_regex, r"(?i)^\s*\{\{\s*Label\s*\((.+?)\)\s*\}\}\s*$");
line_regex!(goto_regex, r"(?i)^\s*\{\{\s*Goto\s*\((.+?)\)\s*\}\}\s*$");
line_regex!(loop_regex, r"(?i)^\s*\{\{\s*Loop\s*\((.*?)\)\s*\}\}\s*$");
line_regex!(
    directive_regex,
    r"^\s*\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*\}\}\s*$"
);

fn capture<'a>(regex: &Regex, line: &'a str) -> Option<&'a str> {
    regex
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// 对单个物理行分类
pub fn classify_line(line: &str) -> Token<'_> {
    if line.trim().is_empty() {
        return Token::Blank;
    }
    if comment_regex().is_match(line) {
        return Token::Comment;
    }
    if let Some(name) = capture(speaker_regex(), line) {
        return Token::Speaker(name);
    }

    let (body, metadata) = split_metadata(line);
    if let Some(caps) = choice_regex().captures(body) {
        if let (Some(text), Some(target)) = (caps.get(1), caps.get(2)) {
            return Token::Choice {
                text: text.as_str(),
                target: target.as_str(),
                metadata,
            };
        }
    }

    if let Some(expr) = capture(if_regex(), line) {
        return Token::If(expr);
    }
    if let Some(expr) = capture(if_var_regex(), line) {
        return Token::IfVar(expr);
    }
    if else_regex().is_match(line) {
        return Token::Else;
    }
    if end_if_regex().is_match(line) {
        return Token::EndIf;
    }
    if let Some(name) = capture(label_regex(), line) {
        return Token::Label(name);
    }
    if let Some(name) = capture(goto_regex(), line) {
        return Token::Goto(name);
    }
    if let Some(expr) = capture(loop_regex(), line) {
        return Token::Loop(expr);
    }

    if let Some(caps) = directive_regex().captures(line) {
        if let (Some(name), Some(arg)) = (caps.get(1), caps.get(2)) {
            let name = name.as_str();
            if name.eq_ignore_ascii_case("Image") {
                return Token::Image(arg.as_str());
            }
            if name.eq_ignore_ascii_case("DialogueName")
                || name.eq_ignore_ascii_case("ConversationName")
            {
                return Token::DialogueName(arg.as_str());
            }
        }
    }

    Token::Sentence(line)
}

/// 统一换行符后按行拆分
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::to_string)
        .collect()
}
