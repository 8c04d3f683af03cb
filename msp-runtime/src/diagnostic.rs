//! # 诊断模块
//!
//! 解析期问题的收集载体，以及对话图的静态校验。
//!
//! ## 设计原则
//!
//! - 纯函数 API，可在无 IO 环境下运行
//! - 诊断分级：Error（必须修复）、Warning（建议修复）、Info（信息提示）
//! - 复用解析结果，不重复解析逻辑
//! - 只服务于创作期反馈，不影响播放

use std::collections::{HashMap, HashSet};

use crate::script::{Conversation, LineType};

/// 诊断级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    /// 信息提示
    Info,
    /// 警告（建议修复）
    Warning,
    /// 错误（必须修复）
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// 诊断条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 诊断级别
    pub level: DiagnosticLevel,
    /// 对话源 ID / 文件路径
    pub source_id: String,
    /// 所属对话名
    pub conversation: Option<String>,
    /// 源文本行号（从 1 开始）
    pub line: Option<usize>,
    /// 对话图中的行索引（从 0 开始）
    pub line_index: Option<usize>,
    /// 诊断消息
    pub message: String,
    /// 诊断详情（可选，如原始行内容）
    pub detail: Option<String>,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            source_id: source_id.into(),
            conversation: None,
            line: None,
            line_index: None,
            message: message.into(),
            detail: None,
        }
    }

    /// 创建错误诊断
    pub fn error(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, source_id, message)
    }

    /// 创建警告诊断
    pub fn warning(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, source_id, message)
    }

    /// 创建信息诊断
    pub fn info(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, source_id, message)
    }

    /// 设置源文本行号
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// 设置对话与行索引
    pub fn with_conversation(mut self, name: impl Into<String>, line_index: Option<usize>) -> Self {
        self.conversation = Some(name.into());
        self.line_index = line_index;
        self
    }

    /// 设置详情
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.source_id)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(conversation) = &self.conversation {
            write!(f, " <{}", conversation)?;
            if let Some(index) = self.line_index {
                write!(f, " #{}", index)?;
            }
            write!(f, ">")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n  | {}", detail)?;
        }
        Ok(())
    }
}

/// 诊断结果
#[derive(Debug, Clone, Default)]
pub struct DiagnosticResult {
    /// 诊断条目列表
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticResult {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加诊断
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// 合并另一个结果
    pub fn merge(&mut self, other: DiagnosticResult) {
        self.diagnostics.extend(other.diagnostics);
    }

    /// 获取错误数量
    pub fn error_count(&self) -> usize {
        self.count(DiagnosticLevel::Error)
    }

    /// 获取警告数量
    pub fn warning_count(&self) -> usize {
        self.count(DiagnosticLevel::Warning)
    }

    fn count(&self, level: DiagnosticLevel) -> usize {
        self.diagnostics.iter().filter(|d| d.level == level).count()
    }

    /// 是否有错误
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// 没有错误即视为有效
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// 遍历诊断
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// 按级别过滤（不低于 `min_level`）
    pub fn filter_by_level(&self, min_level: DiagnosticLevel) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level >= min_level)
            .collect()
    }
}

impl FromIterator<Diagnostic> for DiagnosticResult {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self {
            diagnostics: iter.into_iter().collect(),
        }
    }
}

/// 校验解析结果
///
/// 检查项：
/// - 对话重名（Error）
/// - 没有可显示文本的对话（Warning）
/// - 未闭合的条件块（Error）
/// - Goto 指向不存在的标签（Error）
/// - 选项目标为空（Warning）或不存在（Error）
/// - 选项文本为空（Warning）
/// - 同一锚点下重复的选项文本（Info）
/// - 选项锚点越界（Error）
/// - 选项锚定在除 EndIf 以外的控制流行上，永远不会展示（Warning）
pub fn validate_conversations(source_id: &str, conversations: &[Conversation]) -> DiagnosticResult {
    let mut result = DiagnosticResult::new();

    let mut seen_names = HashSet::new();
    for conv in conversations {
        if !seen_names.insert(conv.name.as_str()) {
            result.push(
                Diagnostic::error(source_id, format!("对话名 '{}' 重复", conv.name))
                    .with_conversation(&conv.name, None),
            );
        }
    }

    let names: HashSet<&str> = conversations.iter().map(|c| c.name.as_str()).collect();
    for conv in conversations {
        validate_conversation(source_id, conv, &names, &mut result);
    }

    result
}

fn validate_conversation(
    source_id: &str,
    conv: &Conversation,
    names: &HashSet<&str>,
    result: &mut DiagnosticResult,
) {
    let at = |index: Option<usize>| (conv.name.clone(), index);

    if conv.lines.is_empty() {
        let (name, index) = at(None);
        result.push(Diagnostic::warning(source_id, "对话为空").with_conversation(name, index));
    } else if !conv.lines.iter().any(|l| l.is_text_line()) {
        let (name, index) = at(None);
        result.push(
            Diagnostic::warning(source_id, "对话没有任何可显示的文本")
                .with_conversation(name, index),
        );
    }

    for block in conv.conditional_blocks.values() {
        if block.end_if_index.is_none() {
            let (name, index) = at(Some(block.if_index));
            result.push(
                Diagnostic::error(source_id, "条件块缺少 EndIf")
                    .with_conversation(name, index)
                    .with_detail(block.expression.clone()),
            );
        }
    }

    for (index, line) in conv.lines.iter().enumerate() {
        if line.line_type != LineType::Goto {
            continue;
        }
        let target = line.label_name.as_deref().unwrap_or_default();
        if conv.label_index(target).is_none() {
            let (name, index) = at(Some(index));
            result.push(
                Diagnostic::error(source_id, format!("Goto 目标标签 '{}' 不存在", target))
                    .with_conversation(name, index),
            );
        }
    }

    let mut texts_by_anchor: HashMap<usize, HashSet<&str>> = HashMap::new();
    for anchored in &conv.choices {
        let choice = &anchored.choice;
        let (name, index) = at(Some(anchored.anchor));

        if anchored.anchor >= conv.lines.len() {
            result.push(
                Diagnostic::error(
                    source_id,
                    format!("选项 '{}' 的锚点 {} 越界", choice.text, anchored.anchor),
                )
                .with_conversation(name.clone(), index),
            );
        } else if let Some(line) = conv
            .lines
            .get(anchored.anchor)
            .filter(|line| !matches!(line.line_type, LineType::Normal | LineType::EndIf))
        {
            result.push(
                Diagnostic::warning(
                    source_id,
                    format!(
                        "选项 '{}' 锚定在 {} 行上，不会被展示",
                        choice.text, line.line_type
                    ),
                )
                .with_conversation(name.clone(), index),
            );
        }

        if choice.target.trim().is_empty() {
            result.push(
                Diagnostic::warning(source_id, format!("选项 '{}' 没有目标对话", choice.text))
                    .with_conversation(name.clone(), index),
            );
        } else if !names.contains(choice.target.as_str()) {
            result.push(
                Diagnostic::error(
                    source_id,
                    format!("选项目标对话 '{}' 不存在", choice.target),
                )
                .with_conversation(name.clone(), index),
            );
        }

        if choice.text.trim().is_empty() {
            result.push(
                Diagnostic::warning(source_id, "选项文本为空").with_conversation(name, index),
            );
        } else if !texts_by_anchor
            .entry(anchored.anchor)
            .or_default()
            .insert(choice.text.as_str())
        {
            result.push(
                Diagnostic::info(source_id, format!("选项文本 '{}' 重复", choice.text))
                    .with_conversation(name, index),
            );
        }
    }
}
