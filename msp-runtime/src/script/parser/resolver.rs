//! # 结构解析器
//!
//! 顺序消费行 token，构建对话图。
//!
//! 跨行维护的状态：
//! - 当前对话的构建器
//! - 正在累积的“当前行”（说话者、图片、若干句子片段）
//! - 未闭合条件块的栈（保存 IfStart 索引）
//! - 至多一个未闭合的循环（不支持嵌套循环，新的 Loop 会强制关闭旧的）

use tracing::{debug, error, info, warn};

use crate::diagnostic::{Diagnostic, DiagnosticLevel};
use crate::script::ast::{
    AnchoredChoice, Choice, ConditionKind, ConditionalBlock, Conversation, Line, LineContent,
    LineType, LoopInfo,
};
use crate::services::VariableStore;

use super::helpers::{SentencePart, parse_metadata, process_sentence, substitute_variables};
use super::lexer::Token;

/// 解析开始时隐式创建的对话名
pub const DEFAULT_CONVERSATION_NAME: &str = "Default";

/// 正在累积的行
#[derive(Debug, Default)]
struct PendingLine {
    speaker: Option<String>,
    image: Option<String>,
    parts: Vec<SentencePart>,
}

impl PendingLine {
    fn has_text(&self) -> bool {
        self.parts.iter().any(|p| !p.text.trim().is_empty())
    }

    fn is_meaningful(&self) -> bool {
        self.speaker.is_some() || self.image.is_some() || self.has_text()
    }

    /// 合并片段：以单个 `\n` 连接，偏移按前序片段长度 + 1 累加
    fn build_content(parts: Vec<SentencePart>) -> LineContent {
        let mut content = LineContent::default();
        let mut len = 0usize;

        for part in parts {
            let base = if part.text.is_empty() {
                len
            } else {
                if !content.text.is_empty() {
                    content.text.push('\n');
                    len += 1;
                }
                let base = len;
                len += part.text.chars().count();
                content.text.push_str(&part.text);
                base
            };

            for mut inline in part.invocations {
                inline.offset += base;
                content.invocations.push(inline);
            }
            for (key, value) in part.metadata {
                content.metadata.entry(key).or_insert(value);
            }
        }

        let trimmed = content.text.trim_end_matches('\n').len();
        content.text.truncate(trimmed);
        let visible = content.char_len();
        for inline in &mut content.invocations {
            inline.offset = inline.offset.min(visible);
        }
        content.invocations.sort_by_key(|inline| inline.offset);
        content
    }
}

/// 结构解析器
pub(super) struct Resolver<'a> {
    source_id: &'a str,
    vars: &'a VariableStore,
    conversations: Vec<Conversation>,
    current: Conversation,
    pending: PendingLine,
    open_blocks: Vec<usize>,
    open_loop: Option<usize>,
    line_number: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Resolver<'a> {
    pub(super) fn new(source_id: &'a str, vars: &'a VariableStore) -> Self {
        Self {
            source_id,
            vars,
            conversations: Vec::new(),
            current: Conversation::new(DEFAULT_CONVERSATION_NAME),
            pending: PendingLine::default(),
            open_blocks: Vec::new(),
            open_loop: None,
            line_number: 0,
            diagnostics: Vec::new(),
        }
    }

    /// 消费一个 token
    pub(super) fn feed(&mut self, line_number: usize, raw: &str, token: Token<'_>) {
        self.line_number = line_number;
        match token {
            Token::Blank => {
                if self.pending.has_text() {
                    self.flush_line();
                }
            }
            Token::Comment => {}
            Token::Speaker(name) => self.on_speaker(name, raw),
            Token::Choice {
                text,
                target,
                metadata,
            } => self.on_choice(text, target, metadata),
            Token::If(expr) => self.on_if(ConditionKind::If, expr),
            Token::IfVar(expr) => self.on_if(ConditionKind::IfVar, expr),
            Token::Else => self.on_else(raw),
            Token::EndIf => self.on_end_if(raw),
            Token::Label(name) => self.on_label(name, raw),
            Token::Goto(name) => self.on_goto(name, raw),
            Token::Loop(expr) => self.on_loop(expr),
            Token::Image(path) => self.on_image(path),
            Token::DialogueName(name) => self.on_dialogue_name(name, raw),
            Token::Sentence(text) => self.on_sentence(text),
        }
    }

    /// 结束解析，返回对话列表与诊断
    pub(super) fn finish(mut self) -> (Vec<Conversation>, Vec<Diagnostic>) {
        self.finish_conversation();
        (self.conversations, self.diagnostics)
    }

    fn report(&mut self, level: DiagnosticLevel, message: String, raw: Option<&str>) {
        let line = self.line_number;
        match level {
            DiagnosticLevel::Info => info!(source = self.source_id, line, "{}", message),
            DiagnosticLevel::Warning => warn!(source = self.source_id, line, "{}", message),
            DiagnosticLevel::Error => error!(source = self.source_id, line, "{}", message),
        }
        let mut diagnostic = match level {
            DiagnosticLevel::Info => Diagnostic::info(self.source_id, message),
            DiagnosticLevel::Warning => Diagnostic::warning(self.source_id, message),
            DiagnosticLevel::Error => Diagnostic::error(self.source_id, message),
        }
        .with_line(line)
        .with_conversation(self.current.name.clone(), None);
        if let Some(raw) = raw {
            diagnostic = diagnostic.with_detail(raw.trim());
        }
        self.diagnostics.push(diagnostic);
    }

    fn report_unresolved(&mut self, unresolved: Vec<String>) {
        for name in unresolved {
            self.report(
                DiagnosticLevel::Info,
                format!("变量 '${}' 未定义，保留原文", name),
                None,
            );
        }
    }

    /// 对指令参数做变量替换
    fn substitute(&mut self, text: &str) -> String {
        let mut unresolved = Vec::new();
        let out = substitute_variables(text.trim(), self.vars, &mut unresolved);
        self.report_unresolved(unresolved);
        out
    }

    fn push_line(&mut self, line: Line) -> usize {
        self.current.lines.push(line);
        self.current.lines.len() - 1
    }

    /// 把累积的行写入当前对话；没有说话者、图片和非空白文本时不产生行
    fn flush_line(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_meaningful() {
            let dropped: usize = pending.parts.iter().map(|p| p.invocations.len()).sum();
            if dropped > 0 {
                self.report(
                    DiagnosticLevel::Warning,
                    format!("{} 个内联调用没有可附着的行，已丢弃", dropped),
                    None,
                );
            }
            return;
        }

        let mut line = Line::normal(pending.speaker, PendingLine::build_content(pending.parts));
        line.speaker_image = pending.image;
        self.push_line(line);
    }

    /// 若有未闭合的循环，在当前位置插入 LoopEnd 并关闭它
    fn close_open_loop(&mut self) {
        let Some(start) = self.open_loop.take() else {
            return;
        };
        let end = self.push_line(Line::control(LineType::LoopEnd));
        if let Some(info) = self
            .current
            .lines
            .get_mut(start)
            .and_then(|line| line.loop_info.as_mut())
        {
            info.end_index = Some(end);
        }
    }

    fn finish_conversation(&mut self) {
        self.flush_line();
        self.close_open_loop();

        for if_index in std::mem::take(&mut self.open_blocks) {
            let expression = self
                .current
                .conditional_blocks
                .get(&if_index)
                .map(|b| b.expression.clone())
                .unwrap_or_default();
            self.report(
                DiagnosticLevel::Warning,
                format!("条件块 (行索引 {}) 缺少 EndIf", if_index),
                Some(&expression),
            );
        }

        let next = Conversation::new(DEFAULT_CONVERSATION_NAME);
        let mut conv = std::mem::replace(&mut self.current, next);
        if conv.lines.is_empty() {
            if !conv.choices.is_empty() {
                warn!(conversation = %conv.name, "对话没有任何行，其选项被丢弃");
            }
            return;
        }

        // 之后没有内容的选项锚定到最后一行
        let last = conv.lines.len() - 1;
        for anchored in &mut conv.choices {
            if anchored.anchor > last {
                anchored.anchor = last;
            }
        }

        debug!(
            conversation = %conv.name,
            lines = conv.lines.len(),
            choices = conv.choices.len(),
            "对话解析完成"
        );
        self.conversations.push(conv);
    }

    /// 已有说话者时先结束当前行；之前累积的旁白文本归入新说话者
    fn on_speaker(&mut self, name: &str, raw: &str) {
        let name = self.substitute(name).trim().to_string();
        if name.is_empty() {
            self.report(DiagnosticLevel::Warning, "说话者名称为空".to_string(), Some(raw));
            return;
        }
        if self.pending.speaker.is_some() {
            self.flush_line();
        }
        self.pending.speaker = Some(name);
    }

    fn on_choice(&mut self, text: &str, target: &str, metadata: Option<&str>) {
        let text = self.substitute(text);
        let target = self.substitute(target);
        let metadata = metadata.map(parse_metadata).unwrap_or_default();
        let condition_expression = metadata
            .get("if")
            .or_else(|| metadata.get("condition"))
            .cloned();

        let anchor = self.current.lines.len();
        self.current.choices.push(AnchoredChoice {
            anchor,
            choice: Choice {
                text,
                target,
                condition_expression,
                metadata,
            },
        });
    }

    fn on_if(&mut self, kind: ConditionKind, expr: &str) {
        self.flush_line();
        let if_index = self.push_line(Line::control(LineType::IfStart));
        self.current.conditional_blocks.insert(
            if_index,
            ConditionalBlock {
                kind,
                expression: expr.trim().to_string(),
                if_index,
                else_index: None,
                end_if_index: None,
            },
        );
        self.open_blocks.push(if_index);
    }

    fn on_else(&mut self, raw: &str) {
        self.flush_line();
        let Some(&if_index) = self.open_blocks.last() else {
            self.report(
                DiagnosticLevel::Error,
                "Else 没有对应的 If".to_string(),
                Some(raw),
            );
            return;
        };

        let has_else = self
            .current
            .conditional_blocks
            .get(&if_index)
            .is_some_and(|b| b.else_index.is_some());
        if has_else {
            self.report(
                DiagnosticLevel::Error,
                "同一个 If 出现了多个 Else".to_string(),
                Some(raw),
            );
            return;
        }

        let else_index = self.push_line(Line::control(LineType::Else));
        if let Some(block) = self.current.conditional_blocks.get_mut(&if_index) {
            block.else_index = Some(else_index);
        }
    }

    fn on_end_if(&mut self, raw: &str) {
        self.flush_line();
        let Some(if_index) = self.open_blocks.pop() else {
            self.report(
                DiagnosticLevel::Error,
                "EndIf 没有对应的 If".to_string(),
                Some(raw),
            );
            return;
        };

        let end_index = self.push_line(Line::control(LineType::EndIf));
        if let Some(block) = self.current.conditional_blocks.get_mut(&if_index) {
            block.end_if_index = Some(end_index);
        }
    }

    fn on_label(&mut self, name: &str, raw: &str) {
        self.flush_line();
        let name = self.substitute(name);
        if name.is_empty() {
            self.report(DiagnosticLevel::Warning, "标签名为空".to_string(), Some(raw));
            return;
        }
        if self.current.labels.contains_key(&name) {
            self.report(
                DiagnosticLevel::Warning,
                format!("标签 '{}' 重复定义，以最后一次为准", name),
                Some(raw),
            );
        }

        let mut line = Line::control(LineType::Label);
        line.label_name = Some(name.clone());
        let index = self.push_line(line);
        self.current.labels.insert(name, index);
    }

    fn on_goto(&mut self, name: &str, raw: &str) {
        self.flush_line();
        let name = self.substitute(name);
        if name.is_empty() {
            self.report(DiagnosticLevel::Warning, "Goto 目标为空".to_string(), Some(raw));
            return;
        }

        let mut line = Line::control(LineType::Goto);
        line.label_name = Some(name);
        self.push_line(line);
    }

    fn on_loop(&mut self, expr: &str) {
        self.flush_line();
        self.close_open_loop();

        let expr = match expr.trim() {
            "" => "1".to_string(),
            expr => expr.to_string(),
        };
        if !expr.starts_with('$') && expr.parse::<i64>().is_err() {
            self.report(
                DiagnosticLevel::Warning,
                format!("循环次数 '{}' 不是整数，播放时按 1 次处理", expr),
                None,
            );
        }

        let start_index = self.current.lines.len();
        let mut line = Line::control(LineType::LoopStart);
        line.loop_info = Some(LoopInfo {
            count_expr: expr,
            start_index,
            end_index: None,
        });
        self.push_line(line);
        self.open_loop = Some(start_index);
    }

    fn on_image(&mut self, path: &str) {
        let path = self.substitute(path);
        if path.is_empty() {
            self.report(DiagnosticLevel::Warning, "图片路径为空".to_string(), None);
            return;
        }
        self.pending.image = Some(path);
    }

    fn on_dialogue_name(&mut self, name: &str, raw: &str) {
        let name = self.substitute(name);
        if name.is_empty() {
            self.report(DiagnosticLevel::Warning, "对话名为空".to_string(), Some(raw));
            return;
        }

        let untouched_default = self.conversations.is_empty()
            && self.current.name == DEFAULT_CONVERSATION_NAME
            && self.current.lines.is_empty()
            && self.current.choices.is_empty()
            && !self.pending.is_meaningful();
        if untouched_default {
            self.current.name = name;
            return;
        }

        self.finish_conversation();
        self.current.name = name;
    }

    fn on_sentence(&mut self, text: &str) {
        let mut unresolved = Vec::new();
        let part = process_sentence(text, self.vars, &mut unresolved);
        self.report_unresolved(unresolved);

        for body in &part.malformed {
            self.report(
                DiagnosticLevel::Warning,
                format!("无法识别的内联调用 {}，按文本保留", body),
                None,
            );
        }
        if !part.is_empty() {
            self.pending.parts.push(part);
        }
    }
}
