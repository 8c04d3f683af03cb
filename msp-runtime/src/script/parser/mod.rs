//! # Parser 模块
//!
//! 把对话文本编译为对话图。
//!
//! ## 架构
//!
//! ```text
//! 原始文本 → [换行规范化] → 物理行 → [lexer: 行分类] → Token
//!          → [resolver: 结构解析 + 变量替换] → Vec<Conversation>
//! ```
//!
//! ## 设计原则
//!
//! - 容错解析：格式错误的语法只记录诊断，不中断解析
//! - 只有空源和零对话两种情况是致命错误
//!
//! ## 模块结构
//!
//! - `helpers`: 句子处理、参数解析、变量替换
//! - `lexer`: 行分类
//! - `resolver`: 结构解析

mod helpers;
mod lexer;
mod resolver;


use tracing::debug;

use crate::diagnostic::Diagnostic;
use crate::error::ParseError;
use crate::script::ast::{Conversation, DialogueAsset};
use crate::services::VariableStore;

use resolver::Resolver;

pub use helpers::{
    SentencePart, parse_argument, parse_invocation, parse_metadata, process_sentence,
    split_arguments, strip_quotes, substitute_variables,
};
pub use lexer::{Token, classify_line, split_lines};
pub use resolver::DEFAULT_CONVERSATION_NAME;

/// 对话解析器
#[derive(Debug, Default)]
pub struct Parser {
    /// 最近一次解析产生的诊断
    warnings: Vec<Diagnostic>,
}

impl Parser {
    /// 创建新的解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析对话源
    ///
    /// `vars` 用于解析期的 `$name` 替换。
    pub fn parse(
        &mut self,
        asset: &DialogueAsset,
        vars: &VariableStore,
    ) -> Result<Vec<Conversation>, ParseError> {
        let Some(content) = asset.content.as_deref() else {
            return Err(ParseError::MissingSource {
                source_id: asset.id.clone(),
            });
        };
        self.parse_text(&asset.id, content, vars)
    }

    /// 解析对话文本
    pub fn parse_text(
        &mut self,
        source_id: &str,
        text: &str,
        vars: &VariableStore,
    ) -> Result<Vec<Conversation>, ParseError> {
        self.warnings.clear();

        let mut resolver = Resolver::new(source_id, vars);
        for (index, raw) in split_lines(text).iter().enumerate() {
            resolver.feed(index + 1, raw, classify_line(raw));
        }
        let (conversations, diagnostics) = resolver.finish();
        self.warnings = diagnostics;

        if conversations.is_empty() {
            return Err(ParseError::NoConversations {
                source_id: source_id.to_string(),
            });
        }

        debug!(
            source = source_id,
            conversations = conversations.len(),
            warnings = self.warnings.len(),
            "对话源解析完成"
        );
        Ok(conversations)
    }

    /// 获取最近一次解析的诊断
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}
