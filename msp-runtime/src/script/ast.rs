//! # AST 模块
//!
//! 定义对话图（Conversation Graph）。
//!
//! ## 设计说明
//!
//! 对话图是解析器的输出，解析完成后只读。
//! 所有跳转目标都是行索引而不是引用，
//! 这样播放引擎可以直接做区间比较（例如“索引是否小于 EndIf”）。

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::state::VarValue;

/// 对话源
///
/// `content` 为 `None` 表示空源（宿主传入了无效资源），解析时直接拒绝。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueAsset {
    /// 源标识（通常是文件名）
    pub id: String,
    /// 原始文本
    pub content: Option<String>,
}

impl DialogueAsset {
    /// 由文本创建
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
        }
    }

    /// 创建空源
    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: None,
        }
    }
}

/// 行类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineType {
    /// 普通对白/旁白
    Normal,
    /// 标签
    Label,
    /// 循环开始
    LoopStart,
    /// 循环结束
    LoopEnd,
    /// 条件开始
    IfStart,
    /// 否则分支
    Else,
    /// 条件结束
    EndIf,
    /// 跳转
    Goto,
}

impl LineType {
    /// 是否是纯控制流行（播放时对观察者透明）
    pub fn is_control_flow(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl std::fmt::Display for LineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Normal => "Normal",
            Self::Label => "Label",
            Self::LoopStart => "LoopStart",
            Self::LoopEnd => "LoopEnd",
            Self::IfStart => "IfStart",
            Self::Else => "Else",
            Self::EndIf => "EndIf",
            Self::Goto => "Goto",
        };
        f.write_str(name)
    }
}

/// 参数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentKind {
    String,
    Integer,
    Float,
    Boolean,
    /// `$name`，播放时才从变量仓库取值
    Variable,
}

/// 函数调用参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArgument {
    /// 原始文本（已去除首尾空白）
    pub raw: String,
    /// 推断出的类型
    pub kind: ArgumentKind,
    /// 类型化的值；`Variable` 类型保存不含 `$` 的变量名
    pub value: VarValue,
}

/// 函数调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInvocation {
    /// 函数名
    pub name: String,
    /// 参数列表
    pub arguments: Vec<FunctionArgument>,
}

/// 文本中的内联调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineInvocation {
    /// 在可见文本中的字符偏移（按 `char` 计）
    pub offset: usize,
    /// 调用内容
    pub invocation: FunctionInvocation,
}

/// 行内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineContent {
    /// 可见文本
    pub text: String,
    /// 内联调用，按偏移升序排列（同偏移保持源顺序）
    pub invocations: Vec<InlineInvocation>,
    /// 元数据（先写入者优先）
    pub metadata: BTreeMap<String, String>,
}

impl LineContent {
    /// 只有文本的内容
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// 读取元数据
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// 是否有该元数据
    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    /// 可见文本的字符数
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// 循环信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopInfo {
    /// 次数表达式：整数字面量或 `$变量`
    pub count_expr: String,
    /// LoopStart 行索引
    pub start_index: usize,
    /// LoopEnd 行索引
    pub end_index: Option<usize>,
}

/// 对话行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// 说话者（None 表示旁白）
    pub speaker: Option<String>,
    /// 说话者图片路径
    pub speaker_image: Option<String>,
    /// 行类型
    pub line_type: LineType,
    /// 内容；控制流行的文本为空
    pub content: LineContent,
    /// Label / Goto 的标签名
    pub label_name: Option<String>,
    /// LoopStart 的循环信息
    pub loop_info: Option<LoopInfo>,
}

impl Line {
    /// 创建普通行
    pub fn normal(speaker: Option<String>, content: LineContent) -> Self {
        Self {
            speaker,
            speaker_image: None,
            line_type: LineType::Normal,
            content,
            label_name: None,
            loop_info: None,
        }
    }

    /// 创建控制流行
    pub fn control(line_type: LineType) -> Self {
        Self {
            speaker: None,
            speaker_image: None,
            line_type,
            content: LineContent::default(),
            label_name: None,
            loop_info: None,
        }
    }

    /// 可见文本
    pub fn text(&self) -> &str {
        &self.content.text
    }

    /// 是否是带非空文本的普通行
    pub fn is_text_line(&self) -> bool {
        self.line_type == LineType::Normal && !self.content.text.trim().is_empty()
    }
}

/// 条件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionKind {
    If,
    IfVar,
}

/// 条件块
///
/// 不变量：`if_index < else_index < end_if_index`。
/// 未闭合的块 `end_if_index` 为 `None`，播放时不会被解引用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalBlock {
    /// 条件类型
    pub kind: ConditionKind,
    /// 条件表达式
    pub expression: String,
    /// IfStart 行索引
    pub if_index: usize,
    /// Else 行索引
    pub else_index: Option<usize>,
    /// EndIf 行索引
    pub end_if_index: Option<usize>,
}

/// 选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// 选项文本
    pub text: String,
    /// 目标对话名
    pub target: String,
    /// 显示条件（来自 `##if:` 元数据）
    pub condition_expression: Option<String>,
    /// 元数据
    pub metadata: BTreeMap<String, String>,
}

/// 锚定到某一行的选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredChoice {
    /// 锚点行索引
    pub anchor: usize,
    /// 选项
    pub choice: Choice,
}

/// 对话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// 名称（在一次解析结果内作为查找键）
    pub name: String,
    /// 行列表
    pub lines: Vec<Line>,
    /// 选项及其锚点，按注册顺序
    pub choices: Vec<AnchoredChoice>,
    /// 标签 → 行索引
    pub labels: HashMap<String, usize>,
    /// IfStart 行索引 → 条件块
    pub conditional_blocks: BTreeMap<usize, ConditionalBlock>,
}

impl Conversation {
    /// 创建空对话
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
            choices: Vec::new(),
            labels: HashMap::new(),
            conditional_blocks: BTreeMap::new(),
        }
    }

    /// 查找标签索引
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// 锚定在某行的选项
    pub fn choices_at(&self, index: usize) -> impl Iterator<Item = &Choice> {
        self.choices
            .iter()
            .filter(move |c| c.anchor == index)
            .map(|c| &c.choice)
    }

    /// 某行是否有锚定的选项
    pub fn has_choices_at(&self, index: usize) -> bool {
        self.choices.iter().any(|c| c.anchor == index)
    }

    /// 查找 `else_index` 等于给定索引的条件块
    pub fn block_with_else(&self, index: usize) -> Option<&ConditionalBlock> {
        self.conditional_blocks
            .values()
            .find(|b| b.else_index == Some(index))
    }

    /// 查找在给定索引结束的循环
    pub fn loop_ending_at(&self, index: usize) -> Option<&LoopInfo> {
        self.lines
            .iter()
            .filter_map(|l| l.loop_info.as_ref())
            .find(|info| info.end_index == Some(index))
    }

    /// 从 `before` 往前找最近的带文本普通行
    pub fn previous_text_line(&self, before: usize) -> Option<usize> {
        (0..before.min(self.lines.len()))
            .rev()
            .find(|&i| self.lines[i].is_text_line())
    }

    /// 人类可读的结构概要（用于调试输出）
    pub fn outline(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "conversation {} ({} lines)", self.name, self.lines.len());
        for (index, line) in self.lines.iter().enumerate() {
            let _ = write!(out, "  {} {}", index, line.line_type);
            match line.line_type {
                LineType::Normal => {
                    if let Some(speaker) = &line.speaker {
                        let _ = write!(out, " [{}]", speaker);
                    }
                    if let Some(image) = &line.speaker_image {
                        let _ = write!(out, " <{}>", image);
                    }
                    let _ = write!(out, " {:?}", line.content.text);
                    for inline in &line.content.invocations {
                        let _ = write!(out, " {{{}@{}}}", inline.invocation.name, inline.offset);
                    }
                    for (key, value) in &line.content.metadata {
                        let _ = write!(out, " ##{}:{}", key, value);
                    }
                }
                LineType::Label | LineType::Goto => {
                    if let Some(name) = &line.label_name {
                        let _ = write!(out, " {}", name);
                    }
                }
                LineType::LoopStart => {
                    if let Some(info) = &line.loop_info {
                        let _ = write!(out, " x{}", info.count_expr);
                        if let Some(end) = info.end_index {
                            let _ = write!(out, " end={}", end);
                        }
                    }
                }
                LineType::IfStart => {
                    if let Some(block) = self.conditional_blocks.get(&index) {
                        let _ = write!(out, " {:?}", block.expression);
                        if let Some(else_index) = block.else_index {
                            let _ = write!(out, " else={}", else_index);
                        }
                        if let Some(end) = block.end_if_index {
                            let _ = write!(out, " endif={}", end);
                        }
                    }
                }
                LineType::LoopEnd | LineType::Else | LineType::EndIf => {}
            }
            out.push('\n');
        }
        for anchored in &self.choices {
            let choice = &anchored.choice;
            let _ = write!(
                out,
                "  choice @{} {:?} -> {}",
                anchored.anchor, choice.text, choice.target
            );
            if let Some(condition) = &choice.condition_expression {
                let _ = write!(out, " if {:?}", condition);
            }
            out.push('\n');
        }
        out
    }
}

/// 按名称查找对话（重名时返回第一个）
pub fn find_conversation(conversations: &[Conversation], name: &str) -> Option<usize> {
    conversations.iter().position(|c| c.name == name)
}

/// 序列化解析结果，供宿主缓存
pub fn conversations_to_json(conversations: &[Conversation]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(conversations)
}

/// 从缓存恢复解析结果
pub fn conversations_from_json(json: &str) -> Result<Vec<Conversation>, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        let mut conv = Conversation::new("Main");
        conv.lines.push(Line::normal(
            Some("Bob".to_string()),
            LineContent::text("Hello"),
        ));
        conv.lines.push(Line::control(LineType::IfStart));
        conv.lines.push(Line::normal(None, LineContent::text("  ")));
        conv.lines.push(Line::control(LineType::EndIf));
        conv.conditional_blocks.insert(
            1,
            ConditionalBlock {
                kind: ConditionKind::If,
                expression: "flag".to_string(),
                if_index: 1,
                else_index: None,
                end_if_index: Some(3),
            },
        );
        conv.choices.push(AnchoredChoice {
            anchor: 3,
            choice: Choice {
                text: "Go".to_string(),
                target: "Other".to_string(),
                condition_expression: None,
                metadata: BTreeMap::new(),
            },
        });
        conv
    }

    #[test]
    fn test_previous_text_line_skips_blank_and_control() {
        let conv = sample();
        assert_eq!(conv.previous_text_line(3), Some(0));
        assert_eq!(conv.previous_text_line(0), None);
    }

    #[test]
    fn test_choices_at() {
        let conv = sample();
        assert!(conv.has_choices_at(3));
        assert!(!conv.has_choices_at(0));
        assert_eq!(conv.choices_at(3).count(), 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let conversations = vec![sample()];
        let json = conversations_to_json(&conversations).unwrap();
        let restored = conversations_from_json(&json).unwrap();
        assert_eq!(conversations, restored);
    }

    #[test]
    fn test_find_conversation_returns_first_duplicate() {
        let conversations = vec![
            Conversation::new("A"),
            Conversation::new("B"),
            Conversation::new("A"),
        ];
        assert_eq!(find_conversation(&conversations, "A"), Some(0));
        assert_eq!(find_conversation(&conversations, "C"), None);
    }
}
