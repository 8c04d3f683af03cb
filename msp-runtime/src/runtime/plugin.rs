//! # Plugin 模块
//!
//! 引擎插件：在对话生命周期的各个节点接收通知。
//!
//! 插件按优先级升序执行（数值小的先执行，同优先级保持注册顺序）。
//! `on_line_display` 返回 [`PluginResult::WaitForCompletion`] 时，
//! 引擎会阻塞后续插件与本行完成，直到该插件的 `is_complete` 返回 `true`。

use crate::script::ast::{Choice, Conversation, Line};

/// 插件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginPriority(pub i32);

impl PluginPriority {
    pub const EARLY: Self = Self(0);
    pub const DEFAULT: Self = Self(100);
    pub const LATE: Self = Self(200);
}

impl Default for PluginPriority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// `on_line_display` 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PluginResult {
    /// 继续执行下一个插件
    #[default]
    Continue,
    /// 等待本插件完成
    WaitForCompletion,
}

/// 插件上下文
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    /// 当前对话
    pub conversation: &'a Conversation,
    /// 当前行（正在播放的副本）
    pub line: &'a Line,
    /// 当前行索引
    pub line_index: usize,
    /// 引擎是否暂停
    pub paused: bool,
}

impl PluginContext<'_> {
    /// 读取当前行的元数据
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.line.content.metadata(key)
    }

    /// 当前行是否有该元数据
    pub fn has_metadata(&self, key: &str) -> bool {
        self.line.content.has_metadata(key)
    }
}

/// 引擎插件 trait
///
/// 所有钩子都有空默认实现，插件只需覆盖关心的部分。
#[allow(unused_variables)]
pub trait EnginePlugin {
    /// 插件名（用于日志）
    fn name(&self) -> &str {
        "plugin"
    }

    /// 优先级
    fn priority(&self) -> PluginPriority {
        PluginPriority::DEFAULT
    }

    /// 等待中的插件是否已完成
    fn is_complete(&self) -> bool {
        true
    }

    fn on_conversation_start(&mut self, conversation: &Conversation) {}

    fn on_conversation_end(&mut self, conversation: &Conversation) {}

    fn on_before_line_display(&mut self, ctx: &PluginContext<'_>) {}

    /// 行已交给视图
    fn on_line_display(&mut self, ctx: &PluginContext<'_>) -> PluginResult {
        PluginResult::Continue
    }

    fn on_line_complete(&mut self, ctx: &PluginContext<'_>) {}

    fn on_pause(&mut self) {}

    fn on_resume(&mut self) {}

    fn on_before_choices_display(&mut self, conversation: &Conversation, choices: &[Choice]) {}

    fn on_choice_selected(&mut self, conversation: &Conversation, index: usize, choice: &Choice) {}

    /// 视图被清空
    fn on_clear(&mut self) {}
}
