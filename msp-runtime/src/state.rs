//! # State 模块
//!
//! 定义播放引擎的运行时状态和等待模型。
//!
//! ## 设计原则
//!
//! - 所有状态必须**显式建模**
//! - 所有状态必须**可序列化**
//! - 不允许隐式全局状态

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 等待原因
///
/// 引擎在推进过程中只会因为以下几类原因停下来。
/// Host 根据此状态决定该做什么：轮询 `tick()`、调用 `resume()`、
/// 让玩家选择，或者等待下一次 `advance_to_next_line()`。
///
/// # 状态转换
///
/// ```text
/// Idle        -> 没有正在播放的对话
/// Plugin      -> 某个插件请求等待完成，tick() 轮询其 is_complete()
/// View        -> 视图仍在展示效果，tick() 轮询 is_still_displaying()
/// Resume      -> 已暂停，等待 resume()
/// Choice      -> 已展示选项，等待 select_choice() / jump_to()
/// Advance     -> 当前行展示完毕，等待 advance_to_next_line()
/// Halted      -> 播放出错停机，需要 start()/switch_conversation() 重启
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waiting {
    /// 没有正在播放的对话
    Idle,

    /// 等待插件完成
    ///
    /// `index` 是插件在优先级排序后的位置
    Plugin { index: usize },

    /// 等待视图完成展示
    View,

    /// 等待恢复
    Resume,

    /// 等待玩家选择
    Choice { count: usize },

    /// 等待推进到下一行
    Advance,

    /// 播放停机
    Halted,
}

impl Waiting {
    /// 是否阻塞在引擎内部（Host 需要继续 tick 或处理暂停/选项）
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Self::Plugin { .. } | Self::View | Self::Resume | Self::Choice { .. }
        )
    }
}

impl Default for Waiting {
    fn default() -> Self {
        Self::Idle
    }
}

/// 变量值
///
/// 变量仓库中只保存字符串，读取时按 int → float → bool → string 推断类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarValue {
    /// 整数
    Int(i64),
    /// 浮点数
    Float(f64),
    /// 字符串
    String(String),
    /// 布尔值
    Bool(bool),
}

impl VarValue {
    /// 从字符串推断类型
    pub fn infer(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Int(i);
        }
        if let Some(f) = parse_finite_float(raw) {
            return Self::Float(f);
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        Self::String(raw.to_string())
    }

    /// 作为数字读取（数字字符串同样视为数字）
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => parse_finite_float(s.trim()),
            Self::Bool(_) => None,
        }
    }

    /// 作为整数读取
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl std::fmt::Display for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

fn parse_finite_float(raw: &str) -> Option<f64> {
    if !raw.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// 播放状态
///
/// 对应状态机元组
/// `(当前对话, 行索引, 暂停, 行播放中, 循环计数, 条件跳过, 条件结束索引)`，
/// 另加停机标记。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// 当前对话在解析结果中的索引
    pub conversation: Option<usize>,
    /// 当前行索引
    pub line_index: usize,
    /// 是否暂停
    pub paused: bool,
    /// 当前行是否仍在播放（挂起中）
    pub line_playing: bool,
    /// 循环剩余次数（键为 LoopStart 行索引）
    pub loop_counters: BTreeMap<usize, i64>,
    /// 是否正在跳过条件块
    pub skipping_conditional: bool,
    /// 当前条件块的 EndIf 索引
    pub conditional_end_index: Option<usize>,
    /// 是否因错误停机
    pub halted: bool,
    /// 本段对话最近一次展示的普通行
    #[serde(default)]
    pub last_displayed: Option<usize>,
}

impl PlaybackState {
    /// 创建空状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 重置单段对话内的瞬时状态（保留 paused）
    pub fn reset_transient(&mut self) {
        self.line_index = 0;
        self.line_playing = false;
        self.loop_counters.clear();
        self.skipping_conditional = false;
        self.conditional_end_index = None;
        self.halted = false;
        self.last_displayed = None;
    }

    /// 清除条件跳过状态
    pub fn clear_skip(&mut self) {
        self.skipping_conditional = false;
    }

    /// 当前索引是否处于条件跳过区间内
    pub fn is_skipping(&self) -> bool {
        self.skipping_conditional
            && self
                .conditional_end_index
                .is_some_and(|end| self.line_index < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_var_value() {
        assert_eq!(VarValue::infer("42"), VarValue::Int(42));
        assert_eq!(VarValue::infer("-3"), VarValue::Int(-3));
        assert_eq!(VarValue::infer("1.5"), VarValue::Float(1.5));
        assert_eq!(VarValue::infer("TRUE"), VarValue::Bool(true));
        assert_eq!(VarValue::infer("false"), VarValue::Bool(false));
        assert_eq!(
            VarValue::infer("hello"),
            VarValue::String("hello".to_string())
        );
        assert_eq!(VarValue::infer("inf"), VarValue::String("inf".to_string()));
    }

    #[test]
    fn test_var_value_as_number() {
        assert_eq!(VarValue::Int(5).as_number(), Some(5.0));
        assert_eq!(VarValue::String(" 2.5 ".to_string()).as_number(), Some(2.5));
        assert_eq!(VarValue::Bool(true).as_number(), None);
        assert_eq!(VarValue::String("abc".to_string()).as_number(), None);
    }

    #[test]
    fn test_waiting_is_blocked() {
        assert!(!Waiting::Idle.is_blocked());
        assert!(!Waiting::Advance.is_blocked());
        assert!(!Waiting::Halted.is_blocked());
        assert!(Waiting::View.is_blocked());
        assert!(Waiting::Choice { count: 2 }.is_blocked());
    }

    #[test]
    fn test_skip_range() {
        let mut state = PlaybackState::new();
        state.skipping_conditional = true;
        state.conditional_end_index = Some(4);
        state.line_index = 2;
        assert!(state.is_skipping());
        state.line_index = 4;
        assert!(!state.is_skipping());
        state.clear_skip();
        state.line_index = 1;
        assert!(!state.is_skipping());
    }

    #[test]
    fn test_playback_state_serialization() {
        let mut state = PlaybackState::new();
        state.conversation = Some(1);
        state.line_index = 3;
        state.loop_counters.insert(0, 2);

        let json = serde_json::to_string(&state).unwrap();
        let deserialized: PlaybackState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
