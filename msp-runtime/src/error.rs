//! # Error 模块
//!
//! 定义 msp-runtime 中使用的错误类型。
//!
//! 只有“结构上不可能继续”的情况才会以 `Err` 返回：
//! 格式错误的对话语法一律降级为诊断（见 [`crate::diagnostic`]），
//! 播放过程中的死路（越界索引、悬空 Goto）则让引擎进入停机状态。

use thiserror::Error;

/// 解析错误（致命）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// 输入源为空（null source）
    #[error("对话源 '{source_id}' 没有内容")]
    MissingSource { source_id: String },

    /// 解析后没有任何对话
    #[error("对话源 '{source_id}' 未解析出任何对话")]
    NoConversations { source_id: String },
}

/// 运行时错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// 起始索引越界
    #[error("起始对话索引 {index} 越界，共有 {count} 段对话")]
    StartIndexOutOfRange { index: usize, count: usize },

    /// 尚未解析任何对话
    #[error("尚未解析任何对话")]
    NothingParsed,

    /// 对话未找到
    #[error("对话 '{name}' 未找到")]
    ConversationNotFound { name: String },

    /// 无效的选项索引
    #[error("无效的选项索引 {index}，有效范围是 0..{max}")]
    InvalidChoiceIndex { index: usize, max: usize },

    /// 没有正在播放的对话
    #[error("当前没有正在播放的对话")]
    NoActiveConversation,
}

/// msp-runtime 统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MspError {
    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),

    /// 运行时错误
    #[error("运行时错误: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Result 类型别名
pub type MspResult<T> = Result<T, MspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = RuntimeError::ConversationNotFound {
            name: "Vault".to_string(),
        };
        assert!(err.to_string().contains("Vault"));

        let err: MspError = ParseError::NoConversations {
            source_id: "intro".to_string(),
        }
        .into();
        assert!(matches!(err, MspError::Parse(_)));
        assert!(err.to_string().contains("intro"));
    }
}
