//! # MSP Runtime
//!
//! 对话脚本（MSpeaker 格式）的解析器与播放引擎。
//!
//! ## 架构概述
//!
//! `msp-runtime` 是纯逻辑核心，不依赖任何 IO 或渲染引擎。
//! 宿主通过 [`DialogueView`] 和 [`EnginePlugin`] 接入展示层：
//!
//! ```text
//! 对话文本 ──► Parser ──► Vec<Conversation>（只读对话图）
//!                               │
//! Host                          ▼            DialogueEngine
//!   │──── start / advance / select_choice ──►│
//!   │                                         │ tick()
//!   │◄─── set_view / display_choices ────────│
//!   │◄─── Waiting + EngineEvent ─────────────│
//! ```
//!
//! ## 核心类型
//!
//! - [`Conversation`]：解析后的对话图
//! - [`DialogueEngine`]：播放状态机
//! - [`VariableStore`]：变量仓库（由宿主显式持有）
//! - [`FunctionRegistry`]：内联调用的宿主函数
//! - [`Waiting`]：引擎的等待状态
//!
//! ## 使用示例
//!
//! ```ignore
//! use msp_runtime::{DialogueAsset, DialogueEngine, Waiting};
//!
//! let mut engine = DialogueEngine::new(view);
//! engine.variables_mut().set("player", "Alice");
//! engine.start(&DialogueAsset::new("intro", text), 0)?;
//!
//! loop {
//!     match engine.tick() {
//!         Waiting::Advance => { engine.advance_to_next_line(); }
//!         Waiting::Choice { .. } => engine.select_choice(read_choice())?,
//!         Waiting::Idle | Waiting::Halted => break,
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## 模块结构
//!
//! - [`script`]：对话图与解析器
//! - [`services`]：变量、条件求值、函数注册
//! - [`runtime`]：播放引擎
//! - [`state`]：播放状态与等待状态
//! - [`diagnostic`]：诊断与静态校验
//! - [`config`]：引擎配置
//! - [`error`]：错误类型定义

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod runtime;
pub mod script;
pub mod services;
pub mod state;

// 重导出核心类型
pub use config::EngineConfig;
pub use diagnostic::{Diagnostic, DiagnosticLevel, DiagnosticResult, validate_conversations};
pub use error::{MspError, MspResult, ParseError, RuntimeError};
pub use runtime::{
    DialogueEngine, DialogueView, EngineEvent, EnginePlugin, PluginContext, PluginPriority,
    PluginResult,
};
pub use script::{
    AnchoredChoice, Choice, Conversation, DialogueAsset, Line, LineContent, LineType, Parser,
};
pub use services::{
    ConditionEvaluator, EngineRequest, FunctionOutput, FunctionRegistry, InvocationContext,
    VariableChange, VariableStore,
};
pub use state::{PlaybackState, VarValue, Waiting};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // 验证所有公共类型都可以正常使用
        let _asset = DialogueAsset::new("main", "Hello");
        let _line = Line::normal(Some("Bob".to_string()), LineContent::text("Hi"));
        let _waiting = Waiting::Advance;
        let _state = PlaybackState::new();
        let _config = EngineConfig::default();

        let mut vars = VariableStore::new();
        vars.set("score", "5");
        assert!(ConditionEvaluator::new().evaluate("score == 5", &vars));
    }
}
