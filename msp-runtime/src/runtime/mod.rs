//! # Runtime 模块
//!
//! 对话播放引擎，负责控制流解析、行展示与宿主交互。
//!
//! ## 模块结构
//!
//! - [`engine`]：播放状态机
//! - [`executor`]：控制流行的透明解析
//! - [`plugin`]：插件钩子
//! - [`view`]：宿主视图抽象

pub mod engine;
pub mod executor;
pub mod plugin;
pub mod view;

pub use engine::{DialogueEngine, EngineEvent};
pub use executor::{Executor, Reanchor, Step, resolve_loop_count};
pub use plugin::{EnginePlugin, PluginContext, PluginPriority, PluginResult};
pub use view::DialogueView;
