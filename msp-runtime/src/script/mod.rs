//! # Script 模块
//!
//! 对话脚本相关功能，包括对话图定义和解析器实现。
//!
//! ## 模块结构
//!
//! - [`ast`]：对话图定义
//! - [`parser`]：行分类 + 结构解析

pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::Parser;
