//! # Config 模块
//!
//! 命令行工具配置（`msp.json`）。
//!
//! ## 配置优先级
//!
//! 1. 命令行参数（最高）
//! 2. 配置文件 (msp.json)
//! 3. 默认值（最低）

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 支持的日志级别
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// 命令行工具配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// `check` 未指定路径时扫描的目录
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// 对话脚本扩展名（不含点）
    #[serde(default = "default_extension")]
    pub extension: String,

    /// 日志级别（`-v` 会覆盖为 debug）
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 变量仓库的初始内容
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// `play` 默认开始的对话名
    #[serde(default)]
    pub start_conversation: Option<String>,
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_extension() -> String {
    "msp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            extension: default_extension(),
            log_level: default_log_level(),
            variables: BTreeMap::new(),
            start_conversation: None,
        }
    }
}

impl CliConfig {
    /// 从文件加载配置
    ///
    /// 文件不存在或解析失败时使用默认配置。
    /// 此时日志订阅器尚未安装，警告直接写到 stderr。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("⚠️ 配置文件解析失败: {}，使用默认配置", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("⚠️ 配置文件读取失败: {}，使用默认配置", e);
                Self::default()
            }
        }
    }

    /// 保存配置到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))?;

        fs::write(path, json).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let extension = self.extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "extension 不能为空".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "未知的日志级别: {}（可选: {}）",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    /// 规范化后的扩展名（去掉前导点）
    pub fn extension(&self) -> &str {
        self.extension.trim().trim_start_matches('.')
    }
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 序列化失败
    SerializationFailed(String),
    /// IO 错误
    IoError(String),
    /// 验证失败
    ValidationFailed(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SerializationFailed(e) => write!(f, "配置序列化失败: {}", e),
            ConfigError::IoError(e) => write!(f, "配置 IO 错误: {}", e),
            ConfigError::ValidationFailed(e) => write!(f, "配置验证失败: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
