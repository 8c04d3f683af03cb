//! # Config 模块
//!
//! 引擎配置。

use serde::{Deserialize, Serialize};

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 单次推进中透明控制流的最大步数，超出即视为失控并停机
    #[serde(default = "default_max_control_steps")]
    pub max_control_steps: usize,

    /// 开始播放时是否按优先级重排插件
    #[serde(default = "default_sort_plugins_on_start")]
    pub sort_plugins_on_start: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_control_steps: default_max_control_steps(),
            sort_plugins_on_start: default_sort_plugins_on_start(),
        }
    }
}

fn default_max_control_steps() -> usize {
    10_000
}

fn default_sort_plugins_on_start() -> bool {
    true
}

impl EngineConfig {
    /// 从 JSON 解析，缺省字段使用默认值
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_control_steps, 10_000);
        assert!(config.sort_plugins_on_start);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "max_control_steps": 50 }"#).unwrap();
        assert_eq!(config.max_control_steps, 50);
        assert!(config.sort_plugins_on_start);
    }
}
