//! # Variables 模块
//!
//! 字符串键值的变量仓库。
//!
//! 解析期的 `$name` 替换、运行期的条件求值、循环次数和调用参数都从这里读取。
//! 仓库由宿主显式创建并持有（每个引擎/会话一个），不存在全局静态实例。

use std::collections::HashMap;

use tracing::debug;

use crate::state::VarValue;

/// 变量变更通知
#[derive(Debug, Clone, PartialEq)]
pub struct VariableChange {
    /// 变量名（不含 `$`）
    pub key: String,
    /// 旧值
    pub old: Option<String>,
    /// 新值（`None` 表示被移除）
    pub new: Option<String>,
}

type Listener = Box<dyn FnMut(&VariableChange)>;

/// 变量仓库
#[derive(Default)]
pub struct VariableStore {
    values: HashMap<String, String>,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("values", &self.values)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// 规范化变量名：去空白、去掉前导 `$`
fn normalize_key(key: &str) -> Option<&str> {
    let key = key.trim();
    let key = key.strip_prefix('$').unwrap_or(key);
    (!key.is_empty()).then_some(key)
}

impl VariableStore {
    /// 创建空仓库
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅变更
    ///
    /// 回调在值写入之后同步触发，且仅在值确实发生变化时触发。
    pub fn subscribe(&mut self, listener: impl FnMut(&VariableChange) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// 设置变量
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let Some(key) = normalize_key(key) else {
            return;
        };
        let value = value.into();
        let old = self.values.insert(key.to_string(), value.clone());
        if old.as_deref() == Some(value.as_str()) {
            return;
        }
        debug!(key, value = %value, "变量已更新");
        self.notify(VariableChange {
            key: key.to_string(),
            old,
            new: Some(value),
        });
    }

    /// 移除变量
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = normalize_key(key)?;
        let old = self.values.remove(key)?;
        self.notify(VariableChange {
            key: key.to_string(),
            old: Some(old.clone()),
            new: None,
        });
        Some(old)
    }

    /// 清空所有变量（逐个通知）
    pub fn clear(&mut self) {
        let mut drained: Vec<(String, String)> = self.values.drain().collect();
        drained.sort();
        for (key, old) in drained {
            self.notify(VariableChange {
                key,
                old: Some(old),
                new: None,
            });
        }
    }

    /// 是否存在该变量
    pub fn contains(&self, key: &str) -> bool {
        normalize_key(key).is_some_and(|k| self.values.contains_key(k))
    }

    /// 读取原始字符串
    pub fn get_string(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key)?;
        self.values.get(key).map(String::as_str)
    }

    /// 读取整数，缺失或无法解析时返回默认值
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// 读取浮点数，缺失或无法解析时返回默认值
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get_string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// 读取布尔值（大小写不敏感），缺失或无法解析时返回默认值
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get_string(key).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// 读取带类型的值
    pub fn get_value(&self, key: &str) -> Option<VarValue> {
        self.get_string(key).map(VarValue::infer)
    }

    /// 遍历所有变量
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 变量数量
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn notify(&mut self, change: VariableChange) {
        for listener in &mut self.listeners {
            listener(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_set_and_get_string() {
        let mut vars = VariableStore::new();
        vars.set("name", "Alice");
        assert_eq!(vars.get_string("name"), Some("Alice"));
        assert_eq!(vars.get_string("$name"), Some("Alice"));
        assert_eq!(vars.get_string("missing"), None);
        assert_eq!(vars.get_string(""), None);
    }

    #[test]
    fn test_typed_getters() {
        let mut vars = VariableStore::new();
        vars.set("count", "42");
        vars.set("rate", "3.14");
        vars.set("flag", "True");

        assert_eq!(vars.get_int("count", 0), 42);
        assert_eq!(vars.get_int("missing", 10), 10);
        assert!((vars.get_float("rate", 0.0) - 3.14).abs() < 1e-9);
        assert!(vars.get_bool("flag", false));
        assert!(!vars.get_bool("missing", false));
    }

    #[test]
    fn test_get_value_infers_type() {
        let mut vars = VariableStore::new();
        vars.set("i", "1");
        vars.set("f", "1.5");
        vars.set("b", "true");
        vars.set("s", "hello");

        assert_eq!(vars.get_value("i"), Some(VarValue::Int(1)));
        assert_eq!(vars.get_value("f"), Some(VarValue::Float(1.5)));
        assert_eq!(vars.get_value("b"), Some(VarValue::Bool(true)));
        assert_eq!(
            vars.get_value("$s"),
            Some(VarValue::String("hello".to_string()))
        );
    }

    #[test]
    fn test_change_notification_only_on_change() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();

        let mut vars = VariableStore::new();
        vars.subscribe(move |change| sink.borrow_mut().push(change.clone()));

        vars.set("hp", "10");
        vars.set("hp", "10");
        vars.set("hp", "7");
        vars.remove("hp");
        vars.remove("hp");

        let log = log.borrow();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].old, None);
        assert_eq!(log[1].old.as_deref(), Some("10"));
        assert_eq!(log[1].new.as_deref(), Some("7"));
        assert_eq!(log[2].new, None);
    }

    #[test]
    fn test_listener_sees_stored_value() {
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();

        let mut vars = VariableStore::new();
        vars.subscribe(move |change| *sink.borrow_mut() = change.new.clone());
        vars.set("mood", "happy");

        assert_eq!(seen.borrow().as_deref(), Some("happy"));
        assert_eq!(vars.get_string("mood"), Some("happy"));
    }

    #[test]
    fn test_clear_notifies_each_key() {
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();

        let mut vars = VariableStore::new();
        vars.set("a", "1");
        vars.set("b", "2");
        vars.subscribe(move |_| *sink.borrow_mut() += 1);
        vars.clear();

        assert!(vars.is_empty());
        assert_eq!(*count.borrow(), 2);
    }
}
