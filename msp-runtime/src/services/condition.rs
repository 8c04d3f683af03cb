//! # Condition 模块
//!
//! 运行期条件求值。
//!
//! ## 语法
//!
//! ```text
//! left OP right      OP ∈ { ==, !=, >=, <=, >, < }
//! left, right        等价于 left == right
//! identifier         等价于 identifier == "true"
//! ```
//!
//! ## 缺失值语义
//!
//! - 两侧都缺失：`==` 为真，`!=` 为假，其余为假
//! - 只有一侧缺失：一律为假
//! - 两侧都是数字时按数值比较，否则按字符串比较

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

use crate::services::VariableStore;
use crate::state::VarValue;

const EPSILON: f64 = 1e-9;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    /// 查找顺序即优先级：两字符运算符先于单字符
    const SEARCH_ORDER: [(&'static str, CompareOp); 6] = [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ];

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
        }
    }
}

/// 解析后的条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    /// 左操作数（原文）
    pub left: String,
    /// 运算符
    pub op: CompareOp,
    /// 右操作数（原文，引号保留，求值时再去掉）
    pub right: String,
}

/// 解析条件表达式
pub fn parse_condition(expr: &str) -> Condition {
    let expr = expr.trim();

    if expr.matches(',').count() == 1 {
        if let Some((left, right)) = expr.split_once(',') {
            return Condition {
                left: left.trim().to_string(),
                op: CompareOp::Eq,
                right: right.trim().to_string(),
            };
        }
    }

    for (symbol, op) in CompareOp::SEARCH_ORDER {
        if let Some(pos) = expr.find(symbol).filter(|&pos| pos > 0) {
            return Condition {
                left: expr[..pos].trim().to_string(),
                op,
                right: expr[pos + symbol.len()..].trim().to_string(),
            };
        }
    }

    Condition {
        left: expr.to_string(),
        op: CompareOp::Eq,
        right: "true".to_string(),
    }
}

fn bare_variable_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\$[A-Za-z0-9_]+$").expect("bare variable regex must compile")
    })
}

fn is_quoted(raw: &str) -> bool {
    crate::script::parser::strip_quotes(raw).len() + 2 == raw.len()
}

/// 解析操作数
///
/// 顺序：带引号字面量 → 已存在的变量 → 缺失的 `$变量` → 左侧非数字裸词视为缺失变量 → 字面量。
fn resolve_operand(raw: &str, vars: &VariableStore, is_left: bool) -> Option<VarValue> {
    if is_quoted(raw) {
        return Some(VarValue::String(
            crate::script::parser::strip_quotes(raw).to_string(),
        ));
    }
    if let Some(value) = vars.get_value(raw) {
        return Some(value);
    }
    if raw.starts_with('$') {
        return None;
    }
    let literal = VarValue::infer(raw);
    if is_left && literal.as_number().is_none() {
        return None;
    }
    Some(literal)
}

fn as_bool(value: &VarValue) -> Option<bool> {
    match value {
        VarValue::Bool(b) => Some(*b),
        VarValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        VarValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// 比较两个已解析的值
pub fn compare_values(left: &VarValue, right: &VarValue, op: CompareOp) -> bool {
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        let ordering = if (l - r).abs() < EPSILON {
            Ordering::Equal
        } else if l < r {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        return op.accepts(ordering);
    }

    if let (Some(l), Some(r), CompareOp::Eq | CompareOp::NotEq) = (as_bool(left), as_bool(right), op)
    {
        return op.accepts(if l == r {
            Ordering::Equal
        } else {
            Ordering::Less
        });
    }

    // 非数字只比较相等性
    match op {
        CompareOp::Eq => left.to_string() == right.to_string(),
        CompareOp::NotEq => left.to_string() != right.to_string(),
        _ => false,
    }
}

/// 条件求值器
///
/// 无状态；变量从调用方传入的仓库读取。
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 创建求值器
    pub fn new() -> Self {
        Self
    }

    /// 求值条件表达式，空表达式为真
    pub fn evaluate(&self, expr: &str, vars: &VariableStore) -> bool {
        if expr.trim().is_empty() {
            return true;
        }

        let condition = parse_condition(expr);
        let left = resolve_operand(&condition.left, vars, true);
        let right = resolve_operand(&condition.right, vars, false);

        let result = match (&left, &right) {
            (None, None) => condition.op == CompareOp::Eq,
            (Some(l), Some(r)) => compare_values(l, r, condition.op),
            _ => false,
        };
        trace!(expr, ?left, ?right, result, "条件求值");
        result
    }

    /// 求值选项条件
    ///
    /// 单独的 `$name` 只检查变量是否存在，其余同 [`Self::evaluate`]。
    pub fn evaluate_choice(&self, expr: &str, vars: &VariableStore) -> bool {
        let expr = expr.trim();
        if bare_variable_regex().is_match(expr) {
            return vars.contains(expr);
        }
        self.evaluate(expr, vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> VariableStore {
        let mut vars = VariableStore::new();
        for (k, v) in pairs {
            vars.set(k, *v);
        }
        vars
    }

    #[test]
    fn test_parse_condition_forms() {
        let c = parse_condition("score >= 10");
        assert_eq!((c.left.as_str(), c.op, c.right.as_str()), ("score", CompareOp::Ge, "10"));

        let c = parse_condition("name, Bob");
        assert_eq!((c.left.as_str(), c.op, c.right.as_str()), ("name", CompareOp::Eq, "Bob"));

        let c = parse_condition("flag");
        assert_eq!((c.left.as_str(), c.op, c.right.as_str()), ("flag", CompareOp::Eq, "true"));

        let c = parse_condition("a != \"x\"");
        assert_eq!(c.op, CompareOp::NotEq);
        assert_eq!(c.right, "\"x\"");
    }

    #[test]
    fn test_numeric_comparisons() {
        let vars = store(&[("score", "5")]);
        let eval = ConditionEvaluator::new();

        assert!(!eval.evaluate("score >= 10", &vars));
        assert!(eval.evaluate("score >= 1", &vars));
        assert!(eval.evaluate("score == 5", &vars));
        assert!(eval.evaluate("$score < 5.5", &vars));
        assert!(eval.evaluate("score != 4", &vars));
        assert!(!eval.evaluate("score > 5", &vars));
        assert!(eval.evaluate("score <= 5", &vars));
    }

    #[test]
    fn test_string_comparisons() {
        let vars = store(&[("name", "Alice")]);
        let eval = ConditionEvaluator::new();

        assert!(eval.evaluate("name == \"Alice\"", &vars));
        assert!(eval.evaluate("name == 'Alice'", &vars));
        assert!(eval.evaluate("name, Alice", &vars));
        assert!(!eval.evaluate("name == Bob", &vars));
        assert!(eval.evaluate("name != Bob", &vars));
    }

    #[test]
    fn test_bare_identifier_means_true() {
        let vars = store(&[("door_open", "True"), ("lamp", "false")]);
        let eval = ConditionEvaluator::new();

        assert!(eval.evaluate("door_open", &vars));
        assert!(!eval.evaluate("lamp", &vars));
        assert!(!eval.evaluate("unknown", &vars));
    }

    #[test]
    fn test_missing_operands() {
        let vars = VariableStore::new();
        let eval = ConditionEvaluator::new();

        assert!(!eval.evaluate("missing == \"x\"", &vars));
        assert!(!eval.evaluate("missing != \"x\"", &vars));
        assert!(!eval.evaluate("missing > 1", &vars));
        assert!(eval.evaluate("$a == $b", &vars));
        assert!(!eval.evaluate("$a != $b", &vars));
        assert!(!eval.evaluate("$a >= $b", &vars));
    }

    #[test]
    fn test_non_numeric_ordering_is_false() {
        let vars = store(&[("name", "bob"), ("flag", "true")]);
        let eval = ConditionEvaluator::new();

        assert!(!eval.evaluate("name > alice", &vars));
        assert!(!eval.evaluate("name < alice", &vars));
        assert!(!eval.evaluate("name >= bob", &vars));
        assert!(!eval.evaluate("name <= bob", &vars));
        assert!(!eval.evaluate("flag >= true", &vars));
        assert!(!eval.evaluate("name > 3", &vars));
        assert!(eval.evaluate("name == bob", &vars));
        assert!(eval.evaluate("name != alice", &vars));
    }

    #[test]
    fn test_ordering_with_missing_operand() {
        let vars = store(&[("hp", "3")]);
        let eval = ConditionEvaluator::new();

        assert!(!eval.evaluate("$missing < 5", &vars));
        assert!(!eval.evaluate("hp > $missing", &vars));
        assert!(!eval.evaluate("$missing <= $other", &vars));
        assert!(!eval.evaluate("$missing >= $other", &vars));
    }

    #[test]
    fn test_empty_expression_is_true() {
        let vars = VariableStore::new();
        assert!(ConditionEvaluator::new().evaluate("  ", &vars));
    }

    #[test]
    fn test_variable_on_right_side() {
        let vars = store(&[("hp", "3"), ("max", "10")]);
        assert!(ConditionEvaluator::new().evaluate("hp < $max", &vars));
    }

    #[test]
    fn test_evaluate_choice() {
        let vars = store(&[("flag", "false")]);
        let eval = ConditionEvaluator::new();

        assert!(eval.evaluate_choice("$flag", &vars));
        assert!(!eval.evaluate_choice("$other", &vars));
        assert!(!eval.evaluate_choice("flag", &vars));
        assert!(eval.evaluate_choice("flag == false", &vars));
    }
}
