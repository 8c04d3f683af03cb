//! # 辅助解析函数
//!
//! 句子处理（内联调用 / 元数据提取、变量替换）与参数解析。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::script::ast::{ArgumentKind, FunctionArgument, FunctionInvocation, InlineInvocation};
use crate::services::VariableStore;
use crate::state::VarValue;

fn variable_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\$([A-Za-z0-9_]+)").expect("variable regex must compile"))
}

fn variable_argument_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\$([A-Za-z0-9_]+)$").expect("variable argument regex must compile")
    })
}

fn inline_call_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{(.+?)\}\}").expect("inline call regex must compile"))
}

fn invocation_body_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$")
            .expect("invocation body regex must compile")
    })
}

/// 去掉成对的单/双引号
pub fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// 拆分 `##` 元数据段
///
/// 返回 `(正文, 元数据段)`，元数据段从第一个 `##` 一直到行尾。
pub fn split_metadata(raw: &str) -> (&str, Option<&str>) {
    match raw.find("##") {
        Some(pos) => (&raw[..pos], Some(&raw[pos + 2..])),
        None => (raw, None),
    }
}

/// 解析元数据 token
///
/// `key:value` 在第一个冒号处拆分，单独的 `flag` 映射为自身；重复键先写入者优先。
pub fn parse_metadata(section: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for token in section.split_whitespace() {
        let token = token.trim_start_matches('#');
        let (key, value) = match token.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (token, token),
        };
        if key.is_empty() {
            continue;
        }
        metadata
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    metadata
}

/// 按逗号拆分参数（引号内的逗号不拆分）
pub fn split_arguments(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in s.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ',' => {
                args.push(current.trim().to_string());
                current.clear();
            }
            None => current.push(c),
        }
    }
    args.push(current.trim().to_string());
    args
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float_literal(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    match body.split_once('.') {
        Some((int, frac)) => is_integer_literal(int) && is_integer_literal(frac),
        None => false,
    }
}

/// 解析单个参数并推断类型
///
/// 推断顺序：`$name` → 布尔 → 整数 → 浮点 → 带引号字符串 → 原样字符串。
pub fn parse_argument(raw: &str) -> FunctionArgument {
    let raw = raw.trim();
    let (kind, value) = if let Some(caps) = variable_argument_regex().captures(raw) {
        (ArgumentKind::Variable, VarValue::String(caps[1].to_string()))
    } else if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        (
            ArgumentKind::Boolean,
            VarValue::Bool(raw.eq_ignore_ascii_case("true")),
        )
    } else if let Some(i) = is_integer_literal(raw)
        .then(|| raw.parse::<i64>().ok())
        .flatten()
    {
        (ArgumentKind::Integer, VarValue::Int(i))
    } else if let Some(f) = is_float_literal(raw)
        .then(|| raw.parse::<f64>().ok())
        .flatten()
    {
        (ArgumentKind::Float, VarValue::Float(f))
    } else {
        (
            ArgumentKind::String,
            VarValue::String(strip_quotes(raw).to_string()),
        )
    };

    FunctionArgument {
        raw: raw.to_string(),
        kind,
        value,
    }
}

/// 解析调用体：`Name` 或 `Name(args)`
pub fn parse_invocation(body: &str) -> Option<FunctionInvocation> {
    let caps = invocation_body_regex().captures(body)?;
    let arguments = caps
        .get(2)
        .map(|args| {
            split_arguments(args.as_str())
                .iter()
                .map(|a| parse_argument(a))
                .collect()
        })
        .unwrap_or_default();
    Some(FunctionInvocation {
        name: caps[1].to_string(),
        arguments,
    })
}

/// 变量替换
///
/// 单次扫描，不会重新扫描替换结果；未解析的变量保留原文，并记入 `unresolved`。
pub fn substitute_variables(
    text: &str,
    vars: &VariableStore,
    unresolved: &mut Vec<String>,
) -> String {
    variable_regex()
        .replace_all(text, |caps: &Captures| match vars.get_string(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                unresolved.push(caps[1].to_string());
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// 单个物理行处理后的句子片段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SentencePart {
    /// 可见文本（已去除首尾空白）
    pub text: String,
    /// 内联调用，偏移相对于 `text`
    pub invocations: Vec<InlineInvocation>,
    /// 元数据
    pub metadata: BTreeMap<String, String>,
    /// 无法识别、原样保留在文本里的 `{{...}}`
    pub malformed: Vec<String>,
}

impl SentencePart {
    /// 是否没有任何内容
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.invocations.is_empty() && self.metadata.is_empty()
    }
}

/// 处理一行句子文本
///
/// 1. 剥离 `##` 元数据
/// 2. 提取 `{{...}}` 内联调用，记录其在可见文本中的字符偏移
/// 3. 对可见文本做变量替换（调用体不参与替换）
/// 4. 去除首尾空白，并相应平移/截断偏移
pub fn process_sentence(
    raw: &str,
    vars: &VariableStore,
    unresolved: &mut Vec<String>,
) -> SentencePart {
    let (body, meta) = split_metadata(raw);
    let mut part = SentencePart {
        metadata: meta.map(parse_metadata).unwrap_or_default(),
        ..SentencePart::default()
    };

    let mut text = String::new();
    let mut len = 0usize;
    let mut last = 0usize;

    for caps in inline_call_regex().captures_iter(body) {
        let Some(whole) = caps.get(0) else {
            continue;
        };

        let segment = substitute_variables(&body[last..whole.start()], vars, unresolved);
        len += segment.chars().count();
        text.push_str(&segment);

        match parse_invocation(&caps[1]) {
            Some(invocation) => part.invocations.push(InlineInvocation {
                offset: len,
                invocation,
            }),
            None => {
                part.malformed.push(whole.as_str().to_string());
                len += whole.as_str().chars().count();
                text.push_str(whole.as_str());
            }
        }
        last = whole.end();
    }
    text.push_str(&substitute_variables(&body[last..], vars, unresolved));

    let leading = text.chars().take_while(|c| c.is_whitespace()).count();
    part.text = text.trim().to_string();
    let visible = part.text.chars().count();
    for inline in &mut part.invocations {
        inline.offset = inline.offset.saturating_sub(leading).min(visible);
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_arguments_respects_quotes() {
        assert_eq!(
            split_arguments(r#"a, "b, c", 'd,e' , 3"#),
            vec!["a", r#""b, c""#, "'d,e'", "3"]
        );
        assert!(split_arguments("   ").is_empty());
        assert_eq!(split_arguments("x,"), vec!["x", ""]);
    }

    #[test]
    fn test_parse_argument_kinds() {
        let arg = parse_argument(" $hp ");
        assert_eq!(arg.kind, ArgumentKind::Variable);
        assert_eq!(arg.value, VarValue::String("hp".to_string()));

        assert_eq!(parse_argument("TRUE").value, VarValue::Bool(true));
        assert_eq!(parse_argument("-12").value, VarValue::Int(-12));
        assert_eq!(parse_argument("0.25").kind, ArgumentKind::Float);
        assert_eq!(
            parse_argument("'quoted'").value,
            VarValue::String("quoted".to_string())
        );

        let raw = parse_argument("1.2.3");
        assert_eq!(raw.kind, ArgumentKind::String);
        assert_eq!(raw.value, VarValue::String("1.2.3".to_string()));
    }

    #[test]
    fn test_parse_invocation_forms() {
        let bare = parse_invocation("PlayerName").unwrap();
        assert_eq!(bare.name, "PlayerName");
        assert!(bare.arguments.is_empty());

        let call = parse_invocation(" Give(\"sword\", 2) ").unwrap();
        assert_eq!(call.name, "Give");
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(call.arguments[1].value, VarValue::Int(2));

        assert!(parse_invocation("not a call").is_none());
    }

    #[test]
    fn test_parse_metadata_first_write_wins() {
        let meta = parse_metadata(" mood:happy voice:low mood:sad flag ");
        assert_eq!(meta.get("mood").map(String::as_str), Some("happy"));
        assert_eq!(meta.get("voice").map(String::as_str), Some("low"));
        assert_eq!(meta.get("flag").map(String::as_str), Some("flag"));
    }

    #[test]
    fn test_substitute_is_single_pass() {
        let mut vars = VariableStore::new();
        vars.set("a", "$b");
        vars.set("b", "never");
        let mut unresolved = Vec::new();

        let out = substitute_variables("x=$a y=$ghost", &vars, &mut unresolved);
        assert_eq!(out, "x=$b y=$ghost");
        assert_eq!(unresolved, vec!["ghost"]);
    }

    #[test]
    fn test_process_sentence_offsets_in_visible_text() {
        let vars = VariableStore::new();
        let mut unresolved = Vec::new();

        let part = process_sentence(
            "  Hello {{PlayerName}}, welcome{{Wave(2)}}! ##mood:happy",
            &vars,
            &mut unresolved,
        );
        assert_eq!(part.text, "Hello , welcome!");
        assert_eq!(part.invocations.len(), 2);
        assert_eq!(part.invocations[0].offset, 6);
        assert_eq!(part.invocations[0].invocation.name, "PlayerName");
        assert_eq!(part.invocations[1].offset, 15);
        assert_eq!(part.metadata.get("mood").map(String::as_str), Some("happy"));
    }

    #[test]
    fn test_process_sentence_substitution_shifts_offsets() {
        let mut vars = VariableStore::new();
        vars.set("name", "Alice");
        let mut unresolved = Vec::new();

        let part = process_sentence("$name{{Smile}} waves", &vars, &mut unresolved);
        assert_eq!(part.text, "Alice waves");
        assert_eq!(part.invocations[0].offset, 5);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_process_sentence_keeps_invocation_body_raw() {
        let mut vars = VariableStore::new();
        vars.set("hp", "10");
        let mut unresolved = Vec::new();

        let part = process_sentence("HP {{Show($hp)}}", &vars, &mut unresolved);
        assert_eq!(part.text, "HP");
        assert_eq!(part.invocations[0].offset, 2);
        assert_eq!(
            part.invocations[0].invocation.arguments[0].kind,
            ArgumentKind::Variable
        );
    }

    #[test]
    fn test_process_sentence_invocation_only() {
        let vars = VariableStore::new();
        let mut unresolved = Vec::new();

        let part = process_sentence("{{Shake}}", &vars, &mut unresolved);
        assert!(part.text.is_empty());
        assert_eq!(part.invocations.len(), 1);
        assert_eq!(part.invocations[0].offset, 0);
        assert!(!part.is_empty());
    }
}
