//! # Functions 模块
//!
//! 宿主函数注册表与内联调用执行。
//!
//! 宿主在启动时通过 [`FunctionRegistry::register`] 显式注册回调；
//! 播放到某行时，引擎按偏移升序执行该行的内联调用。
//! 返回文本的回调会把结果插入到调用位置，其余回调只产生副作用。

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::script::ast::{ArgumentKind, InlineInvocation, LineContent};
use crate::services::VariableStore;
use crate::state::VarValue;

/// 回调返回值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionOutput {
    /// 插入到文本中的内容
    Text(String),
    /// 纯副作用
    None,
}

impl From<String> for FunctionOutput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FunctionOutput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<()> for FunctionOutput {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Option<String>> for FunctionOutput {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::None, Self::Text)
    }
}

/// 回调发给引擎的请求，在本行调用全部执行完后依次处理
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    Pause,
    Resume,
    Stop,
    JumpTo(String),
}

/// 回调执行上下文
pub struct InvocationContext<'a> {
    variables: &'a mut VariableStore,
    conversation: &'a str,
    line_index: usize,
    requests: Vec<EngineRequest>,
}

impl<'a> InvocationContext<'a> {
    /// 创建上下文
    pub fn new(variables: &'a mut VariableStore, conversation: &'a str, line_index: usize) -> Self {
        Self {
            variables,
            conversation,
            line_index,
            requests: Vec::new(),
        }
    }

    /// 变量仓库
    pub fn variables(&self) -> &VariableStore {
        self.variables
    }

    /// 可写的变量仓库
    pub fn variables_mut(&mut self) -> &mut VariableStore {
        self.variables
    }

    /// 当前对话名
    pub fn conversation(&self) -> &str {
        self.conversation
    }

    /// 当前行索引
    pub fn line_index(&self) -> usize {
        self.line_index
    }

    /// 向引擎发出请求
    pub fn request(&mut self, request: EngineRequest) {
        self.requests.push(request);
    }

    /// 取走累积的请求
    pub fn take_requests(&mut self) -> Vec<EngineRequest> {
        std::mem::take(&mut self.requests)
    }
}

type Callback = Box<dyn FnMut(&mut InvocationContext<'_>, &[VarValue]) -> FunctionOutput>;

struct RegisteredFunction {
    arity: Option<usize>,
    callback: Callback,
}

/// 函数注册表
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

impl FunctionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册可变参数函数（同名覆盖）
    pub fn register<F, R>(&mut self, name: impl Into<String>, callback: F)
    where
        F: FnMut(&mut InvocationContext<'_>, &[VarValue]) -> R + 'static,
        R: Into<FunctionOutput>,
    {
        self.insert(name.into(), None, callback);
    }

    /// 注册固定参数个数的函数，参数个数不符时跳过调用
    pub fn register_with_arity<F, R>(&mut self, name: impl Into<String>, arity: usize, callback: F)
    where
        F: FnMut(&mut InvocationContext<'_>, &[VarValue]) -> R + 'static,
        R: Into<FunctionOutput>,
    {
        self.insert(name.into(), Some(arity), callback);
    }

    fn insert<F, R>(&mut self, name: String, arity: Option<usize>, mut callback: F)
    where
        F: FnMut(&mut InvocationContext<'_>, &[VarValue]) -> R + 'static,
        R: Into<FunctionOutput>,
    {
        debug!(function = %name, ?arity, "注册函数");
        self.functions.insert(
            name,
            RegisteredFunction {
                arity,
                callback: Box::new(move |ctx, args| callback(ctx, args).into()),
            },
        );
    }

    /// 注销函数
    pub fn unregister(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// 是否已注册
    pub fn is_registered(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// 已注册的函数名（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// 调用单个内联调用
    ///
    /// 函数不存在、参数个数不符、变量参数缺失时记录警告并返回 `None`。
    pub fn invoke(
        &mut self,
        inline: &InlineInvocation,
        ctx: &mut InvocationContext<'_>,
    ) -> Option<FunctionOutput> {
        let invocation = &inline.invocation;
        let Some(function) = self.functions.get_mut(&invocation.name) else {
            warn!(function = %invocation.name, "内联调用的函数未注册，已跳过");
            return None;
        };

        if let Some(arity) = function.arity {
            if arity != invocation.arguments.len() {
                warn!(
                    function = %invocation.name,
                    expected = arity,
                    actual = invocation.arguments.len(),
                    "内联调用参数个数不符，已跳过"
                );
                return None;
            }
        }

        let mut args = Vec::with_capacity(invocation.arguments.len());
        for arg in &invocation.arguments {
            if arg.kind != ArgumentKind::Variable {
                args.push(arg.value.clone());
                continue;
            }
            match ctx.variables().get_value(&arg.raw) {
                Some(value) => args.push(value),
                None => {
                    warn!(
                        function = %invocation.name,
                        variable = %arg.raw,
                        "内联调用的变量参数未定义，已跳过"
                    );
                    return None;
                }
            }
        }

        Some((function.callback)(ctx, &args))
    }

    /// 按偏移升序执行一行的全部内联调用，把文本结果插入 `content.text`
    ///
    /// 每次插入后调用 `on_splice`（引擎借此立即重新显示该行）。
    /// 插入会让后续调用的插入点顺延，插入点超出文本长度时截断到末尾。
    pub fn invoke_all(
        &mut self,
        content: &mut LineContent,
        ctx: &mut InvocationContext<'_>,
        mut on_splice: impl FnMut(&LineContent),
    ) -> usize {
        let mut ordered: Vec<InlineInvocation> = content.invocations.clone();
        ordered.sort_by_key(|inline| inline.offset);

        let mut inserted = 0usize;
        let mut splices = 0usize;
        for inline in &ordered {
            let Some(FunctionOutput::Text(text)) = self.invoke(inline, ctx) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }

            let at = (inline.offset + inserted).min(content.char_len());
            let byte = content
                .text
                .char_indices()
                .nth(at)
                .map_or(content.text.len(), |(i, _)| i);
            content.text.insert_str(byte, &text);
            inserted += text.chars().count();
            splices += 1;
            on_splice(content);
        }
        splices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::FunctionInvocation;
    use crate::script::parser::parse_invocation;

    fn inline(offset: usize, body: &str) -> InlineInvocation {
        InlineInvocation {
            offset,
            invocation: parse_invocation(body).unwrap(),
        }
    }

    #[test]
    fn test_splice_offsets_shift_by_inserted_length() {
        let mut registry = FunctionRegistry::new();
        registry.register("Abc", |_: &mut InvocationContext<'_>, _: &[VarValue]| "abc");

        let mut content = LineContent::text("0123456789XYZ");
        content.invocations = vec![inline(10, "Abc"), inline(5, "Abc")];

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        let mut snapshots = Vec::new();
        let count = registry.invoke_all(&mut content, &mut ctx, |c| snapshots.push(c.text.clone()));

        assert_eq!(count, 2);
        assert_eq!(snapshots[0], "01234abc56789XYZ");
        assert_eq!(content.text, "01234abc56789abcXYZ");
    }

    #[test]
    fn test_offset_clamped_to_text_end() {
        let mut registry = FunctionRegistry::new();
        registry.register("Tail", |_: &mut InvocationContext<'_>, _: &[VarValue]| "!");

        let mut content = LineContent::text("Hi");
        content.invocations = vec![inline(40, "Tail")];

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        registry.invoke_all(&mut content, &mut ctx, |_| {});
        assert_eq!(content.text, "Hi!");
    }

    #[test]
    fn test_multibyte_text_is_spliced_by_char() {
        let mut registry = FunctionRegistry::new();
        registry.register("Name", |_: &mut InvocationContext<'_>, _: &[VarValue]| "玩家");

        let mut content = LineContent::text("你好，！");
        content.invocations = vec![inline(3, "Name")];

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        registry.invoke_all(&mut content, &mut ctx, |_| {});
        assert_eq!(content.text, "你好，玩家！");
    }

    #[test]
    fn test_side_effect_and_variable_arguments() {
        let mut registry = FunctionRegistry::new();
        registry.register("Add", |ctx: &mut InvocationContext<'_>, args: &[VarValue]| {
            let total: i64 = args.iter().filter_map(VarValue::as_int).sum();
            ctx.variables_mut().set("total", total.to_string());
        });

        let mut content = LineContent::text("sum");
        content.invocations = vec![inline(3, "Add($a, 2)")];

        let mut vars = VariableStore::new();
        vars.set("a", "40");
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        let count = registry.invoke_all(&mut content, &mut ctx, |_| {});

        assert_eq!(count, 0);
        assert_eq!(content.text, "sum");
        assert_eq!(vars.get_int("total", 0), 42);
    }

    #[test]
    fn test_missing_variable_skips_invocation() {
        let mut registry = FunctionRegistry::new();
        registry.register("Echo", |_: &mut InvocationContext<'_>, args: &[VarValue]| {
            args[0].to_string()
        });

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        assert_eq!(registry.invoke(&inline(0, "Echo($ghost)"), &mut ctx), None);
    }

    #[test]
    fn test_arity_mismatch_and_unknown_function() {
        let mut registry = FunctionRegistry::new();
        registry.register_with_arity("Pair", 2, |_: &mut InvocationContext<'_>, _: &[VarValue]| {
            "pair"
        });

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 0);
        assert_eq!(registry.invoke(&inline(0, "Pair(1)"), &mut ctx), None);
        assert_eq!(
            registry.invoke(&inline(0, "Pair(1, 2)"), &mut ctx),
            Some(FunctionOutput::Text("pair".to_string()))
        );

        let unknown = InlineInvocation {
            offset: 0,
            invocation: FunctionInvocation {
                name: "Nope".to_string(),
                arguments: Vec::new(),
            },
        };
        assert_eq!(registry.invoke(&unknown, &mut ctx), None);
    }

    #[test]
    fn test_requests_are_collected() {
        let mut registry = FunctionRegistry::new();
        registry.register("Leave", |ctx: &mut InvocationContext<'_>, _: &[VarValue]| {
            ctx.request(EngineRequest::JumpTo("Exit".to_string()));
        });

        let mut vars = VariableStore::new();
        let mut ctx = InvocationContext::new(&mut vars, "Main", 4);
        registry.invoke(&inline(0, "Leave"), &mut ctx);

        assert_eq!(ctx.line_index(), 4);
        assert_eq!(
            ctx.take_requests(),
            vec![EngineRequest::JumpTo("Exit".to_string())]
        );
    }

    #[test]
    fn test_registry_bookkeeping() {
        let mut registry = FunctionRegistry::new();
        registry.register("B", |_: &mut InvocationContext<'_>, _: &[VarValue]| {});
        registry.register("A", |_: &mut InvocationContext<'_>, _: &[VarValue]| {});
        assert_eq!(registry.names(), vec!["A", "B"]);
        assert!(registry.unregister("A"));
        assert!(!registry.is_registered("A"));
    }
}
