//! # Executor 模块
//!
//! 控制流解析：决定当前行是要展示，还是透明地跳到别处。
//!
//! ## 职责
//!
//! - 读取当前行（Label / Goto / Loop / If / Else / EndIf）
//! - 更新循环计数与条件状态
//! - 返回下一步去向，不接触视图

use tracing::{trace, warn};

use crate::script::ast::{Conversation, LineType};
use crate::services::{ConditionEvaluator, VariableStore};
use crate::state::PlaybackState;

/// 单步解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// 当前行是普通行，需要展示
    Display,
    /// 继续下一行
    Next,
    /// 跳转到指定行
    Jump(usize),
    /// 结束当前对话
    Stop,
    /// 停机（需要显式重启）
    Halt(String),
}

/// EndIf 回溯后的选项重锚定
///
/// 展示 `line` 时，锚定在 `end_if` 的选项一并参与选项门。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reanchor {
    pub line: usize,
    pub end_if: usize,
}

/// 控制流执行器
#[derive(Debug, Clone, Default)]
pub struct Executor {
    evaluator: ConditionEvaluator,
}

impl Executor {
    /// 创建新的执行器
    pub fn new() -> Self {
        Self::default()
    }

    /// 条件求值器
    pub fn evaluator(&self) -> &ConditionEvaluator {
        &self.evaluator
    }

    /// 解析 `state.line_index` 所在的行
    ///
    /// 调用方保证索引在范围内。
    pub fn step(
        &self,
        conversation: &Conversation,
        state: &mut PlaybackState,
        vars: &VariableStore,
        reanchor: &mut Option<Reanchor>,
    ) -> Step {
        let index = state.line_index;

        if state.is_skipping() {
            trace!(index, "条件跳过");
            return Step::Next;
        }

        let line = &conversation.lines[index];
        match line.line_type {
            LineType::Normal => Step::Display,

            LineType::Label => Step::Next,

            LineType::Goto => {
                let target = line.label_name.as_deref().unwrap_or_default();
                match conversation.label_index(target) {
                    Some(to) => Step::Jump(to),
                    None => Step::Halt(format!(
                        "Goto 目标标签不存在: '{target}' (对话 '{}', 行 {index})",
                        conversation.name
                    )),
                }
            }

            LineType::LoopStart => self.enter_loop(conversation, state, vars, index),

            LineType::LoopEnd => {
                let Some(info) = conversation.loop_ending_at(index) else {
                    return Step::Next;
                };
                let remaining = state.loop_counters.get(&info.start_index).copied();
                if remaining.is_some_and(|n| n > 0) {
                    Step::Jump(info.start_index)
                } else {
                    state.loop_counters.remove(&info.start_index);
                    Step::Next
                }
            }

            LineType::IfStart => {
                let Some(block) = conversation.conditional_blocks.get(&index) else {
                    warn!(index, conversation = %conversation.name, "IfStart 没有对应的条件块");
                    return Step::Next;
                };

                let passed = self.evaluator.evaluate(&block.expression, vars);
                trace!(index, expr = %block.expression, passed, "条件分支");
                state.clear_skip();
                state.conditional_end_index = block.end_if_index;

                if passed {
                    return Step::Next;
                }
                match (block.else_index, block.end_if_index) {
                    (Some(else_index), _) => Step::Jump(else_index + 1),
                    (None, Some(end_if)) => Step::Jump(end_if),
                    (None, None) => {
                        warn!(index, conversation = %conversation.name, "条件块未闭合，对话结束");
                        Step::Stop
                    }
                }
            }

            LineType::Else => match conversation.block_with_else(index) {
                Some(block) => match block.end_if_index {
                    Some(end_if) => Step::Jump(end_if),
                    None => {
                        warn!(index, conversation = %conversation.name, "条件块未闭合，对话结束");
                        Step::Stop
                    }
                },
                None => Step::Next,
            },

            LineType::EndIf => {
                state.clear_skip();
                let has_visible_choice = conversation.choices.iter().any(|anchored| {
                    anchored.anchor == index
                        && anchored.choice.condition_expression.as_deref().is_none_or(|expr| {
                            self.evaluator.evaluate_choice(expr, vars)
                        })
                });
                if !has_visible_choice {
                    return Step::Next;
                }
                let recent = state
                    .last_displayed
                    .filter(|&line| line < index && conversation.lines[line].is_text_line());
                match recent.or_else(|| conversation.previous_text_line(index)) {
                    Some(target) => {
                        *reanchor = Some(Reanchor {
                            line: target,
                            end_if: index,
                        });
                        Step::Jump(target)
                    }
                    None => Step::Next,
                }
            }
        }
    }

    fn enter_loop(
        &self,
        conversation: &Conversation,
        state: &mut PlaybackState,
        vars: &VariableStore,
        index: usize,
    ) -> Step {
        let Some(info) = conversation.lines[index].loop_info.as_ref() else {
            return Step::Next;
        };

        let remaining = state
            .loop_counters
            .entry(index)
            .or_insert_with(|| resolve_loop_count(&info.count_expr, vars));

        if *remaining > 0 {
            *remaining -= 1;
            trace!(index, remaining = *remaining, "进入循环体");
            return Step::Next;
        }

        state.loop_counters.remove(&index);
        match info.end_index {
            Some(end) => Step::Jump(end),
            None => Step::Next,
        }
    }
}

/// 解析循环次数：整数字面量或 `$变量`，无法解析时为 1
pub fn resolve_loop_count(expr: &str, vars: &VariableStore) -> i64 {
    let expr = expr.trim();
    if let Ok(count) = expr.parse::<i64>() {
        return count;
    }
    if expr.starts_with('$') {
        if let Some(count) = vars.get_value(expr).and_then(|v| v.as_int()) {
            return count;
        }
    }
    warn!(expr, "循环次数无法解析，按 1 次处理");
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Parser;

    fn parse(text: &str, vars: &VariableStore) -> Conversation {
        Parser::new()
            .parse_text("test", text, vars)
            .unwrap()
            .remove(0)
    }

    fn run(executor: &Executor, conversation: &Conversation, state: &mut PlaybackState) -> Step {
        let vars = VariableStore::new();
        executor.step(conversation, state, &vars, &mut None)
    }

    #[test]
    fn test_label_and_goto() {
        let conversation = parse("{{Label(top)}}\nHello\n{{Goto(top)}}", &VariableStore::new());
        let executor = Executor::new();
        let mut state = PlaybackState::new();

        assert_eq!(run(&executor, &conversation, &mut state), Step::Next);
        state.line_index = 1;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Display);
        state.line_index = 2;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Jump(0));
    }

    #[test]
    fn test_dangling_goto_halts() {
        let conversation = parse("Hello\n{{Goto(nowhere)}}", &VariableStore::new());
        let mut state = PlaybackState::new();
        state.line_index = 1;

        let step = run(&Executor::new(), &conversation, &mut state);
        assert!(matches!(step, Step::Halt(reason) if reason.contains("nowhere")));
    }

    #[test]
    fn test_zero_loop_skips_body() {
        let conversation = parse("{{Loop(0)}}\nBody", &VariableStore::new());
        let executor = Executor::new();
        let mut state = PlaybackState::new();

        // LoopStart, Body, LoopEnd
        assert_eq!(run(&executor, &conversation, &mut state), Step::Jump(2));
        assert!(state.loop_counters.is_empty());
        state.line_index = 2;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Next);
    }

    #[test]
    fn test_loop_counter_lifecycle() {
        let conversation = parse("{{Loop(2)}}\nBody", &VariableStore::new());
        let executor = Executor::new();
        let mut state = PlaybackState::new();

        assert_eq!(run(&executor, &conversation, &mut state), Step::Next);
        assert_eq!(state.loop_counters.get(&0), Some(&1));

        state.line_index = 2;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Jump(0));
        state.line_index = 0;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Next);
        assert_eq!(state.loop_counters.get(&0), Some(&0));

        state.line_index = 2;
        assert_eq!(run(&executor, &conversation, &mut state), Step::Next);
        assert!(state.loop_counters.is_empty());
    }

    #[test]
    fn test_loop_count_from_variable() {
        let mut vars = VariableStore::new();
        vars.set("times", "4");
        assert_eq!(resolve_loop_count("$times", &vars), 4);
        assert_eq!(resolve_loop_count("$unset", &vars), 1);
        assert_eq!(resolve_loop_count("many", &vars), 1);
        assert_eq!(resolve_loop_count(" 3 ", &vars), 3);
    }

    #[test]
    fn test_if_else_branches() {
        let text = "{{If(score >= 10)}}\nWin\n{{Else}}\nLose\n{{EndIf}}\nDone";
        let conversation = parse(text, &VariableStore::new());
        let executor = Executor::new();

        let mut vars = VariableStore::new();
        vars.set("score", "3");
        let mut state = PlaybackState::new();
        assert_eq!(
            executor.step(&conversation, &mut state, &vars, &mut None),
            Step::Jump(3)
        );
        assert_eq!(state.conditional_end_index, Some(4));

        vars.set("score", "12");
        let mut state = PlaybackState::new();
        assert_eq!(
            executor.step(&conversation, &mut state, &vars, &mut None),
            Step::Next
        );

        state.line_index = 2;
        assert_eq!(
            executor.step(&conversation, &mut state, &vars, &mut None),
            Step::Jump(4)
        );
    }

    #[test]
    fn test_false_branch_without_else_jumps_to_end_if() {
        let conversation = parse("{{If(flag)}}\nHidden\n{{EndIf}}\nShown", &VariableStore::new());
        let mut state = PlaybackState::new();
        assert_eq!(run(&Executor::new(), &conversation, &mut state), Step::Jump(2));
    }

    #[test]
    fn test_unclosed_false_branch_stops() {
        let conversation = parse("{{If(flag)}}\nHidden", &VariableStore::new());
        let mut state = PlaybackState::new();
        assert_eq!(run(&Executor::new(), &conversation, &mut state), Step::Stop);
    }

    #[test]
    fn test_end_if_reanchors_visible_choice() {
        let text = "Before\n{{If(flag)}}\nInside\n{{EndIf}}\n- Go -> Next";
        let conversation = parse(text, &VariableStore::new());
        let executor = Executor::new();
        let vars = VariableStore::new();
        let mut reanchor = None;

        // Before, IfStart, Inside, EndIf
        let mut state = PlaybackState::new();
        state.line_index = 3;
        assert_eq!(
            executor.step(&conversation, &mut state, &vars, &mut reanchor),
            Step::Jump(2)
        );
        assert_eq!(reanchor, Some(Reanchor { line: 2, end_if: 3 }));
    }

    #[test]
    fn test_end_if_prefers_line_displayed_in_this_pass() {
        let text = "{{If(flag)}}\nWin\n{{Else}}\nLose\n{{EndIf}}\n- Go -> Next";
        let conversation = parse(text, &VariableStore::new());
        let mut reanchor = None;

        // IfStart, Win, Else, Lose, EndIf
        let mut state = PlaybackState::new();
        state.line_index = 4;
        state.last_displayed = Some(1);
        let step = Executor::new().step(&conversation, &mut state, &VariableStore::new(), &mut reanchor);
        assert_eq!(step, Step::Jump(1));
        assert_eq!(reanchor, Some(Reanchor { line: 1, end_if: 4 }));
    }

    #[test]
    fn test_end_if_without_passing_choice_falls_through() {
        let text = "Before\n{{If(flag)}}\nInside\n{{EndIf}}\n- Go -> Next ##if:$key";
        let conversation = parse(text, &VariableStore::new());
        let mut state = PlaybackState::new();
        state.line_index = 3;
        let mut reanchor = None;

        let step = Executor::new().step(&conversation, &mut state, &VariableStore::new(), &mut reanchor);
        assert_eq!(step, Step::Next);
        assert_eq!(reanchor, None);
    }

    #[test]
    fn test_skipping_passes_every_line() {
        let conversation = parse("{{Goto(missing)}}\nText\nMore", &VariableStore::new());
        let mut state = PlaybackState::new();
        state.skipping_conditional = true;
        state.conditional_end_index = Some(2);

        assert_eq!(run(&Executor::new(), &conversation, &mut state), Step::Next);
    }
}
