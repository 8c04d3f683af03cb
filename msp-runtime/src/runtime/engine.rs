//! # Engine 模块
//!
//! 对话播放引擎。
//!
//! ## 执行模型
//!
//! ```text
//! 公开操作 → [控制流解析：Label/Goto/Loop/If 透明跳过] → 普通行
//!          → 行展示阶段 → 挂起点 → tick() 轮询 → 行完成 → 等待推进
//! ```
//!
//! 行展示阶段：
//!
//! 1. `on_before_line_display`
//! 2. 选项门：收集可展示的选项并交给视图
//! 3. 复制当前行作为播放副本，`set_view`
//! 4. 插件 `on_line_display`，`WaitForCompletion` 时挂起
//! 5. 执行内联调用，每次插入后重新 `set_view`，再处理引擎请求
//! 6. 等待视图展示完成（暂停时等待恢复）
//! 7. `on_line_complete`
//!
//! 每个公开操作都会把状态机同步推进到下一个挂起点；
//! 宿主每帧调用 [`DialogueEngine::tick`] 轮询插件与视图。
//! 行完成后引擎不会自动推进，由宿主调用 [`DialogueEngine::advance_to_next_line`]。

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::diagnostic::Diagnostic;
use crate::error::{MspResult, RuntimeError};
use crate::runtime::executor::{Executor, Reanchor, Step};
use crate::runtime::plugin::{EnginePlugin, PluginContext, PluginResult};
use crate::runtime::view::DialogueView;
use crate::script::Parser;
use crate::script::ast::{Choice, Conversation, DialogueAsset, Line, LineType, find_conversation};
use crate::services::{
    ConditionEvaluator, EngineRequest, FunctionRegistry, InvocationContext, VariableStore,
};
use crate::state::{PlaybackState, Waiting};

/// 引擎事件，由宿主通过 [`DialogueEngine::take_events`] 取走
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    ConversationStarted { name: String },
    ConversationEnded { name: String },
    LineDisplayed { index: usize },
    ChoicesPresented { count: usize },
    Paused,
    Resumed,
    Halted { reason: String },
}

/// 当前行所处的展示阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinePhase {
    /// 没有正在播放的行
    Idle,
    /// 即将调用第 `next` 个插件
    Plugins { next: usize },
    /// 等待第 `index` 个插件完成
    PluginWait { index: usize },
    /// 即将执行内联调用
    Invocations,
    /// 等待视图展示完成
    ViewWait,
    /// 等待恢复
    ResumeWait,
}

/// 对话播放引擎
///
/// # 使用示例
///
/// ```ignore
/// let mut engine = DialogueEngine::new(view);
/// engine.functions_mut().register("PlayerName", |_, _| "Alice");
/// engine.start(&DialogueAsset::new("intro", text), 0)?;
///
/// loop {
///     match engine.tick() {
///         Waiting::Advance => { engine.advance_to_next_line(); }
///         Waiting::Choice { .. } => { engine.select_choice(0)?; }
///         Waiting::Idle | Waiting::Halted => break,
///         _ => { /* 等待视图/插件 */ }
///     }
/// }
/// ```
pub struct DialogueEngine<V: DialogueView> {
    view: V,
    plugins: Vec<Box<dyn EnginePlugin>>,
    variables: VariableStore,
    functions: FunctionRegistry,
    executor: Executor,
    parser: Parser,
    config: EngineConfig,

    conversations: Vec<Conversation>,
    state: PlaybackState,
    phase: LinePhase,
    /// 正在播放的行副本（内联调用插入只作用于它）
    live_line: Option<Line>,
    pending_choices: Vec<Choice>,
    reanchor: Option<Reanchor>,
    events: Vec<EngineEvent>,
}

impl<V: DialogueView> DialogueEngine<V> {
    /// 使用默认配置创建引擎
    pub fn new(view: V) -> Self {
        Self::with_config(view, EngineConfig::default())
    }

    /// 使用指定配置创建引擎
    pub fn with_config(view: V, config: EngineConfig) -> Self {
        Self {
            view,
            plugins: Vec::new(),
            variables: VariableStore::new(),
            functions: FunctionRegistry::new(),
            executor: Executor::new(),
            parser: Parser::new(),
            config,
            conversations: Vec::new(),
            state: PlaybackState::new(),
            phase: LinePhase::Idle,
            live_line: None,
            pending_choices: Vec::new(),
            reanchor: None,
            events: Vec::new(),
        }
    }

    // ========== 对话管理 ==========

    /// 解析对话源并从第 `start_index` 段对话开始播放
    ///
    /// 解析使用引擎自己的变量仓库。
    pub fn start(&mut self, asset: &DialogueAsset, start_index: usize) -> MspResult<()> {
        let conversations = self.parser.parse(asset, &self.variables)?;
        self.start_parsed(conversations, start_index)?;
        Ok(())
    }

    /// 使用已解析的对话开始播放
    pub fn start_parsed(
        &mut self,
        conversations: Vec<Conversation>,
        start_index: usize,
    ) -> Result<(), RuntimeError> {
        if start_index >= conversations.len() {
            return Err(RuntimeError::StartIndexOutOfRange {
                index: start_index,
                count: conversations.len(),
            });
        }

        self.stop_inner();
        self.conversations = conversations;
        if self.config.sort_plugins_on_start {
            self.plugins.sort_by_key(|plugin| plugin.priority());
        }
        self.switch_inner(start_index);
        self.pump();
        Ok(())
    }

    /// 切换到第 `index` 段对话
    pub fn switch_conversation(&mut self, index: usize) -> Result<(), RuntimeError> {
        if index >= self.conversations.len() {
            return Err(RuntimeError::StartIndexOutOfRange {
                index,
                count: self.conversations.len(),
            });
        }
        self.switch_inner(index);
        self.pump();
        Ok(())
    }

    /// 按名称跳转到对话
    pub fn jump_to(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.jump_inner(name)?;
        self.pump();
        Ok(())
    }

    /// 停止播放
    ///
    /// 只有确实有对话在播放时才发出结束通知，连续调用不会重复通知。
    pub fn stop(&mut self) {
        self.stop_inner();
    }

    /// 暂停，已暂停或没有对话时返回 `false`
    pub fn pause(&mut self) -> bool {
        let changed = self.pause_inner();
        self.pump();
        changed
    }

    /// 恢复，未暂停或没有对话时返回 `false`
    pub fn resume(&mut self) -> bool {
        let changed = self.resume_inner();
        self.pump();
        changed
    }

    // ========== 推进 ==========

    /// 推进到下一行
    ///
    /// 行仍在播放、有待选选项或已停机时不做任何事并返回 `false`。
    pub fn advance_to_next_line(&mut self) -> bool {
        let Some(c) = self.state.conversation else {
            return false;
        };
        if self.state.halted || self.state.line_playing || !self.pending_choices.is_empty() {
            debug!(
                halted = self.state.halted,
                line_playing = self.state.line_playing,
                pending_choices = self.pending_choices.len(),
                "推进被忽略"
            );
            return false;
        }

        self.clear_view();
        let next = self.state.line_index + 1;
        if next >= self.conversations[c].lines.len() {
            self.stop_inner();
            return true;
        }
        self.state.line_index = next;
        self.begin_line();
        self.pump();
        true
    }

    /// 输入辅助：视图仍在展示时跳过效果，否则推进
    pub fn proceed(&mut self) -> bool {
        if self.state.conversation.is_none() {
            return false;
        }
        if self.state.line_playing && self.view.is_still_displaying() {
            self.view.skip_effect();
            self.pump();
            return true;
        }
        self.advance_to_next_line()
    }

    /// 选择第 `index` 个待选选项并跳转到其目标对话
    pub fn select_choice(&mut self, index: usize) -> Result<(), RuntimeError> {
        let Some(c) = self.state.conversation else {
            return Err(RuntimeError::NoActiveConversation);
        };
        let Some(choice) = self.pending_choices.get(index).cloned() else {
            return Err(RuntimeError::InvalidChoiceIndex {
                index,
                max: self.pending_choices.len(),
            });
        };

        let conversation = &self.conversations[c];
        for plugin in &mut self.plugins {
            plugin.on_choice_selected(conversation, index, &choice);
        }
        info!(choice = %choice.text, target = %choice.target, "选择选项");

        self.jump_inner(&choice.target)?;
        self.pump();
        Ok(())
    }

    /// 轮询插件与视图，返回当前等待状态
    pub fn tick(&mut self) -> Waiting {
        self.pump();
        self.waiting()
    }

    /// 当前等待状态
    pub fn waiting(&self) -> Waiting {
        if self.state.halted {
            return Waiting::Halted;
        }
        if self.state.conversation.is_none() {
            return Waiting::Idle;
        }
        match self.phase {
            LinePhase::Plugins { next } => Waiting::Plugin { index: next },
            LinePhase::PluginWait { index } => Waiting::Plugin { index },
            LinePhase::Invocations | LinePhase::ViewWait => Waiting::View,
            LinePhase::ResumeWait => Waiting::Resume,
            LinePhase::Idle if !self.pending_choices.is_empty() => Waiting::Choice {
                count: self.pending_choices.len(),
            },
            LinePhase::Idle => Waiting::Advance,
        }
    }

    // ========== 访问器 ==========

    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableStore {
        &mut self.variables
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    /// 条件求值器
    pub fn evaluator(&self) -> &ConditionEvaluator {
        self.executor.evaluator()
    }

    /// 注册插件
    pub fn add_plugin(&mut self, plugin: impl EnginePlugin + 'static) {
        debug!(plugin = plugin.name(), priority = plugin.priority().0, "注册插件");
        self.plugins.push(Box::new(plugin));
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 已解析的全部对话
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// 当前对话
    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.state
            .conversation
            .and_then(|c| self.conversations.get(c))
    }

    /// 当前行（正在播放时返回插入后的副本）
    pub fn current_line(&self) -> Option<&Line> {
        self.live_line.as_ref().or_else(|| {
            self.current_conversation()
                .and_then(|conversation| conversation.lines.get(self.state.line_index))
        })
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// 待选选项
    pub fn pending_choices(&self) -> &[Choice] {
        &self.pending_choices
    }

    /// 最近一次 `start` 的解析诊断
    pub fn parser_warnings(&self) -> &[Diagnostic] {
        self.parser.warnings()
    }

    /// 取走累积的事件
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ========== 内部实现 ==========

    fn switch_inner(&mut self, index: usize) {
        if self.state.conversation.is_some() {
            self.stop_inner();
        }
        self.state.reset_transient();
        self.state.conversation = Some(index);

        let conversation = &self.conversations[index];
        info!(conversation = %conversation.name, lines = conversation.lines.len(), "开始对话");
        for plugin in &mut self.plugins {
            plugin.on_conversation_start(conversation);
        }
        self.events.push(EngineEvent::ConversationStarted {
            name: conversation.name.clone(),
        });

        self.begin_line();
    }

    fn jump_inner(&mut self, name: &str) -> Result<(), RuntimeError> {
        if self.conversations.is_empty() {
            return Err(RuntimeError::NothingParsed);
        }
        let index = find_conversation(&self.conversations, name).ok_or_else(|| {
            RuntimeError::ConversationNotFound {
                name: name.to_string(),
            }
        })?;
        self.switch_inner(index);
        Ok(())
    }

    fn stop_inner(&mut self) {
        let ended = self.state.conversation;

        self.phase = LinePhase::Idle;
        self.live_line = None;
        self.pending_choices.clear();
        self.reanchor = None;
        self.clear_view();
        self.state = PlaybackState::new();

        let Some(conversation) = ended.and_then(|c| self.conversations.get(c)) else {
            return;
        };
        info!(conversation = %conversation.name, "对话结束");
        for plugin in &mut self.plugins {
            plugin.on_conversation_end(conversation);
        }
        self.events.push(EngineEvent::ConversationEnded {
            name: conversation.name.clone(),
        });
    }

    fn pause_inner(&mut self) -> bool {
        if self.state.conversation.is_none() || self.state.paused {
            return false;
        }
        self.state.paused = true;
        self.view.pause();
        for plugin in &mut self.plugins {
            plugin.on_pause();
        }
        self.events.push(EngineEvent::Paused);
        debug!("播放已暂停");
        true
    }

    fn resume_inner(&mut self) -> bool {
        if self.state.conversation.is_none() || !self.state.paused {
            return false;
        }
        self.state.paused = false;
        self.view.resume();
        for plugin in &mut self.plugins {
            plugin.on_resume();
        }
        self.events.push(EngineEvent::Resumed);
        debug!("播放已恢复");
        true
    }

    fn clear_view(&mut self) {
        self.view.clear_view();
        for plugin in &mut self.plugins {
            plugin.on_clear();
        }
    }

    fn halt(&mut self, reason: String) {
        error!(%reason, "播放停机");
        self.state.halted = true;
        self.state.line_playing = false;
        self.phase = LinePhase::Idle;
        self.live_line = None;
        self.events.push(EngineEvent::Halted { reason });
    }

    /// 从当前索引开始解析控制流，直到遇到普通行
    fn begin_line(&mut self) {
        let Some(c) = self.state.conversation else {
            return;
        };
        let len = self.conversations[c].lines.len();

        let mut steps = 0usize;
        loop {
            if steps >= self.config.max_control_steps {
                self.halt(format!(
                    "控制流失控：连续 {steps} 步没有遇到可展示的行 (对话 '{}')",
                    self.conversations[c].name
                ));
                return;
            }
            steps += 1;

            let index = self.state.line_index;
            if index >= len {
                self.halt(format!(
                    "行索引 {index} 越界 (对话 '{}' 共 {len} 行)",
                    self.conversations[c].name
                ));
                return;
            }

            let step = self.executor.step(
                &self.conversations[c],
                &mut self.state,
                &self.variables,
                &mut self.reanchor,
            );
            match step {
                Step::Display => break,
                Step::Next if index + 1 >= len => {
                    self.stop_inner();
                    return;
                }
                Step::Next => self.state.line_index = index + 1,
                Step::Jump(target) if target >= len => {
                    self.halt(format!(
                        "跳转目标 {target} 越界 (对话 '{}' 共 {len} 行)",
                        self.conversations[c].name
                    ));
                    return;
                }
                Step::Jump(target) => self.state.line_index = target,
                Step::Stop => {
                    self.stop_inner();
                    return;
                }
                Step::Halt(reason) => {
                    self.halt(reason);
                    return;
                }
            }
        }

        self.display_line(c);
    }

    fn display_line(&mut self, c: usize) {
        let index = self.state.line_index;
        let line = self.conversations[c].lines[index].clone();
        self.state.line_playing = true;
        self.state.last_displayed = Some(index);

        let conversation = &self.conversations[c];
        let ctx = PluginContext {
            conversation,
            line: &line,
            line_index: index,
            paused: self.state.paused,
        };
        for plugin in &mut self.plugins {
            plugin.on_before_line_display(&ctx);
        }

        let reanchor = self.reanchor.take().filter(|r| r.line == index);
        let choices = presentable_choices(
            self.executor.evaluator(),
            conversation,
            &self.variables,
            index,
            reanchor,
        );
        if !choices.is_empty() {
            for plugin in &mut self.plugins {
                plugin.on_before_choices_display(conversation, &choices);
            }
            self.view.display_choices(conversation, &choices);
            self.events.push(EngineEvent::ChoicesPresented {
                count: choices.len(),
            });
        }
        self.pending_choices = choices;

        debug!(conversation = %conversation.name, index, text = %line.text(), "展示行");
        self.view.set_view(conversation, index, &line);
        self.events.push(EngineEvent::LineDisplayed { index });

        self.live_line = Some(line);
        self.phase = LinePhase::Plugins { next: 0 };
    }

    /// 把当前行推进到下一个挂起点
    fn pump(&mut self) {
        loop {
            let Some(c) = self.state.conversation else {
                return;
            };

            match self.phase {
                LinePhase::Idle => return,

                LinePhase::Plugins { next } => {
                    if next >= self.plugins.len() {
                        self.phase = LinePhase::Invocations;
                        continue;
                    }
                    let Some(line) = self.live_line.as_ref() else {
                        self.phase = LinePhase::Idle;
                        return;
                    };
                    let ctx = PluginContext {
                        conversation: &self.conversations[c],
                        line,
                        line_index: self.state.line_index,
                        paused: self.state.paused,
                    };
                    self.phase = match self.plugins[next].on_line_display(&ctx) {
                        PluginResult::Continue => LinePhase::Plugins { next: next + 1 },
                        PluginResult::WaitForCompletion => {
                            debug!(plugin = self.plugins[next].name(), "等待插件完成");
                            LinePhase::PluginWait { index: next }
                        }
                    };
                }

                LinePhase::PluginWait { index } => {
                    if self.plugins.get(index).is_some_and(|p| !p.is_complete()) {
                        return;
                    }
                    self.phase = LinePhase::Plugins { next: index + 1 };
                }

                LinePhase::Invocations => {
                    self.phase = LinePhase::ViewWait;
                    self.run_invocations(c);
                }

                LinePhase::ViewWait => {
                    if self.state.paused {
                        self.phase = LinePhase::ResumeWait;
                    } else if self.view.is_still_displaying() {
                        return;
                    } else {
                        self.finish_line(c);
                    }
                }

                LinePhase::ResumeWait => {
                    if self.state.paused {
                        return;
                    }
                    self.finish_line(c);
                }
            }
        }
    }

    fn run_invocations(&mut self, c: usize) {
        let Some(mut line) = self.live_line.take() else {
            return;
        };
        if line.content.invocations.is_empty() {
            self.live_line = Some(line);
            return;
        }

        let index = self.state.line_index;
        let conversation = &self.conversations[c];
        let view = &mut self.view;
        let mut content = std::mem::take(&mut line.content);
        let mut ctx = InvocationContext::new(&mut self.variables, &conversation.name, index);

        let splices = self.functions.invoke_all(&mut content, &mut ctx, |updated| {
            let shown = Line {
                content: updated.clone(),
                ..line.clone()
            };
            view.set_view(conversation, index, &shown);
        });
        let requests = ctx.take_requests();

        debug!(index, splices, requests = requests.len(), "内联调用执行完成");
        line.content = content;
        self.live_line = Some(line);
        self.apply_requests(requests);
    }

    fn apply_requests(&mut self, requests: Vec<EngineRequest>) {
        for request in requests {
            match request {
                EngineRequest::Pause => {
                    self.pause_inner();
                }
                EngineRequest::Resume => {
                    self.resume_inner();
                }
                EngineRequest::Stop => {
                    self.stop_inner();
                    return;
                }
                EngineRequest::JumpTo(name) => match self.jump_inner(&name) {
                    Ok(()) => return,
                    Err(err) => warn!(%err, "函数请求的跳转失败"),
                },
            }
        }
    }

    fn finish_line(&mut self, c: usize) {
        if let Some(line) = self.live_line.as_ref() {
            let ctx = PluginContext {
                conversation: &self.conversations[c],
                line,
                line_index: self.state.line_index,
                paused: self.state.paused,
            };
            for plugin in &mut self.plugins {
                plugin.on_line_complete(&ctx);
            }
        }
        self.state.line_playing = false;
        self.phase = LinePhase::Idle;
    }
}

/// 第 `index` 行的选项门
///
/// 包含锚定在本行的选项、下一行为 EndIf 时锚定在该 EndIf 的选项，
/// 以及 EndIf 回溯重锚定到本行的选项；只保留条件成立的。
fn presentable_choices(
    evaluator: &ConditionEvaluator,
    conversation: &Conversation,
    vars: &VariableStore,
    index: usize,
    reanchor: Option<Reanchor>,
) -> Vec<Choice> {
    let next_end_if = conversation
        .lines
        .get(index + 1)
        .filter(|line| line.line_type == LineType::EndIf)
        .map(|_| index + 1);
    let reanchored = reanchor.map(|r| r.end_if);

    conversation
        .choices
        .iter()
        .filter(|anchored| {
            anchored.anchor == index
                || Some(anchored.anchor) == next_end_if
                || Some(anchored.anchor) == reanchored
        })
        .filter(|anchored| {
            anchored
                .choice
                .condition_expression
                .as_deref()
                .is_none_or(|expr| evaluator.evaluate_choice(expr, vars))
        })
        .map(|anchored| anchored.choice.clone())
        .collect()
}
