//! # View 模块
//!
//! 宿主提供的对话视图抽象。

use crate::script::ast::{Choice, Conversation, Line};

/// 对话视图 trait
///
/// 引擎通过它把行和选项交给宿主呈现：
/// - 终端播放器：直接打印
/// - 图形宿主：打字机效果、立绘等
///
/// ## 完成语义
///
/// 引擎在 `set_view` 之后轮询 [`DialogueView::is_still_displaying`]，
/// 返回 `false` 时当前行才算展示完成。
/// 从不报告完成的视图会让播放一直停在该行。
pub trait DialogueView {
    /// 展示一行
    ///
    /// 内联调用插入文本后会以更新后的行再次调用。
    fn set_view(&mut self, conversation: &Conversation, line_index: usize, line: &Line);

    /// 清空当前展示
    fn clear_view(&mut self);

    /// 是否仍在展示（例如打字机效果未完成）
    fn is_still_displaying(&self) -> bool;

    /// 跳过当前展示效果
    fn skip_effect(&mut self) {}

    /// 暂停展示效果
    fn pause(&mut self) {}

    /// 恢复展示效果
    fn resume(&mut self) {}

    /// 展示选项
    fn display_choices(&mut self, conversation: &Conversation, choices: &[Choice]);
}

impl<T: DialogueView + ?Sized> DialogueView for Box<T> {
    fn set_view(&mut self, conversation: &Conversation, line_index: usize, line: &Line) {
        (**self).set_view(conversation, line_index, line);
    }

    fn clear_view(&mut self) {
        (**self).clear_view();
    }

    fn is_still_displaying(&self) -> bool {
        (**self).is_still_displaying()
    }

    fn skip_effect(&mut self) {
        (**self).skip_effect();
    }

    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }

    fn display_choices(&mut self, conversation: &Conversation, choices: &[Choice]) {
        (**self).display_choices(conversation, choices);
    }
}
