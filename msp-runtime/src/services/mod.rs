//! # Services 模块
//!
//! 由宿主显式创建并持有的运行期服务：变量仓库、条件求值器和函数注册表。

pub mod condition;
pub mod functions;
pub mod variables;

pub use condition::{CompareOp, Condition, ConditionEvaluator, compare_values, parse_condition};
pub use functions::{EngineRequest, FunctionOutput, FunctionRegistry, InvocationContext};
pub use variables::{VariableChange, VariableStore};
