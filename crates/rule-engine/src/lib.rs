//! 工作流规则引擎
//!
//! 可嵌入的规则评估库，支持：
//! - JSON 工作流定义和解析
//! - 按名称注册的函数与函数集合（`集合名.函数名`）
//! - 参数绑定与类型检查
//! - 按声明顺序执行规则，单条规则失败不影响后续规则
//! - 工作流热更新

pub mod binder;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod executor;
pub mod functions;
pub mod loader;
pub mod models;
pub mod operators;
pub mod store;
pub mod watcher;

pub use compiler::{CompiledWorkflow, WorkflowCompiler};
pub use engine::{EngineSettings, RulesEngine};
pub use error::{Result, RuleError};
pub use executor::{describe_metrics, EvaluationOptions, WorkflowExecutor};
pub use functions::{function, FunctionRegistry, FunctionSet, RuleFunction, Signature, StringUtils};
pub use loader::{find_rules_file, load_rules_file, LoadedRules, MissingRulesPolicy};
pub use models::{
    ActionCall, Argument, ConditionNode, EvaluationOutcome, FunctionCall, LogicalGroup, Record,
    Rule, RuleResult, RuleStatus, SkipReason, Workflow, WorkflowStatus,
};
pub use operators::{LogicalOperator, ParamType};
pub use store::{WorkflowStore, WorkflowStoreStats};
pub use watcher::{FileWorkflowWatcher, WorkflowWatcher};
