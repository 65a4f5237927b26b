//! 规则引擎入口
//!
//! 组合函数注册表、工作流存储和执行器，对外提供注册、加载和评估接口。

use crate::compiler::CompiledWorkflow;
use crate::error::Result;
use crate::executor::{EvaluationOptions, WorkflowExecutor};
use crate::functions::{FunctionRegistry, FunctionSet, RuleFunction};
use crate::loader;
use crate::models::{EvaluationOutcome, Record, RuleResult, Workflow};
use crate::store::{WorkflowStore, WorkflowStoreStats};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// 引擎设置
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    /// 所有评估默认记录追踪
    pub trace_enabled: bool,
    /// 未显式指定截止时间时使用的评估超时
    pub default_timeout: Option<Duration>,
}

/// 规则引擎
///
/// 克隆开销很小，克隆后的实例共享注册表和存储。
#[derive(Clone)]
pub struct RulesEngine {
    registry: Arc<FunctionRegistry>,
    store: WorkflowStore,
    executor: Arc<WorkflowExecutor>,
    settings: EngineSettings,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let executor = if settings.trace_enabled {
            WorkflowExecutor::new().with_trace()
        } else {
            WorkflowExecutor::new()
        };

        Self {
            registry: Arc::new(FunctionRegistry::new()),
            store: WorkflowStore::new(),
            executor: Arc::new(executor),
            settings,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    /// 注册单个函数
    pub fn register_function(
        &self,
        name: impl Into<String>,
        function: impl RuleFunction + 'static,
    ) -> Result<()> {
        self.registry.register(name, function)
    }

    /// 注册函数集合，函数以 `集合名.函数名` 的形式调用
    pub fn register_set(&self, set: impl FunctionSet) -> Result<Vec<String>> {
        self.registry.register_set(&set)
    }

    /// 加载单个工作流，同名工作流被替换
    pub fn load_workflow(&self, workflow: Workflow) -> Result<()> {
        let compiled = self.store.load(workflow)?;
        self.check_functions(&compiled);
        Ok(())
    }

    /// 从 JSON 加载工作流（数组或单个对象）
    pub fn load_from_json(&self, json: &str) -> Result<Vec<String>> {
        let names = self.store.load_from_json(json)?;
        self.check_loaded(&names);
        Ok(names)
    }

    /// 从文件加载工作流
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let workflows = loader::read_workflows(path.as_ref())?;
        let names = self.store.load_batch(workflows)?;
        self.check_loaded(&names);
        Ok(names)
    }

    /// 用新的工作流集合替换全部已加载的工作流
    pub fn replace_all(&self, workflows: Vec<Workflow>) -> Result<Vec<String>> {
        let names = self.store.replace_all(workflows)?;
        self.check_loaded(&names);
        Ok(names)
    }

    /// 卸载工作流
    pub fn unload(&self, name: &str) -> Result<()> {
        self.store.delete(name)
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.store.list_names()
    }

    pub fn stats(&self) -> WorkflowStoreStats {
        self.store.stats()
    }

    /// 评估工作流
    ///
    /// 工作流不存在时返回 `WorkflowNotFound`；单条规则的错误记录在结果中。
    pub fn evaluate(
        &self,
        workflow_name: &str,
        input: &Record,
        output_template: Record,
    ) -> Result<EvaluationOutcome> {
        let mut options = EvaluationOptions::new();
        if let Some(timeout) = self.settings.default_timeout {
            options = options.with_timeout(timeout);
        }
        self.evaluate_with(workflow_name, input, output_template, &options)
    }

    /// 按指定选项评估工作流
    #[instrument(skip(self, input, output_template, options))]
    pub fn evaluate_with(
        &self,
        workflow_name: &str,
        input: &Record,
        output_template: Record,
        options: &EvaluationOptions,
    ) -> Result<EvaluationOutcome> {
        let workflow = self.store.get(workflow_name)?;
        Ok(self
            .executor
            .execute(&workflow, &self.registry, input, output_template, options))
    }

    /// 使用强类型的输入和输出评估工作流
    pub fn evaluate_typed<I, O>(
        &self,
        workflow_name: &str,
        input: &I,
        output_template: O,
    ) -> Result<(O, Vec<RuleResult>)>
    where
        I: Serialize,
        O: Serialize + DeserializeOwned,
    {
        let input = Record::from_serialize(input)?;
        let output = Record::from_serialize(&output_template)?;

        let outcome = self.evaluate(workflow_name, &input, output)?;
        let output = outcome.output.deserialize_into()?;
        Ok((output, outcome.results))
    }

    fn check_loaded(&self, names: &[String]) {
        for name in names {
            if let Ok(compiled) = self.store.get(name) {
                self.check_functions(&compiled);
            }
        }
    }

    /// 加载时提示尚未注册的函数，调用仍在绑定阶段才会失败
    fn check_functions(&self, workflow: &CompiledWorkflow) {
        let missing: Vec<&str> = workflow
            .functions
            .iter()
            .filter(|f| !self.registry.contains(f))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            debug!(workflow = %workflow.name(), "工作流引用的函数均已注册");
        } else {
            warn!(
                workflow = %workflow.name(),
                functions = ?missing,
                "工作流引用了尚未注册的函数"
            );
        }
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}
