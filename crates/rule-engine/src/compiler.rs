//! 工作流编译器
//!
//! 解析 JSON 工作流定义，校验结构并预提取引用的字段和函数。
//! 函数是否存在在绑定阶段才检查，这样单条规则引用的函数缺失不会影响整个工作流加载。

use crate::error::{Result, RuleError};
use crate::models::{ActionCall, Argument, ConditionNode, FunctionCall, Rule, Workflow, ROOT_PATH};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

/// 编译后的工作流（加载后不可变）
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// 原始定义
    pub workflow: Workflow,
    /// 引用的输入字段路径
    pub input_fields: BTreeSet<String>,
    /// 引用或写入的输出字段路径
    pub output_fields: BTreeSet<String>,
    /// 引用的函数名
    pub functions: BTreeSet<String>,
    /// 编译版本号
    pub compile_version: u64,
}

impl CompiledWorkflow {
    pub fn name(&self) -> &str {
        &self.workflow.workflow_name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.workflow.rules
    }

    pub fn enabled_rules(&self) -> usize {
        self.workflow.rules.iter().filter(|r| r.enabled).count()
    }
}

/// 规则中引用的字段和函数
#[derive(Default)]
struct References {
    input_fields: BTreeSet<String>,
    output_fields: BTreeSet<String>,
    functions: BTreeSet<String>,
}

/// 工作流编译器
pub struct WorkflowCompiler {
    compile_version: u64,
}

impl WorkflowCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 解析工作流定义：JSON 数组，或单个工作流对象
    pub fn parse(json: &str) -> Result<Vec<Workflow>> {
        let value: Value = serde_json::from_str(json)?;
        let workflows = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            Value::Object(_) => vec![serde_json::from_value(value)?],
            _ => {
                return Err(RuleError::ParseError(
                    "工作流定义必须是对象或数组".to_string(),
                ))
            }
        };
        Ok(workflows)
    }

    /// 从 JSON 字符串编译全部工作流
    pub fn compile_from_json(&mut self, json: &str) -> Result<Vec<CompiledWorkflow>> {
        let workflows = Self::parse(json)?;
        self.compile_all(workflows)
    }

    /// 编译一组工作流，任一失败则整体失败
    pub fn compile_all(&mut self, workflows: Vec<Workflow>) -> Result<Vec<CompiledWorkflow>> {
        let mut names = HashSet::new();
        for workflow in &workflows {
            if !names.insert(workflow.workflow_name.as_str()) {
                return Err(RuleError::ParseError(format!(
                    "工作流名称重复: {}",
                    workflow.workflow_name
                )));
            }
        }

        workflows
            .into_iter()
            .map(|workflow| self.compile(workflow))
            .collect()
    }

    /// 编译单个工作流
    pub fn compile(&mut self, workflow: Workflow) -> Result<CompiledWorkflow> {
        self.validate_workflow(&workflow)?;

        let mut refs = References::default();
        for rule in &workflow.rules {
            self.collect_node(&rule.condition, &mut refs);
            if let Some(action) = &rule.action {
                self.collect_call(&action.call, &mut refs);
                if let Some(output) = &action.output {
                    refs.output_fields.insert(output.clone());
                }
            }
        }

        self.compile_version += 1;

        Ok(CompiledWorkflow {
            workflow,
            input_fields: refs.input_fields,
            output_fields: refs.output_fields,
            functions: refs.functions,
            compile_version: self.compile_version,
        })
    }

    /// 验证工作流结构
    fn validate_workflow(&self, workflow: &Workflow) -> Result<()> {
        if workflow.workflow_name.trim().is_empty() {
            return Err(RuleError::ParseError("工作流名称不能为空".to_string()));
        }

        let mut rule_names = HashSet::new();
        for (i, rule) in workflow.rules.iter().enumerate() {
            let path = format!("{}.rules[{}]", workflow.workflow_name, i);

            if rule.rule_name.trim().is_empty() {
                return Err(RuleError::ParseError(format!("规则 '{}' 的名称不能为空", path)));
            }

            if !rule_names.insert(rule.rule_name.as_str()) {
                return Err(RuleError::ParseError(format!(
                    "工作流 '{}' 中规则名称重复: {}",
                    workflow.workflow_name, rule.rule_name
                )));
            }

            self.validate_node(&rule.condition, &format!("{}.condition", path))?;

            if let Some(action) = &rule.action {
                self.validate_action(action, &format!("{}.action", path))?;
            }
        }

        Ok(())
    }

    /// 验证条件节点
    fn validate_node(&self, node: &ConditionNode, path: &str) -> Result<()> {
        match node {
            ConditionNode::Call(call) => self.validate_call(call, path),
            ConditionNode::Group(group) => {
                if group.children.is_empty() {
                    return Err(RuleError::ParseError(format!(
                        "逻辑组 '{}' 不能为空",
                        path
                    )));
                }

                for (i, child) in group.children.iter().enumerate() {
                    let child_path = format!("{}.children[{}]", path, i);
                    self.validate_node(child, &child_path)?;
                }
                Ok(())
            }
        }
    }

    fn validate_action(&self, action: &ActionCall, path: &str) -> Result<()> {
        self.validate_call(&action.call, path)?;

        if let Some(output) = &action.output {
            if output.is_empty() || output == ROOT_PATH || output.split('.').any(str::is_empty) {
                return Err(RuleError::ParseError(format!(
                    "动作 '{}' 的输出路径无效: '{}'",
                    path, output
                )));
            }
        }
        Ok(())
    }

    /// 验证函数调用
    fn validate_call(&self, call: &FunctionCall, path: &str) -> Result<()> {
        if call.function.trim().is_empty() {
            return Err(RuleError::ParseError(format!("'{}' 的函数名不能为空", path)));
        }

        for (i, arg) in call.args.iter().enumerate() {
            if let Argument::Input(field) | Argument::Output(field) = arg {
                if field.is_empty() {
                    return Err(RuleError::ParseError(format!(
                        "'{}' 第 {} 个参数的字段路径不能为空",
                        path,
                        i + 1
                    )));
                }
            }
        }

        // 常量正则预先校验
        if call.function == "regex" {
            if let Some(Argument::Value(Value::String(pattern))) = call.args.get(1) {
                regex::Regex::new(pattern).map_err(|e| {
                    RuleError::ParseError(format!("'{}' 的正则表达式无效: {}", path, e))
                })?;
            }
        }

        Ok(())
    }

    /// 递归收集字段和函数
    fn collect_node(&self, node: &ConditionNode, refs: &mut References) {
        match node {
            ConditionNode::Call(call) => self.collect_call(call, refs),
            ConditionNode::Group(group) => {
                for child in &group.children {
                    self.collect_node(child, refs);
                }
            }
        }
    }

    fn collect_call(&self, call: &FunctionCall, refs: &mut References) {
        refs.functions.insert(call.function.clone());
        for arg in &call.args {
            match arg {
                Argument::Input(path) => {
                    refs.input_fields.insert(path.clone());
                }
                Argument::Output(path) => {
                    refs.output_fields.insert(path.clone());
                }
                Argument::Value(_) => {}
            }
        }
    }
}

impl Default for WorkflowCompiler {
    fn default() -> Self {
        Self::new()
    }
}
