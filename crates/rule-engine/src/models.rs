//! 规则引擎领域模型
//!
//! 工作流定义（工作流、规则、条件、动作、参数表达式）、
//! 输入/输出记录以及评估结果。

use crate::error::{Result, RuleError};
use crate::operators::LogicalOperator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 引用整条记录的路径
pub const ROOT_PATH: &str = "$";

/// 工作流定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rules: Vec<Rule>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            workflow_name: name.into(),
            description: None,
            rules,
        }
    }
}

/// 规则定义：条件 + 动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub rule_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: ConditionNode,
    /// 条件满足时执行的动作；为空时规则只做校验
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionCall>,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(name: impl Into<String>, condition: ConditionNode, action: ActionCall) -> Self {
        Self {
            rule_name: name.into(),
            description: None,
            enabled: true,
            condition,
            action: Some(action),
        }
    }

    /// 只有条件、没有动作的校验规则
    pub fn check(name: impl Into<String>, condition: ConditionNode) -> Self {
        Self {
            rule_name: name.into(),
            description: None,
            enabled: true,
            condition,
            action: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 条件节点（函数调用或逻辑组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    Call(FunctionCall),
    Group(LogicalGroup),
}

impl ConditionNode {
    pub fn call(function: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::Call(FunctionCall::new(function, args))
    }
}

/// 逻辑组节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalGroup {
    pub operator: LogicalOperator,
    pub children: Vec<ConditionNode>,
}

impl LogicalGroup {
    pub fn new(operator: LogicalOperator, children: Vec<ConditionNode>) -> Self {
        Self { operator, children }
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self::new(LogicalOperator::And, children)
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self::new(LogicalOperator::Or, children)
    }
}

/// 函数调用：函数名 + 参数表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl FunctionCall {
    pub fn new(function: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

/// 动作：函数调用，结果写入输出记录的 `output` 路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    #[serde(flatten)]
    pub call: FunctionCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ActionCall {
    pub fn new(function: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            call: FunctionCall::new(function, args),
            output: None,
        }
    }

    /// 把常量写入输出字段
    pub fn set(output: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new("value", vec![Argument::Value(value.into())]).with_output(output)
    }

    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.output = Some(path.into());
        self
    }
}

/// 参数表达式
///
/// JSON 形式：`{"input": "Email"}`、`{"output": "IsValid"}`、`{"value": 3}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Input(String),
    Output(String),
    Value(Value),
}

impl Argument {
    pub fn input(path: impl Into<String>) -> Self {
        Self::Input(path.into())
    }

    pub fn output(path: impl Into<String>) -> Self {
        Self::Output(path.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

/// 输入/输出记录
///
/// 一个 JSON 对象。读取缺失字段返回 `Binding` 错误，不会静默得到 null。
/// 写入时顶层字段必须已存在于模板中；嵌套对象（如 `Properties`）是开放字典，可插入新键。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Record {
    data: Value,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    pub fn new() -> Self {
        Self {
            data: Value::Object(Map::new()),
        }
    }

    /// 从 JSON 值创建，必须是对象
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => Ok(Self { data: value }),
            other => Err(RuleError::type_mismatch(
                "object",
                crate::operators::type_name(&other),
            )),
        }
    }

    /// 从任意可序列化类型创建
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// 转换回强类型
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.data)?)
    }

    /// 获取字段值（支持点号分隔的路径，如 "Properties.Key1" 或 "Items.0.Name"）
    pub fn get(&self, path: &str) -> Result<&Value> {
        self.try_get(path)
            .ok_or_else(|| RuleError::binding(path, "字段不存在"))
    }

    /// 获取字段值，不存在时返回 None
    pub fn try_get(&self, path: &str) -> Option<&Value> {
        if path == ROOT_PATH {
            return Some(&self.data);
        }

        let mut current = &self.data;
        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 写入字段值
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        if path == ROOT_PATH || path.is_empty() {
            return Err(RuleError::binding(path, "不能整体替换记录"));
        }

        let parts: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            return Err(RuleError::binding(path, "路径为空"));
        };

        let mut current = &mut self.data;
        for part in parents {
            current = match current {
                Value::Object(map) => map
                    .get_mut(*part)
                    .ok_or_else(|| RuleError::binding(path, format!("字段 '{}' 不存在", part)))?,
                Value::Array(arr) => {
                    let slot = part
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| arr.get_mut(index));
                    slot.ok_or_else(|| {
                        RuleError::binding(path, format!("数组下标 '{}' 无效", part))
                    })?
                }
                _ => {
                    return Err(RuleError::binding(
                        path,
                        format!("'{}' 不是对象或数组", part),
                    ))
                }
            };
        }

        match current {
            Value::Object(map) => {
                if parents.is_empty() && !map.contains_key(*last) {
                    return Err(RuleError::binding(path, "输出模板中不存在该字段"));
                }
                map.insert((*last).to_string(), value);
                Ok(())
            }
            Value::Array(arr) => {
                let slot = last
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| arr.get_mut(index))
                    .ok_or_else(|| {
                        RuleError::binding(path, format!("数组下标 '{}' 无效", last))
                    })?;
                *slot = value;
                Ok(())
            }
            _ => Err(RuleError::binding(path, "父节点不是对象或数组")),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.try_get(path).is_some()
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_value(self) -> Value {
        self.data
    }
}

impl TryFrom<Value> for Record {
    type Error = RuleError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.data
    }
}

/// 单条规则的执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    ConditionNotMet,
    DeadlineExceeded,
}

/// 单条规则的评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub rule_name: String,
    pub status: RuleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl RuleResult {
    fn new(rule_name: &str, status: RuleStatus) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            status,
            value: None,
            error: None,
            skip_reason: None,
            trace: Vec::new(),
        }
    }

    pub fn succeeded(rule_name: &str, value: Option<Value>) -> Self {
        Self {
            value,
            ..Self::new(rule_name, RuleStatus::Succeeded)
        }
    }

    pub fn failed(rule_name: &str, error: &RuleError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(rule_name, RuleStatus::Failed)
        }
    }

    pub fn skipped(rule_name: &str, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::new(rule_name, RuleStatus::Skipped)
        }
    }

    /// 跳过不算失败
    pub fn is_success(&self) -> bool {
        self.status != RuleStatus::Failed
    }
}

/// 工作流整体执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    /// 截止时间到达，剩余规则未执行
    Aborted,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

/// 一次工作流评估的完整结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub output: Record,
    pub results: Vec<RuleResult>,
    pub evaluation_time_ms: i64,
}

impl EvaluationOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(RuleResult::is_success)
    }

    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn result(&self, rule_name: &str) -> Option<&RuleResult> {
        self.results.iter().find(|r| r.rule_name == rule_name)
    }
}
