//! 工作流执行器
//!
//! 按声明顺序逐条执行规则：评估条件（逻辑组短路求值），条件满足时执行动作并写入输出记录。
//! 单条规则的错误记录在该规则的结果中，不会中断后续规则。

use crate::binder::Binder;
use crate::compiler::CompiledWorkflow;
use crate::error::Result;
use crate::functions::FunctionRegistry;
use crate::models::{
    ActionCall, ConditionNode, EvaluationOutcome, LogicalGroup, Record, Rule, RuleResult,
    SkipReason, WorkflowStatus,
};
use crate::operators::LogicalOperator;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 单次评估的选项
#[derive(Debug, Clone, Default)]
pub struct EvaluationOptions {
    /// 截止时间，只在规则之间检查，正在执行的规则不会被打断
    pub deadline: Option<Instant>,
    /// 记录评估追踪
    pub trace: bool,
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }
}

/// 注册执行器指标的描述信息
pub fn describe_metrics() {
    metrics::describe_counter!(
        "rule_engine_evaluations_total",
        "Total number of workflow evaluations"
    );
    metrics::describe_counter!(
        "rule_engine_rule_results_total",
        "Total number of rule results by status"
    );
    metrics::describe_histogram!(
        "rule_engine_evaluation_duration_seconds",
        "Workflow evaluation duration in seconds"
    );
}

/// 工作流执行器
pub struct WorkflowExecutor {
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl WorkflowExecutor {
    pub fn new() -> Self {
        Self {
            trace_enabled: false,
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 执行工作流
    ///
    /// 输出记录的所有权在评估期间归执行器，结束后随结果返回。
    pub fn execute(
        &self,
        workflow: &CompiledWorkflow,
        registry: &FunctionRegistry,
        input: &Record,
        output: Record,
        options: &EvaluationOptions,
    ) -> EvaluationOutcome {
        let start = Instant::now();
        let trace = self.trace_enabled || options.trace;

        let mut outcome = EvaluationOutcome {
            workflow_name: workflow.name().to_string(),
            status: WorkflowStatus::Pending,
            output,
            results: Vec::with_capacity(workflow.rules().len()),
            evaluation_time_ms: 0,
        };

        outcome.status = WorkflowStatus::Running;
        debug!(workflow = %outcome.workflow_name, rules = workflow.rules().len(), "开始执行工作流");

        for rule in workflow.rules() {
            if !rule.enabled {
                outcome
                    .results
                    .push(RuleResult::skipped(&rule.rule_name, SkipReason::Disabled));
                continue;
            }

            if outcome.status == WorkflowStatus::Running
                && options.deadline.is_some_and(|deadline| Instant::now() >= deadline)
            {
                warn!(
                    workflow = %outcome.workflow_name,
                    rule = %rule.rule_name,
                    "已超过截止时间，剩余规则不再执行"
                );
                outcome.status = WorkflowStatus::Aborted;
            }

            if outcome.status == WorkflowStatus::Aborted {
                outcome.results.push(RuleResult::skipped(
                    &rule.rule_name,
                    SkipReason::DeadlineExceeded,
                ));
                continue;
            }

            let result = self.execute_rule(rule, registry, input, &mut outcome.output, trace);
            outcome.results.push(result);
        }

        if outcome.status == WorkflowStatus::Running {
            outcome.status = WorkflowStatus::Completed;
        }

        let elapsed = start.elapsed();
        outcome.evaluation_time_ms = elapsed.as_millis() as i64;

        for result in &outcome.results {
            metrics::counter!("rule_engine_rule_results_total", "status" => result.status.as_str())
                .increment(1);
        }
        metrics::counter!(
            "rule_engine_evaluations_total",
            "workflow" => outcome.workflow_name.clone(),
            "status" => outcome.status.as_str()
        )
        .increment(1);
        metrics::histogram!("rule_engine_evaluation_duration_seconds")
            .record(elapsed.as_secs_f64());

        debug!(
            workflow = %outcome.workflow_name,
            status = outcome.status.as_str(),
            elapsed_ms = outcome.evaluation_time_ms,
            "工作流执行结束"
        );

        outcome
    }

    /// 执行单条规则
    fn execute_rule(
        &self,
        rule: &Rule,
        registry: &FunctionRegistry,
        input: &Record,
        output: &mut Record,
        trace: bool,
    ) -> RuleResult {
        let mut lines = Vec::new();

        let matched = {
            let binder = Binder::new(registry, input, output);
            self.evaluate_node(&rule.condition, &binder, trace, &mut lines, "condition")
        };

        let mut result = match matched {
            Err(e) => {
                warn!(rule = %rule.rule_name, error = %e, "规则条件评估失败");
                RuleResult::failed(&rule.rule_name, &e)
            }
            Ok(false) => RuleResult::skipped(&rule.rule_name, SkipReason::ConditionNotMet),
            Ok(true) => match &rule.action {
                None => RuleResult::succeeded(&rule.rule_name, None),
                Some(action) => match self.apply_action(action, registry, input, output) {
                    Ok(value) => {
                        if trace {
                            lines.push(format!("action: {} => {}", action.call.function, value));
                        }
                        RuleResult::succeeded(&rule.rule_name, Some(value))
                    }
                    Err(e) => {
                        warn!(rule = %rule.rule_name, error = %e, "规则动作执行失败");
                        RuleResult::failed(&rule.rule_name, &e)
                    }
                },
            },
        };

        result.trace = lines;
        result
    }

    /// 执行动作，结果写入输出记录
    fn apply_action(
        &self,
        action: &ActionCall,
        registry: &FunctionRegistry,
        input: &Record,
        output: &mut Record,
    ) -> Result<Value> {
        let value = Binder::new(registry, input, output).invoke(&action.call)?;

        if let Some(path) = &action.output {
            output.set(path, value.clone())?;
        }

        Ok(value)
    }

    /// 递归评估条件节点
    fn evaluate_node(
        &self,
        node: &ConditionNode,
        binder: &Binder<'_>,
        trace: bool,
        lines: &mut Vec<String>,
        path: &str,
    ) -> Result<bool> {
        match node {
            ConditionNode::Call(call) => {
                let matched = binder.evaluate_predicate(call)?;
                if trace {
                    lines.push(format!(
                        "{}: {}({} 个参数) => {}",
                        path,
                        call.function,
                        call.args.len(),
                        if matched { "MATCHED" } else { "NOT_MATCHED" }
                    ));
                }
                Ok(matched)
            }
            ConditionNode::Group(group) => self.evaluate_group(group, binder, trace, lines, path),
        }
    }

    /// 评估逻辑组节点（短路求值）
    fn evaluate_group(
        &self,
        group: &LogicalGroup,
        binder: &Binder<'_>,
        trace: bool,
        lines: &mut Vec<String>,
        path: &str,
    ) -> Result<bool> {
        if trace {
            lines.push(format!(
                "{}: 开始评估 {} 组 (共 {} 个子节点)",
                path,
                group.operator,
                group.children.len()
            ));
        }

        // AND 遇到 false 立即返回，OR 遇到 true 立即返回
        let short_circuit_on = group.operator == LogicalOperator::Or;

        for (i, child) in group.children.iter().enumerate() {
            let child_path = format!("{}.children[{}]", path, i);
            let child_matched = self.evaluate_node(child, binder, trace, lines, &child_path)?;

            if child_matched == short_circuit_on {
                if trace {
                    lines.push(format!("{}: {} 短路 - 子节点 {}", path, group.operator, i));
                }
                return Ok(short_circuit_on);
            }
        }

        Ok(!short_circuit_on)
    }
}

impl Default for WorkflowExecutor {
    fn default() -> Self {
        Self::new()
    }
}
