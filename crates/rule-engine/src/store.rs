//! 工作流存储管理
//!
//! 使用 DashMap 提供线程安全的工作流缓存。编译后的工作流以 `Arc` 共享，
//! 重新加载时整体替换，正在进行的评估继续使用旧实例。

use crate::compiler::{CompiledWorkflow, WorkflowCompiler};
use crate::error::{Result, RuleError};
use crate::models::Workflow;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 工作流存储
#[derive(Clone)]
pub struct WorkflowStore {
    /// 编译后的工作流缓存
    workflows: Arc<DashMap<String, Arc<CompiledWorkflow>>>,
    /// 工作流编译器，同时串行化所有写入，编译到写入完成之间始终持有
    compiler: Arc<parking_lot::Mutex<WorkflowCompiler>>,
}

impl WorkflowStore {
    /// 创建新的工作流存储
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(WorkflowCompiler::new())),
        }
    }

    /// 获取当前存储的工作流数量
    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// 加载工作流，同名工作流被替换
    #[instrument(skip(self, workflow), fields(workflow = %workflow.workflow_name))]
    pub fn load(&self, workflow: Workflow) -> Result<Arc<CompiledWorkflow>> {
        let mut compiler = self.compiler.lock();
        let compiled = Arc::new(compiler.compile(workflow)?);

        let name = compiled.name().to_string();
        self.workflows.insert(name.clone(), compiled.clone());
        drop(compiler);

        info!("工作流已加载: {}", name);
        Ok(compiled)
    }

    /// 从 JSON 字符串加载工作流，任一定义无效时存储保持不变
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<Vec<String>> {
        let workflows = WorkflowCompiler::parse(json)?;
        self.load_batch(workflows)
    }

    /// 批量加载工作流（全部编译成功后才写入）
    #[instrument(skip(self, workflows), fields(count = workflows.len()))]
    pub fn load_batch(&self, workflows: Vec<Workflow>) -> Result<Vec<String>> {
        let mut compiler = self.compiler.lock();
        let names = self.insert_batch(&mut compiler, workflows)?;
        drop(compiler);

        info!("批量加载完成: {} 个工作流", names.len());
        Ok(names)
    }

    /// 编译并写入一批工作流，调用方必须持有编译器锁
    fn insert_batch(
        &self,
        compiler: &mut WorkflowCompiler,
        workflows: Vec<Workflow>,
    ) -> Result<Vec<String>> {
        let compiled = compiler.compile_all(workflows)?;

        let names: Vec<String> = compiled.iter().map(|w| w.name().to_string()).collect();
        for workflow in compiled {
            self.workflows
                .insert(workflow.name().to_string(), Arc::new(workflow));
        }
        Ok(names)
    }

    /// 用新的工作流集合替换全部内容
    ///
    /// 先写入新实例再移除不再存在的名字，两次集合中都存在的工作流不会出现短暂缺失。
    /// 写入与清理在同一把锁内完成，并发的加载不会被当作过期工作流移除。
    #[instrument(skip(self, workflows), fields(count = workflows.len()))]
    pub fn replace_all(&self, workflows: Vec<Workflow>) -> Result<Vec<String>> {
        let mut compiler = self.compiler.lock();
        let names = self.insert_batch(&mut compiler, workflows)?;

        let keep: HashSet<&str> = names.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .workflows
            .iter()
            .filter(|w| !keep.contains(w.key().as_str()))
            .map(|w| w.key().clone())
            .collect();

        for name in &stale {
            self.workflows.remove(name);
        }
        drop(compiler);

        if !stale.is_empty() {
            info!("已移除 {} 个不再存在的工作流: {:?}", stale.len(), stale);
        }
        Ok(names)
    }

    /// 更新工作流，工作流必须已存在
    #[instrument(skip(self, workflow), fields(workflow = %workflow.workflow_name))]
    pub fn update(&self, workflow: Workflow) -> Result<Arc<CompiledWorkflow>> {
        if !self.workflows.contains_key(&workflow.workflow_name) {
            warn!("更新不存在的工作流: {}", workflow.workflow_name);
            return Err(RuleError::WorkflowNotFound(workflow.workflow_name));
        }

        self.load(workflow)
    }

    /// 删除工作流
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<()> {
        let _compiler = self.compiler.lock();
        if self.workflows.remove(name).is_some() {
            info!("工作流已删除: {}", name);
            Ok(())
        } else {
            warn!("删除不存在的工作流: {}", name);
            Err(RuleError::WorkflowNotFound(name.to_string()))
        }
    }

    /// 获取工作流
    pub fn get(&self, name: &str) -> Result<Arc<CompiledWorkflow>> {
        self.workflows
            .get(name)
            .map(|w| w.value().clone())
            .ok_or_else(|| RuleError::WorkflowNotFound(name.to_string()))
    }

    /// 检查工作流是否存在
    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    /// 获取所有工作流名称（已排序）
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }

    /// 清空所有工作流
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let _compiler = self.compiler.lock();
        let count = self.workflows.len();
        self.workflows.clear();
        info!("已清空 {} 个工作流", count);
    }

    /// 获取存储统计信息
    pub fn stats(&self) -> WorkflowStoreStats {
        let mut stats = WorkflowStoreStats::default();
        for workflow in self.workflows.iter() {
            stats.workflows_count += 1;
            stats.rules_count += workflow.rules().len();
            stats.enabled_rules_count += workflow.enabled_rules();
            stats.total_fields += workflow.input_fields.len();
        }
        stats
    }
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 工作流存储统计信息
#[derive(Debug, Clone, Default)]
pub struct WorkflowStoreStats {
    /// 工作流总数
    pub workflows_count: usize,
    /// 规则总数
    pub rules_count: usize,
    /// 启用的规则数
    pub enabled_rules_count: usize,
    /// 所有工作流引用的输入字段总数
    pub total_fields: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionCall, Argument, ConditionNode, Rule};

    fn sample_workflow(name: &str) -> Workflow {
        Workflow::new(
            name,
            vec![
                Rule::new(
                    "ValidateEmail",
                    ConditionNode::call("is_email", vec![Argument::input("Email")]),
                    ActionCall::set("IsValid", true),
                ),
                Rule::check(
                    "HasPhone",
                    ConditionNode::call("is_not_empty", vec![Argument::input("Phone")]),
                )
                .disabled(),
            ],
        )
    }

    fn sample_json(name: &str) -> String {
        format!(
            r#"
            [
                {{
                    "workflowName": "{}",
                    "rules": [
                        {{
                            "ruleName": "ValidateEmail",
                            "condition": {{
                                "type": "call",
                                "function": "is_email",
                                "args": [{{ "input": "Email" }}]
                            }},
                            "action": {{
                                "function": "value",
                                "args": [{{ "value": true }}],
                                "output": "IsValid"
                            }}
                        }}
                    ]
                }}
            ]
            "#,
            name
        )
    }

    #[test]
    fn test_load_workflow() {
        let store = WorkflowStore::new();
        store.load(sample_workflow("wf-1")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("wf-1"));
        assert_eq!(store.get("wf-1").unwrap().rules().len(), 2);
    }

    #[test]
    fn test_load_from_json() {
        let store = WorkflowStore::new();
        let names = store.load_from_json(&sample_json("wf-1")).unwrap();

        assert_eq!(names, vec!["wf-1"]);
        assert!(store.contains("wf-1"));
    }

    #[test]
    fn test_load_from_invalid_json_keeps_store() {
        let store = WorkflowStore::new();
        store.load(sample_workflow("wf-1")).unwrap();

        assert!(store.load_from_json("{ invalid").is_err());
        assert_eq!(store.list_names(), vec!["wf-1"]);
    }

    #[test]
    fn test_get_missing_workflow() {
        let store = WorkflowStore::new();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, RuleError::WorkflowNotFound(ref name) if name == "nope"));
    }

    #[test]
    fn test_reload_swaps_instance() {
        let store = WorkflowStore::new();
        store.load(sample_workflow("wf-1")).unwrap();
        let before = store.get("wf-1").unwrap();

        store.load(sample_workflow("wf-1")).unwrap();
        let after = store.get("wf-1").unwrap();

        // 旧实例仍然可用，新实例编译版本更高
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.compile_version > before.compile_version);
        assert_eq!(before.rules().len(), 2);
    }

    #[test]
    fn test_update_workflow() {
        let store = WorkflowStore::new();
        assert!(matches!(
            store.update(sample_workflow("wf-1")),
            Err(RuleError::WorkflowNotFound(_))
        ));

        store.load(sample_workflow("wf-1")).unwrap();
        let mut workflow = sample_workflow("wf-1");
        workflow.rules.truncate(1);
        store.update(workflow).unwrap();

        assert_eq!(store.get("wf-1").unwrap().rules().len(), 1);
    }

    #[test]
    fn test_delete_workflow() {
        let store = WorkflowStore::new();
        store.load(sample_workflow("wf-1")).unwrap();

        store.delete("wf-1").unwrap();
        assert!(store.is_empty());
        assert!(store.delete("wf-1").is_err());
    }

    #[test]
    fn test_replace_all() {
        let store = WorkflowStore::new();
        store
            .load_batch(vec![sample_workflow("wf-1"), sample_workflow("wf-2")])
            .unwrap();

        store
            .replace_all(vec![sample_workflow("wf-2"), sample_workflow("wf-3")])
            .unwrap();

        assert_eq!(store.list_names(), vec!["wf-2", "wf-3"]);
    }

    #[test]
    fn test_replace_all_failure_keeps_store() {
        let store = WorkflowStore::new();
        store.load(sample_workflow("wf-1")).unwrap();

        let result = store.replace_all(vec![sample_workflow("wf-2"), sample_workflow("wf-2")]);

        assert!(result.is_err());
        assert_eq!(store.list_names(), vec!["wf-1"]);
    }

    #[test]
    fn test_clear_and_stats() {
        let store = WorkflowStore::new();
        store
            .load_batch(vec![sample_workflow("wf-1"), sample_workflow("wf-2")])
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.workflows_count, 2);
        assert_eq!(stats.rules_count, 4);
        assert_eq!(stats.enabled_rules_count, 2);
        assert_eq!(stats.total_fields, 4);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().workflows_count, 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = WorkflowStore::new();
        let mut handles = vec![];

        for i in 0..10 {
            let store_clone = store.clone();
            handles.push(thread::spawn(move || {
                store_clone.load(sample_workflow(&format!("wf-{}", i))).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_concurrent_replace_all_is_serialized() {
        use std::thread;

        let store = WorkflowStore::new();
        let sets: Vec<Vec<String>> = (0..8)
            .map(|i| vec![format!("set-{}-a", i), format!("set-{}-b", i)])
            .collect();

        let handles: Vec<_> = sets
            .iter()
            .cloned()
            .map(|names| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let workflows = names.iter().map(|n| sample_workflow(n)).collect();
                        store.replace_all(workflows).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 最终内容必须恰好是某一次 replace_all 的集合
        let names = store.list_names();
        assert!(sets.contains(&names), "unexpected store contents: {:?}", names);
    }
}
