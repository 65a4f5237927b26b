//! 规则引擎集成测试
//!
//! 测试完整的规则加载、函数注册、工作流执行流程。

use rule_engine::{
    find_rules_file, function, load_rules_file, ActionCall, Argument, ConditionNode,
    EvaluationOptions, FunctionSet, LogicalGroup, MissingRulesPolicy, ParamType, Record, Rule,
    RuleError, RuleFunction, RuleStatus, RulesEngine, SkipReason, StringUtils, Workflow,
    WorkflowStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn rules_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("rules")
}

/// 加载示例规则文件并注册 StringUtils
fn create_engine() -> RulesEngine {
    let engine = RulesEngine::new();
    engine.register_set(StringUtils).unwrap();

    let path = find_rules_file(&rules_dir(), "FunctionRules.json").unwrap();
    engine.load_from_file(path).unwrap();
    engine
}

fn user_input(email: &str, phone: &str) -> Record {
    Record::from_value(json!({
        "Email": email,
        "Phone": phone,
        "Properties": { "Key1": 1, "Key2": "abc" }
    }))
    .unwrap()
}

fn output_template() -> Record {
    Record::from_value(json!({ "IsValid": false, "MaskedPhone": null })).unwrap()
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserInput {
    email: Option<String>,
    phone: String,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct UserOutput {
    is_valid: bool,
    masked_phone: Option<String>,
}

// ==================== 示例工作流 ====================

#[test]
fn test_user_validation_workflow() {
    let engine = create_engine();

    let outcome = engine
        .evaluate(
            "UserValidationWorkflow",
            &user_input("test@example.com", "13800138000"),
            output_template(),
        )
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert!(outcome.all_succeeded());
    assert_eq!(outcome.output.get("IsValid").unwrap(), &json!(true));
    assert_eq!(outcome.output.get("MaskedPhone").unwrap(), &json!("138****8000"));
}

#[test]
fn test_user_validation_typed() {
    let engine = create_engine();
    let input = UserInput {
        email: Some("test@example.com".to_string()),
        phone: "13800138000".to_string(),
    };

    let (output, results) = engine
        .evaluate_typed("UserValidationWorkflow", &input, UserOutput::default())
        .unwrap();

    assert_eq!(
        output,
        UserOutput {
            is_valid: true,
            masked_phone: Some("138****8000".to_string()),
        }
    );
    assert!(results.iter().all(|r| r.is_success()));
}

#[test]
fn test_null_email_is_invalid() {
    let engine = create_engine();
    let input = UserInput {
        email: None,
        phone: "13800138000".to_string(),
    };

    let (output, results) = engine
        .evaluate_typed("UserValidationWorkflow", &input, UserOutput::default())
        .unwrap();

    assert!(!output.is_valid);
    assert_eq!(results[0].skip_reason, Some(SkipReason::ConditionNotMet));
}

#[test]
fn test_results_follow_declaration_order() {
    let engine = create_engine();

    let outcome = engine
        .evaluate(
            "UserValidationWorkflow",
            &user_input("bad-email", "123"),
            output_template(),
        )
        .unwrap();

    let names: Vec<&str> = outcome.results.iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, vec!["ValidateEmail", "MaskPhone", "TagOutput"]);

    assert_eq!(outcome.results[0].status, RuleStatus::Skipped);
    // 长度不超过保留位数时原样返回
    assert_eq!(outcome.output.get("MaskedPhone").unwrap(), &json!("123"));
    assert_eq!(outcome.results[2].skip_reason, Some(SkipReason::Disabled));
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaggedUserOutput {
    is_valid: bool,
    message: Option<String>,
    masked_phone: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[test]
fn test_enabled_tag_rule_sees_whole_output() {
    let engine = RulesEngine::new();
    engine.register_set(StringUtils).unwrap();

    let mut loaded =
        load_rules_file(&rules_dir(), "FunctionRules.json", MissingRulesPolicy::Error).unwrap();
    for rule in &mut loaded.workflows[0].rules {
        rule.enabled = true;
    }
    engine.replace_all(loaded.workflows).unwrap();

    let mut properties = Map::new();
    properties.insert("Source".to_string(), json!("demo"));
    let template = Record::from_serialize(&TaggedUserOutput {
        properties,
        ..Default::default()
    })
    .unwrap();

    let outcome = engine
        .evaluate(
            "UserValidationWorkflow",
            &user_input("test@example.com", "13800138000"),
            template,
        )
        .unwrap();
    assert!(outcome.all_succeeded());

    let output: TaggedUserOutput = outcome.output.deserialize_into().unwrap();
    assert!(output.is_valid);
    assert_eq!(output.masked_phone.as_deref(), Some("138****8000"));
    assert_eq!(output.properties.get("Source"), Some(&json!("demo")));

    let message = output.message.expect("TagOutput writes Message");
    assert!(uuid::Uuid::parse_str(&message).is_ok());
}

// ==================== 错误隔离 ====================

#[test]
fn test_failing_rule_does_not_stop_later_rules() {
    let engine = RulesEngine::new();
    engine
        .load_workflow(Workflow::new(
            "wf",
            vec![
                Rule::new(
                    "Fails",
                    ConditionNode::call("is_email", vec![Argument::input("Missing")]),
                    ActionCall::set("IsValid", true),
                ),
                Rule::new(
                    "Succeeds",
                    ConditionNode::call("always", vec![]),
                    ActionCall::set("IsValid", true),
                ),
            ],
        ))
        .unwrap();

    let outcome = engine
        .evaluate("wf", &user_input("a@b.c", "1"), output_template())
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].status, RuleStatus::Failed);
    assert_eq!(outcome.results[1].status, RuleStatus::Succeeded);
    assert_eq!(outcome.failed_rules().count(), 1);
    assert_eq!(outcome.output.get("IsValid").unwrap(), &json!(true));
}

#[test]
fn test_error_taxonomy_in_results() {
    let engine = RulesEngine::new();
    engine
        .load_workflow(Workflow::new(
            "wf",
            vec![
                Rule::check("Unknown", ConditionNode::call("no_such_fn", vec![])),
                Rule::check(
                    "Arity",
                    ConditionNode::call("eq", vec![Argument::value(1)]),
                ),
                Rule::check(
                    "Binding",
                    ConditionNode::call("is_empty", vec![Argument::input("Properties.Key3")]),
                ),
                Rule::check(
                    "Type",
                    ConditionNode::call(
                        "starts_with",
                        vec![Argument::input("Properties.Key1"), Argument::value("1")],
                    ),
                ),
            ],
        ))
        .unwrap();

    let outcome = engine
        .evaluate("wf", &user_input("a@b.c", "1"), output_template())
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert!(outcome.results.iter().all(|r| r.status == RuleStatus::Failed));

    let error = |name: &str| outcome.result(name).unwrap().error.clone().unwrap();
    assert!(error("Unknown").contains("no_such_fn"));
    assert!(error("Arity").contains("eq"));
    assert!(error("Binding").contains("Properties.Key3"));
    assert!(error("Type").contains("integer"));
}

#[test]
fn test_workflow_not_found() {
    let engine = create_engine();
    let result = engine.evaluate("NoSuchWorkflow", &user_input("a@b.c", "1"), output_template());
    assert!(matches!(result, Err(RuleError::WorkflowNotFound(_))));
}

#[test]
fn test_malformed_definition_is_rejected() {
    let engine = create_engine();

    let result = engine.load_from_json(
        r#"[{ "workflowName": "broken", "rules": [{ "ruleName": "A", "condition": { "type": "group", "operator": "AND", "children": [] } }] }]"#,
    );

    assert!(matches!(result, Err(RuleError::ParseError(_))));
    assert_eq!(engine.workflow_names(), vec!["UserValidationWorkflow"]);
}

// ==================== 注册 ====================

struct PhoneUtils;

impl FunctionSet for PhoneUtils {
    fn name(&self) -> &str {
        "PhoneUtils"
    }

    fn functions(&self) -> Vec<(String, Arc<dyn RuleFunction>)> {
        let is_mobile: Arc<dyn RuleFunction> = Arc::new(function(
            vec![ParamType::String],
            ParamType::Boolean,
            |args| {
                let phone = args[0].as_str().unwrap_or_default();
                Ok(Value::Bool(
                    phone.len() == 11 && phone.starts_with('1') && phone.chars().all(|c| c.is_ascii_digit()),
                ))
            },
        ));
        vec![("IsMobile".to_string(), is_mobile)]
    }
}

#[test]
fn test_custom_function_set() {
    let engine = create_engine();
    engine.register_set(PhoneUtils).unwrap();
    engine
        .load_from_json(
            r#"
            {
                "workflowName": "PhoneWorkflow",
                "rules": [
                    {
                        "ruleName": "MaskMobileOnly",
                        "condition": {
                            "type": "group",
                            "operator": "AND",
                            "children": [
                                { "type": "call", "function": "PhoneUtils.IsMobile", "args": [{ "input": "Phone" }] },
                                { "type": "call", "function": "is_email", "args": [{ "input": "Email" }] }
                            ]
                        },
                        "action": {
                            "function": "StringUtils.MaskString",
                            "args": [{ "input": "Phone" }, { "value": 3 }, { "value": 4 }],
                            "output": "MaskedPhone"
                        }
                    }
                ]
            }
            "#,
        )
        .unwrap();

    let outcome = engine
        .evaluate("PhoneWorkflow", &user_input("test@example.com", "13800138000"), output_template())
        .unwrap();
    assert_eq!(outcome.output.get("MaskedPhone").unwrap(), &json!("138****8000"));

    let outcome = engine
        .evaluate("PhoneWorkflow", &user_input("test@example.com", "021-1234"), output_template())
        .unwrap();
    assert_eq!(outcome.results[0].status, RuleStatus::Skipped);

    // 两个工作流共享同一个注册表
    assert!(engine.workflow_names().contains(&"UserValidationWorkflow".to_string()));
}

#[test]
fn test_duplicate_registration() {
    let engine = create_engine();

    let result = engine.register_set(StringUtils);
    assert!(matches!(result, Err(RuleError::DuplicateRegistration(_))));

    let result = engine.register_function(
        "mask",
        function(vec![ParamType::String], ParamType::String, |args| Ok(args[0].clone())),
    );
    assert!(matches!(result, Err(RuleError::DuplicateRegistration(ref name)) if name == "mask"));
}

// ==================== 选项 ====================

#[test]
fn test_trace_option() {
    let engine = RulesEngine::new();
    engine
        .load_workflow(Workflow::new(
            "wf",
            vec![Rule::check(
                "Group",
                ConditionNode::Group(LogicalGroup::or(vec![
                    ConditionNode::call("is_email", vec![Argument::input("Email")]),
                    ConditionNode::call("is_empty", vec![Argument::input("Missing")]),
                ])),
            )],
        ))
        .unwrap();

    let outcome = engine
        .evaluate_with(
            "wf",
            &user_input("test@example.com", "1"),
            output_template(),
            &EvaluationOptions::new().with_trace(),
        )
        .unwrap();

    let result = &outcome.results[0];
    assert_eq!(result.status, RuleStatus::Succeeded);
    assert!(result.trace.iter().any(|line| line.contains("短路")));
}

#[test]
fn test_deadline_marks_remaining_rules() {
    let engine = create_engine();

    let outcome = engine
        .evaluate_with(
            "UserValidationWorkflow",
            &user_input("test@example.com", "13800138000"),
            output_template(),
            &EvaluationOptions::new().with_deadline(Instant::now() - Duration::from_millis(1)),
        )
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Aborted);
    assert_eq!(outcome.results[0].skip_reason, Some(SkipReason::DeadlineExceeded));
    assert_eq!(outcome.results[2].skip_reason, Some(SkipReason::Disabled));
    assert_eq!(outcome.output.get("IsValid").unwrap(), &json!(false));
}

// ==================== 并发 ====================

#[test]
fn test_concurrent_evaluations_are_isolated() {
    let engine = create_engine();
    let mut handles = vec![];

    for i in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let phone = format!("1380013{:04}", i);
            let email = if i % 2 == 0 { "test@example.com" } else { "invalid" };

            for _ in 0..50 {
                let outcome = engine
                    .evaluate("UserValidationWorkflow", &user_input(email, &phone), output_template())
                    .unwrap();

                let expected_mask = format!("138****{:04}", i);
                assert_eq!(outcome.output.get("MaskedPhone").unwrap(), &json!(expected_mask));
                assert_eq!(outcome.output.get("IsValid").unwrap(), &json!(i % 2 == 0));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_reload_during_evaluation() {
    let engine = create_engine();
    let workflow = engine.store().get("UserValidationWorkflow").unwrap();

    // 替换为只有一条规则的新版本，已取得的旧实例不受影响
    engine
        .replace_all(vec![Workflow::new(
            "UserValidationWorkflow",
            vec![Rule::new(
                "ValidateEmail",
                ConditionNode::call("StringUtils.IsEmail", vec![Argument::input("Email")]),
                ActionCall::set("IsValid", true),
            )],
        )])
        .unwrap();

    assert_eq!(workflow.rules().len(), 3);

    let outcome = engine
        .evaluate(
            "UserValidationWorkflow",
            &user_input("test@example.com", "13800138000"),
            output_template(),
        )
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.output.get("MaskedPhone").unwrap(), &json!(null));
}
