//! 规则引擎性能基准测试
//!
//! 覆盖字符串函数、参数绑定和完整工作流评估。

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rule_engine::functions::string_utils::{is_email, mask_string};
use rule_engine::{
    ActionCall, Argument, ConditionNode, EvaluationOptions, LogicalGroup, Record, Rule,
    RulesEngine, StringUtils, Workflow,
};
use serde_json::json;
use std::hint::black_box;

fn create_engine(rule_count: usize) -> RulesEngine {
    let engine = RulesEngine::new();
    engine.register_set(StringUtils).unwrap();

    let rules = (0..rule_count)
        .map(|i| {
            Rule::new(
                format!("Rule{}", i),
                ConditionNode::Group(LogicalGroup::and(vec![
                    ConditionNode::call("StringUtils.IsEmail", vec![Argument::input("Email")]),
                    ConditionNode::call(
                        "gte",
                        vec![Argument::input("Properties.Key1"), Argument::value(1)],
                    ),
                ])),
                ActionCall::new(
                    "StringUtils.MaskString",
                    vec![Argument::input("Phone"), Argument::value(3), Argument::value(4)],
                )
                .with_output("MaskedPhone"),
            )
        })
        .collect();

    engine.load_workflow(Workflow::new("bench", rules)).unwrap();
    engine
}

fn create_input() -> Record {
    Record::from_value(json!({
        "Email": "test@example.com",
        "Phone": "13800138000",
        "Properties": { "Key1": 1, "Key2": "abc" }
    }))
    .unwrap()
}

fn create_output() -> Record {
    Record::from_value(json!({ "IsValid": false, "MaskedPhone": null })).unwrap()
}

/// 字符串函数基准
fn bench_string_utils(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_utils");

    group.bench_function("is_email", |b| {
        b.iter(|| is_email(black_box(Some("user+tag@mail.example.org"))))
    });

    group.bench_function("mask_string", |b| {
        b.iter(|| mask_string(black_box("13800138000"), black_box(3), black_box(4)))
    });

    group.finish();
}

/// 完整工作流评估基准（不同规则数量）
fn bench_workflow_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("workflow_evaluation");
    let input = create_input();

    for rule_count in [1, 10, 50] {
        let engine = create_engine(rule_count);

        group.bench_with_input(
            BenchmarkId::from_parameter(rule_count),
            &rule_count,
            |b, _| {
                b.iter(|| {
                    engine
                        .evaluate(black_box("bench"), black_box(&input), create_output())
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

/// 追踪开启时的开销
fn bench_trace_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_overhead");
    let engine = create_engine(10);
    let input = create_input();

    for (name, options) in [
        ("disabled", EvaluationOptions::new()),
        ("enabled", EvaluationOptions::new().with_trace()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                engine
                    .evaluate_with("bench", black_box(&input), create_output(), &options)
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_string_utils,
    bench_workflow_evaluation,
    bench_trace_overhead
);
criterion_main!(benches);
