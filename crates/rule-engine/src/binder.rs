//! 表达式绑定
//!
//! 将函数调用中的参数表达式绑定到当前的输入/输出记录，
//! 校验参数个数和类型后调用注册表中的函数。

use crate::error::{Result, RuleError};
use crate::functions::{FunctionRegistry, RuleFunction};
use crate::models::{Argument, FunctionCall, Record};
use crate::operators::type_name;
use serde_json::Value;
use std::sync::Arc;

/// 已完成绑定的函数调用
pub struct BoundCall {
    pub function: String,
    pub args: Vec<Value>,
    target: Arc<dyn RuleFunction>,
}

impl BoundCall {
    pub fn invoke(&self) -> Result<Value> {
        self.target.call(&self.args)
    }
}

/// 表达式绑定器
///
/// 每次规则评估创建一个，只读借用输入和输出记录。
pub struct Binder<'a> {
    registry: &'a FunctionRegistry,
    input: &'a Record,
    output: &'a Record,
}

impl<'a> Binder<'a> {
    pub fn new(registry: &'a FunctionRegistry, input: &'a Record, output: &'a Record) -> Self {
        Self {
            registry,
            input,
            output,
        }
    }

    /// 解析单个参数表达式
    pub fn resolve(&self, arg: &Argument) -> Result<Value> {
        match arg {
            Argument::Input(path) => self.input.get(path).cloned(),
            Argument::Output(path) => self.output.get(path).cloned(),
            Argument::Value(value) => Ok(value.clone()),
        }
    }

    /// 绑定函数调用
    ///
    /// 依次检查：函数是否存在、参数个数、字段是否存在、参数类型。
    pub fn bind(&self, call: &FunctionCall) -> Result<BoundCall> {
        let target = self.registry.get(&call.function)?;
        let signature = target.signature();

        if !signature.accepts_arity(call.args.len()) {
            return Err(RuleError::Arity {
                function: call.function.clone(),
                expected: signature.arity_label(),
                actual: call.args.len(),
            });
        }

        let mut args = Vec::with_capacity(call.args.len());
        for (i, (arg, param)) in call.args.iter().zip(&signature.params).enumerate() {
            let value = self.resolve(arg)?;
            if !param.accepts(&value) {
                return Err(RuleError::type_mismatch(
                    format!("{} ({} 第 {} 个参数)", param, call.function, i + 1),
                    type_name(&value),
                ));
            }
            args.push(value);
        }

        Ok(BoundCall {
            function: call.function.clone(),
            args,
            target,
        })
    }

    /// 绑定并调用
    pub fn invoke(&self, call: &FunctionCall) -> Result<Value> {
        self.bind(call)?.invoke()
    }

    /// 调用谓词，返回值必须是布尔值
    pub fn evaluate_predicate(&self, call: &FunctionCall) -> Result<bool> {
        match self.invoke(call)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuleError::type_mismatch(
                format!("boolean ({} 返回值)", call.function),
                type_name(&other),
            )),
        }
    }
}
