//! 内置函数
//!
//! 比较、包含、字符串、时间、空值检查等谓词，以及邮箱校验、脱敏和取值动作。
//! 数值比较统一转为浮点数；不做字符串到数值的隐式转换。

use super::string_utils::{is_email_fn, mask_fn};
use super::{function, RuleFunction, Signature};
use crate::error::{Result, RuleError};
use crate::operators::{type_name, ParamType};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

fn entry(name: &str, f: impl RuleFunction + 'static) -> (String, Arc<dyn RuleFunction>) {
    (name.to_string(), Arc::new(f))
}

/// 全部内置函数
pub fn functions() -> Vec<(String, Arc<dyn RuleFunction>)> {
    use ParamType::*;

    vec![
        entry("is_email", function(vec![NullableString], Boolean, is_email_fn)),
        entry(
            "mask",
            function(vec![String, Integer, Integer], String, mask_fn).with_required(1),
        ),
        entry("is_empty", function(vec![Any], Boolean, |args| {
            Ok(Value::Bool(is_empty(args.first())))
        })),
        entry("is_not_empty", function(vec![Any], Boolean, |args| {
            Ok(Value::Bool(!is_empty(args.first())))
        })),
        entry("eq", function(vec![Any, Any], Boolean, |args| {
            Ok(Value::Bool(values_eq(arg(args, 0)?, arg(args, 1)?)))
        })),
        entry("neq", function(vec![Any, Any], Boolean, |args| {
            Ok(Value::Bool(!values_eq(arg(args, 0)?, arg(args, 1)?)))
        })),
        entry("gt", compare(|a, b| a > b)),
        entry("gte", compare(|a, b| a >= b)),
        entry("lt", compare(|a, b| a < b)),
        entry("lte", compare(|a, b| a <= b)),
        entry("between", function(vec![Number, Number, Number], Boolean, |args| {
            let n = arg_f64(args, 0)?;
            Ok(Value::Bool(n >= arg_f64(args, 1)? && n <= arg_f64(args, 2)?))
        })),
        entry("in", function(vec![Any, Array], Boolean, |args| {
            let needle = arg(args, 0)?;
            Ok(Value::Bool(arg_array(args, 1)?.iter().any(|item| values_eq(needle, item))))
        })),
        entry("contains", function(vec![Any, Any], Boolean, |args| {
            contains(arg(args, 0)?, arg(args, 1)?).map(Value::Bool)
        })),
        entry("contains_any", function(vec![Array, Array], Boolean, |args| {
            let haystack = arg_array(args, 0)?;
            let found = arg_array(args, 1)?
                .iter()
                .any(|expected| haystack.iter().any(|item| values_eq(item, expected)));
            Ok(Value::Bool(found))
        })),
        entry("contains_all", function(vec![Array, Array], Boolean, |args| {
            let haystack = arg_array(args, 0)?;
            let found = arg_array(args, 1)?
                .iter()
                .all(|expected| haystack.iter().any(|item| values_eq(item, expected)));
            Ok(Value::Bool(found))
        })),
        entry("starts_with", function(vec![String, String], Boolean, |args| {
            Ok(Value::Bool(arg_str(args, 0)?.starts_with(arg_str(args, 1)?)))
        })),
        entry("ends_with", function(vec![String, String], Boolean, |args| {
            Ok(Value::Bool(arg_str(args, 0)?.ends_with(arg_str(args, 1)?)))
        })),
        entry("regex", RegexFunction::new()),
        entry("before", time_compare(|a, b| a < b)),
        entry("after", time_compare(|a, b| a > b)),
        entry("always", function(vec![], Boolean, |_| Ok(Value::Bool(true)))),
        entry("not", function(vec![Boolean], Boolean, |args| {
            let b = arg(args, 0)?
                .as_bool()
                .ok_or_else(|| RuleError::type_mismatch("boolean", type_name(&args[0])))?;
            Ok(Value::Bool(!b))
        })),
        entry("value", function(vec![Any], Any, |args| Ok(arg(args, 0)?.clone()))),
    ]
}

fn compare(cmp: fn(f64, f64) -> bool) -> impl RuleFunction {
    function(vec![ParamType::Number, ParamType::Number], ParamType::Boolean, move |args| {
        Ok(Value::Bool(cmp(arg_f64(args, 0)?, arg_f64(args, 1)?)))
    })
}

fn time_compare(cmp: fn(DateTime<Utc>, DateTime<Utc>) -> bool) -> impl RuleFunction {
    function(vec![ParamType::String, ParamType::String], ParamType::Boolean, move |args| {
        let field_time = parse_datetime(arg_str(args, 0)?)?;
        let expected_time = parse_datetime(arg_str(args, 1)?)?;
        Ok(Value::Bool(cmp(field_time, expected_time)))
    })
}

/// 正则匹配，编译结果按模式缓存
struct RegexFunction {
    signature: Signature,
    cache: DashMap<String, Regex>,
}

impl RegexFunction {
    fn new() -> Self {
        Self {
            signature: Signature::new(
                vec![ParamType::String, ParamType::String],
                ParamType::Boolean,
            ),
            cache: DashMap::new(),
        }
    }
}

impl RuleFunction for RegexFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        let s = arg_str(args, 0)?;
        let pattern = arg_str(args, 1)?;

        if let Some(regex) = self.cache.get(pattern) {
            return Ok(Value::Bool(regex.is_match(s)));
        }

        let regex = Regex::new(pattern).map_err(|e| {
            RuleError::ExecutionError(format!("无效的正则表达式 '{}': {}", pattern, e))
        })?;
        let matched = regex.is_match(s);
        self.cache.insert(pattern.to_string(), regex);
        Ok(Value::Bool(matched))
    }
}

/// 判断值是否为空
fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None => true,
        Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(arr)) => arr.is_empty(),
        Some(Value::Object(obj)) => obj.is_empty(),
        _ => false,
    }
}

/// 相等比较
///
/// 数值统一转为浮点数比较（100 == 100.0），其他类型直接比较。
pub(crate) fn values_eq(a: &Value, b: &Value) -> bool {
    if let (Value::Number(n1), Value::Number(n2)) = (a, b) {
        if let (Some(f1), Some(f2)) = (n1.as_f64(), n2.as_f64()) {
            return (f1 - f2).abs() < f64::EPSILON;
        }
    }
    a == b
}

/// 字符串/数组包含检查
fn contains(field: &Value, expected: &Value) -> Result<bool> {
    match field {
        Value::String(s) => {
            let substr = expected
                .as_str()
                .ok_or_else(|| RuleError::type_mismatch("string", type_name(expected)))?;
            Ok(s.contains(substr))
        }
        Value::Array(arr) => Ok(arr.iter().any(|item| values_eq(item, expected))),
        _ => Err(RuleError::type_mismatch("string or array", type_name(field))),
    }
}

/// 解析日期时间（RFC 3339 或 YYYY-MM-DD）
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| RuleError::ExecutionError(format!("无法解析日期时间: '{}'", s)))
}

fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| RuleError::ExecutionError(format!("缺少第 {} 个参数", index + 1)))
}

fn arg_str(args: &[Value], index: usize) -> Result<&str> {
    let value = arg(args, index)?;
    value
        .as_str()
        .ok_or_else(|| RuleError::type_mismatch("string", type_name(value)))
}

fn arg_f64(args: &[Value], index: usize) -> Result<f64> {
    let value = arg(args, index)?;
    value
        .as_f64()
        .ok_or_else(|| RuleError::type_mismatch("number", type_name(value)))
}

fn arg_array(args: &[Value], index: usize) -> Result<&Vec<Value>> {
    let value = arg(args, index)?;
    value
        .as_array()
        .ok_or_else(|| RuleError::type_mismatch("array", type_name(value)))
}
