//! 字符串工具函数：邮箱校验、脱敏
//!
//! 既作为内置函数 `is_email` / `mask` 使用，也以 `StringUtils` 函数集合的形式注册。

use super::{function, FunctionSet, RuleFunction};
use crate::error::{Result, RuleError};
use crate::operators::{type_name, ParamType};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use uuid::Uuid;

/// 脱敏字符
pub const MASK_CHAR: char = '*';

/// `MaskString` 省略保留位数时的默认值
pub const DEFAULT_KEEP: usize = 2;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// 检查字符串是否为 `local@domain.tld` 形式的邮箱，null 或空串返回 false
pub fn is_email(input: Option<&str>) -> bool {
    match input {
        Some(s) if !s.is_empty() => EMAIL_PATTERN.is_match(s),
        _ => false,
    }
}

/// 字符串脱敏：保留前 `keep_start` 和后 `keep_end` 个字符，中间替换为 `*`
///
/// 长度不超过 `keep_start + keep_end` 时原样返回。长度按字符计算。
pub fn mask_string(input: &str, keep_start: usize, keep_end: usize) -> String {
    let len = input.chars().count();
    if len <= keep_start.saturating_add(keep_end) {
        return input.to_string();
    }

    let masked = len - keep_start - keep_end;
    let mut result = String::with_capacity(input.len());
    result.extend(input.chars().take(keep_start));
    result.extend(std::iter::repeat_n(MASK_CHAR, masked));
    result.extend(input.chars().skip(keep_start + masked));
    result
}

pub(crate) fn is_email_fn(args: &[Value]) -> Result<Value> {
    let input = match args.first() {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => return Err(RuleError::type_mismatch("string or null", type_name(other))),
    };
    Ok(Value::Bool(is_email(input)))
}

pub(crate) fn mask_fn(args: &[Value]) -> Result<Value> {
    let input = match args.first() {
        Some(Value::String(s)) => s,
        Some(other) => return Err(RuleError::type_mismatch("string", type_name(other))),
        None => return Err(RuleError::ExecutionError("mask 缺少输入字符串".to_string())),
    };
    let keep_start = keep_count(args.get(1))?;
    let keep_end = keep_count(args.get(2))?;
    Ok(Value::String(mask_string(input, keep_start, keep_end)))
}

fn keep_count(value: Option<&Value>) -> Result<usize> {
    match value {
        None => Ok(DEFAULT_KEEP),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| RuleError::type_mismatch("non-negative integer", type_name(v))),
    }
}

/// `StringUtils` 函数集合
///
/// | 函数 | 参数 | 返回 |
/// |---|---|---|
/// | `StringUtils.IsEmail` | string/null | boolean |
/// | `StringUtils.MaskString` | string, [keepStart=2], [keepEnd=2] | string |
/// | `StringUtils.MethodOnOutput` | object | string（随机 UUID） |
pub struct StringUtils;

impl FunctionSet for StringUtils {
    fn name(&self) -> &str {
        "StringUtils"
    }

    fn functions(&self) -> Vec<(String, Arc<dyn RuleFunction>)> {
        let is_email: Arc<dyn RuleFunction> = Arc::new(function(
            vec![ParamType::NullableString],
            ParamType::Boolean,
            is_email_fn,
        ));
        let mask_string: Arc<dyn RuleFunction> = Arc::new(
            function(
                vec![ParamType::String, ParamType::Integer, ParamType::Integer],
                ParamType::String,
                mask_fn,
            )
            .with_required(1),
        );
        let method_on_output: Arc<dyn RuleFunction> = Arc::new(function(
            vec![ParamType::Object],
            ParamType::String,
            |_| Ok(Value::String(Uuid::new_v4().to_string())),
        ));

        vec![
            ("IsEmail".to_string(), is_email),
            ("MaskString".to_string(), mask_string),
            ("MethodOnOutput".to_string(), method_on_output),
        ]
    }
}
