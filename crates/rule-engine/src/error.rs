//! 规则引擎错误类型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("工作流定义解析失败: {0}")]
    ParseError(String),

    #[error("函数执行失败: {0}")]
    ExecutionError(String),

    #[error("未知的函数: {name}")]
    UnknownFunction { name: String },

    #[error("参数个数不匹配: {function} 需要 {expected} 个参数, 实际 {actual} 个")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("字段绑定失败: {path} ({reason})")]
    Binding { path: String, reason: String },

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("工作流未找到: {0}")]
    WorkflowNotFound(String),

    #[error("函数名已注册: {0}")]
    DuplicateRegistration(String),

    #[error("规则文件未找到: 在 {root} 下找不到 {file_name}")]
    RulesNotFound { root: PathBuf, file_name: String },

    #[error("读取规则文件失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn binding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Binding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
