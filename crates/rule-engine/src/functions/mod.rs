//! 函数库
//!
//! 条件和动作都通过名字调用注册表中的纯函数。
//!
//! - `RuleFunction`: 带签名的函数
//! - `FunctionSet`: 一组以 `集合名.函数名` 注册的函数（替代按类型名注册）
//! - `FunctionRegistry`: 名字到函数的注册表，内置函数见 [`builtin`]

pub mod builtin;
pub mod string_utils;

use crate::error::{Result, RuleError};
use crate::operators::ParamType;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub use string_utils::StringUtils;

/// 函数签名
///
/// `required` 之后的参数可省略，由函数自行取默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamType>,
    pub required: usize,
    pub returns: ParamType,
}

impl Signature {
    pub fn new(params: Vec<ParamType>, returns: ParamType) -> Self {
        Self {
            required: params.len(),
            params,
            returns,
        }
    }

    pub fn with_required(mut self, required: usize) -> Self {
        self.required = required.min(self.params.len());
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        count >= self.required && count <= self.params.len()
    }

    /// 参数个数描述，如 "3" 或 "1-3"
    pub fn arity_label(&self) -> String {
        if self.required == self.params.len() {
            self.required.to_string()
        } else {
            format!("{}-{}", self.required, self.params.len())
        }
    }
}

/// 可按名字调用的函数
///
/// 实现必须无副作用：同一工作流会被多个线程并发评估。
pub trait RuleFunction: Send + Sync {
    fn signature(&self) -> &Signature;

    fn call(&self, args: &[Value]) -> Result<Value>;
}

/// 基于闭包的函数实现
pub struct FnFunction<F> {
    signature: Signature,
    f: F,
}

impl<F> RuleFunction for FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        (self.f)(args)
    }
}

/// 用闭包构造函数
pub fn function<F>(params: Vec<ParamType>, returns: ParamType, f: F) -> FnFunction<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    FnFunction {
        signature: Signature::new(params, returns),
        f,
    }
}

impl<F> FnFunction<F> {
    /// 声明后面的参数可省略
    pub fn with_required(mut self, required: usize) -> Self {
        self.signature = self.signature.with_required(required);
        self
    }
}

/// 函数集合
///
/// 集合中的每个函数以 `{name}.{function}` 的形式注册。
pub trait FunctionSet {
    fn name(&self) -> &str;

    fn functions(&self) -> Vec<(String, Arc<dyn RuleFunction>)>;
}

/// 函数注册表
///
/// 查询走 DashMap 无需全局锁；注册操作串行化，保证函数集合整体注册或整体失败。
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<dyn RuleFunction>>,
    register_lock: Mutex<()>,
}

impl FunctionRegistry {
    /// 创建包含内置函数的注册表
    pub fn new() -> Self {
        let registry = Self::empty();
        for (name, function) in builtin::functions() {
            registry.functions.insert(name, function);
        }
        registry
    }

    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            functions: DashMap::new(),
            register_lock: Mutex::new(()),
        }
    }

    /// 注册单个函数，名字冲突时返回 `DuplicateRegistration`
    pub fn register(
        &self,
        name: impl Into<String>,
        function: impl RuleFunction + 'static,
    ) -> Result<()> {
        self.register_arc(name.into(), Arc::new(function))
    }

    pub fn register_arc(&self, name: String, function: Arc<dyn RuleFunction>) -> Result<()> {
        let _guard = self.register_lock.lock();
        Self::validate_name(&name)?;
        if self.functions.contains_key(&name) {
            return Err(RuleError::DuplicateRegistration(name));
        }

        debug!(function = %name, arity = function.signature().arity(), "函数已注册");
        self.functions.insert(name, function);
        Ok(())
    }

    /// 注册函数集合，返回注册的完整函数名
    pub fn register_set(&self, set: &dyn FunctionSet) -> Result<Vec<String>> {
        let _guard = self.register_lock.lock();

        let set_name = set.name();
        Self::validate_name(set_name)?;

        let entries: Vec<(String, Arc<dyn RuleFunction>)> = set
            .functions()
            .into_iter()
            .map(|(name, function)| (format!("{}.{}", set_name, name), function))
            .collect();

        // 先整体检查，任何冲突都不注册
        for (i, (name, _)) in entries.iter().enumerate() {
            if self.functions.contains_key(name) || entries[..i].iter().any(|(n, _)| n == name) {
                return Err(RuleError::DuplicateRegistration(name.clone()));
            }
        }

        let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
        for (name, function) in entries {
            self.functions.insert(name, function);
        }

        info!(set = %set_name, count = names.len(), "函数集合已注册");
        Ok(names)
    }

    /// 按名字查找函数
    pub fn get(&self, name: &str) -> Result<Arc<dyn RuleFunction>> {
        self.functions
            .get(name)
            .map(|f| f.value().clone())
            .ok_or_else(|| RuleError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// 所有函数名（已排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(RuleError::ParseError("函数名不能为空".to_string()));
        }
        Ok(())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
