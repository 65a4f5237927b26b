//! 共享库
//!
//! 规则引擎各组件共用的配置与可观测性基础设施。

pub mod config;
pub mod observability;
