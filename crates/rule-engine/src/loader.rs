//! 规则文件查找与读取

use crate::compiler::WorkflowCompiler;
use crate::error::{Result, RuleError};
use crate::models::Workflow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

/// 找不到规则文件时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingRulesPolicy {
    /// 返回 `RulesNotFound` 错误
    #[default]
    Error,
    /// 以空工作流集合启动
    Empty,
}

impl FromStr for MissingRulesPolicy {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "empty" => Ok(Self::Empty),
            other => Err(RuleError::ParseError(format!(
                "未知的规则文件缺失策略: {} (可选 error / empty)",
                other
            ))),
        }
    }
}

/// 规则文件读取结果
#[derive(Debug, Clone)]
pub struct LoadedRules {
    /// 实际读取的文件，按 `Empty` 策略跳过时为 `None`
    pub path: Option<PathBuf>,
    pub workflows: Vec<Workflow>,
}

/// 在 `root` 下递归查找名为 `file_name` 的文件
///
/// 多个匹配时取层级最浅的一个，同一层级按路径排序，跳过隐藏目录。
pub fn find_rules_file(root: &Path, file_name: &str) -> Result<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .min_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.path().cmp(b.path())))
        .map(DirEntry::into_path)
        .ok_or_else(|| RuleError::RulesNotFound {
            root: root.to_path_buf(),
            file_name: file_name.to_string(),
        })
}

/// 读取并解析规则文件
pub fn read_workflows(path: &Path) -> Result<Vec<Workflow>> {
    let json = fs::read_to_string(path)?;
    WorkflowCompiler::parse(&json)
}

/// 查找并读取规则文件，找不到时按 `policy` 处理
pub fn load_rules_file(
    root: &Path,
    file_name: &str,
    policy: MissingRulesPolicy,
) -> Result<LoadedRules> {
    let path = match find_rules_file(root, file_name) {
        Ok(path) => path,
        Err(e @ RuleError::RulesNotFound { .. }) => match policy {
            MissingRulesPolicy::Error => return Err(e),
            MissingRulesPolicy::Empty => {
                warn!(root = %root.display(), file_name, "未找到规则文件，以空工作流集合启动");
                return Ok(LoadedRules {
                    path: None,
                    workflows: Vec::new(),
                });
            }
        },
        Err(e) => return Err(e),
    };

    let workflows = read_workflows(&path)?;
    info!(path = %path.display(), count = workflows.len(), "规则文件已读取");

    Ok(LoadedRules {
        path: Some(path),
        workflows,
    })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}
