//! 规则引擎演示程序
//!
//! 查找规则文件，注册 `StringUtils` 函数集合，对示例用户执行验证工作流并打印结果。

use anyhow::{Context, Result};
use clap::Parser;
use rule_engine::{
    describe_metrics, load_rules_file, EngineSettings, FileWorkflowWatcher, MissingRulesPolicy,
    RuleResult, RuleStatus, RulesEngine, StringUtils, WorkflowWatcher,
};
use rules_shared::config::AppConfig;
use rules_shared::observability;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "rules-demo";

#[derive(Parser)]
#[command(name = "rules-demo", version, about = "工作流规则引擎演示")]
struct Cli {
    /// 规则文件路径，不指定时在搜索根目录下查找
    #[arg(long)]
    rules: Option<PathBuf>,

    /// 规则文件搜索根目录
    #[arg(long)]
    root: Option<PathBuf>,

    /// 要执行的工作流
    #[arg(long, default_value = "UserValidationWorkflow")]
    workflow: String,

    /// 输入 JSON 文件，不指定时使用内置示例用户
    #[arg(long)]
    input: Option<PathBuf>,

    /// 打印每条规则的评估追踪
    #[arg(long)]
    trace: bool,

    /// 监听规则文件变更，每次重载后重新评估
    #[arg(long)]
    watch: bool,

    /// 退出前打印 Prometheus 指标快照
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserInput {
    email: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

impl Default for UserInput {
    fn default() -> Self {
        let mut properties = Map::new();
        properties.insert("Key1".to_string(), Value::from(1));
        properties.insert("Key2".to_string(), Value::from("abc"));

        Self {
            email: Some("test@example.com".to_string()),
            phone: Some("13800138000".to_string()),
            properties,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserOutput {
    is_valid: bool,
    message: Option<String>,
    masked_phone: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let mut obs_config = config.observability.clone().with_service_name(SERVICE_NAME);
    obs_config.metrics_enabled |= cli.metrics;
    let _guard = observability::init(&obs_config)?;
    describe_metrics();

    let engine = RulesEngine::with_settings(EngineSettings {
        trace_enabled: cli.trace || config.engine.trace_enabled,
        default_timeout: config.engine.deadline_ms.map(Duration::from_millis),
    });
    engine.register_set(StringUtils)?;

    let rules_path = load_rules(&engine, &cli, &config)?;
    let input = read_input(&cli)?;

    evaluate_and_print(&engine, &cli.workflow, &input, cli.trace);

    if cli.watch || config.rules.watch {
        let rules_path = rules_path.context("未找到规则文件，无法监听变更")?;
        watch_rules(&engine, rules_path, &config, &cli.workflow, &input, cli.trace).await?;
    }

    if cli.metrics {
        if let Some(snapshot) = observability::metrics::render() {
            println!("{}", snapshot);
        }
    }

    Ok(())
}

/// 加载规则文件，返回实际使用的路径
fn load_rules(engine: &RulesEngine, cli: &Cli, config: &AppConfig) -> Result<Option<PathBuf>> {
    if let Some(path) = &cli.rules {
        let names = engine
            .load_from_file(path)
            .with_context(|| format!("加载规则文件失败: {}", path.display()))?;
        info!(path = %path.display(), workflows = ?names, "规则文件已加载");
        return Ok(Some(path.clone()));
    }

    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.rules.search_root));
    let policy: MissingRulesPolicy = config.rules.missing_file_policy.parse()?;

    let loaded = load_rules_file(&root, &config.rules.file_name, policy)?;
    let names = engine.replace_all(loaded.workflows)?;
    info!(root = %root.display(), workflows = ?names, "工作流已加载");

    Ok(loaded.path)
}

fn read_input(cli: &Cli) -> Result<UserInput> {
    match &cli.input {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("读取输入文件失败: {}", path.display()))?;
            serde_json::from_str(&json).context("输入文件格式错误")
        }
        None => Ok(UserInput::default()),
    }
}

fn evaluate_and_print(engine: &RulesEngine, workflow: &str, input: &UserInput, trace: bool) {
    let (output, results) =
        match engine.evaluate_typed(workflow, input, UserOutput::default()) {
            Ok(evaluated) => evaluated,
            Err(e) => {
                eprintln!("工作流执行失败：{}", e);
                return;
            }
        };

    if trace {
        print_trace(&results);
    }

    if results.iter().all(RuleResult::is_success) {
        println!("验证结果：{}", output.is_valid);
        println!("脱敏手机号：{}", output.masked_phone.unwrap_or_default());
        if let Some(message) = output.message {
            println!("附加信息：{}", message);
        }
    } else {
        for result in results.iter().filter(|r| r.status == RuleStatus::Failed) {
            println!(
                "规则 {} 执行失败：{}",
                result.rule_name,
                result.error.as_deref().unwrap_or("未知错误")
            );
        }
    }
}

fn print_trace(results: &[RuleResult]) {
    for result in results {
        println!("[{}] {}", result.status.as_str(), result.rule_name);
        for line in &result.trace {
            println!("    {}", line);
        }
    }
}

/// 监听规则文件，每次重载后重新评估，直到收到关闭信号
async fn watch_rules(
    engine: &RulesEngine,
    rules_path: PathBuf,
    config: &AppConfig,
    workflow: &str,
    input: &UserInput,
    trace: bool,
) -> Result<()> {
    let watcher = FileWorkflowWatcher::new(
        engine.clone(),
        &rules_path,
        Duration::from_millis(config.rules.debounce_ms),
    );
    let mut reloads = watcher.subscribe();
    watcher.start().await?;

    info!(path = %rules_path.display(), "等待规则文件变更，按 Ctrl+C 退出");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = reloads.changed() => {
                if changed.is_err() {
                    warn!("规则监听已关闭");
                    break;
                }
                evaluate_and_print(engine, workflow, input, trace);
            }
            _ = &mut shutdown => break,
        }
    }

    watcher.stop().await?;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
