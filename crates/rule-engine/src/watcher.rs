//! 规则文件热更新
//!
//! `FileWorkflowWatcher` 监听规则文件所在目录，文件变更经 debounce 窗口去抖后
//! 重新读取并整体替换引擎中的工作流。新定义无效时保留当前工作流。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::engine::RulesEngine;
use crate::loader;

/// 工作流监听器抽象
#[async_trait]
pub trait WorkflowWatcher: Send + Sync {
    /// 启动监听
    async fn start(&self) -> Result<()>;

    /// 停止监听并释放资源
    async fn stop(&self) -> Result<()>;
}

/// 基于文件系统事件的工作流监听器
pub struct FileWorkflowWatcher {
    engine: RulesEngine,
    /// 监听的规则文件
    rules_path: PathBuf,
    /// debounce 窗口，避免文件连续写入触发多次重载
    debounce: Duration,
    /// 成功重载的次数，订阅方据此得知工作流已更新
    reload_tx: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    /// 活跃的系统监听器，drop 即停止监听
    watcher: Arc<Mutex<Option<RecommendedWatcher>>>,
}

impl FileWorkflowWatcher {
    pub fn new(engine: RulesEngine, rules_path: impl AsRef<Path>, debounce: Duration) -> Self {
        let (reload_tx, _) = watch::channel(0);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            engine,
            rules_path: rules_path.as_ref().to_path_buf(),
            debounce,
            reload_tx,
            shutdown_tx,
            watcher: Arc::new(Mutex::new(None)),
        }
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    /// 订阅重载通知，值为累计成功重载次数
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    /// 立即重新读取规则文件并替换引擎中的工作流
    pub fn reload_now(&self) -> Result<Vec<String>> {
        reload(&self.engine, &self.rules_path, &self.reload_tx)
    }
}

fn reload(engine: &RulesEngine, path: &Path, reload_tx: &watch::Sender<u64>) -> Result<Vec<String>> {
    let workflows = loader::read_workflows(path)
        .with_context(|| format!("读取规则文件失败: {}", path.display()))?;
    let names = engine
        .replace_all(workflows)
        .context("规则文件中的工作流定义无效")?;

    reload_tx.send_modify(|generation| *generation += 1);
    Ok(names)
}

#[async_trait]
impl WorkflowWatcher for FileWorkflowWatcher {
    async fn start(&self) -> Result<()> {
        use notify::{RecursiveMode, Watcher};

        // 监听父目录：编辑器保存文件时常以重命名方式替换原文件
        let watch_dir = match self.rules_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self
            .rules_path
            .file_name()
            .map(|name| name.to_os_string())
            .context("规则文件路径缺少文件名")?;

        // notify 事件通过 channel 转发到 tokio 异步任务
        let (event_tx, mut event_rx) = mpsc::channel::<()>(16);

        // 在阻塞线程中创建 watcher，因为 notify 使用系统原生 API
        let watcher = tokio::task::spawn_blocking({
            let watch_dir = watch_dir.clone();
            move || -> Result<RecommendedWatcher> {
                let mut watcher = notify::recommended_watcher(
                    move |res: std::result::Result<notify::Event, notify::Error>| match res {
                        Ok(event) => {
                            use notify::EventKind;
                            let relevant = matches!(
                                event.kind,
                                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                            ) && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()));
                            if relevant {
                                let _ = event_tx.try_send(());
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "文件监听器事件错误");
                        }
                    },
                )
                .context("创建文件监听器失败")?;

                watcher
                    .watch(&watch_dir, RecursiveMode::NonRecursive)
                    .context("启动文件监听失败")?;

                Ok(watcher)
            }
        })
        .await
        .context("文件监听线程异常退出")??;

        *self.watcher.lock() = Some(watcher);
        info!(path = %self.rules_path.display(), "规则文件监听已启动");

        let engine = self.engine.clone();
        let rules_path = self.rules_path.clone();
        let debounce = self.debounce;
        let reload_tx = self.reload_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // 异步 debounce 循环：收到文件事件后等待 debounce 窗口再重载
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = event_rx.recv() => {
                        // 系统监听器已释放
                        if event.is_none() {
                            info!(path = %rules_path.display(), "文件事件通道已关闭，停止监听");
                            break;
                        }

                        tokio::time::sleep(debounce).await;
                        // 清空积压的重复事件
                        while event_rx.try_recv().is_ok() {}

                        match reload(&engine, &rules_path, &reload_tx) {
                            Ok(names) => {
                                info!(
                                    path = %rules_path.display(),
                                    workflows = ?names,
                                    "规则文件变更，已重新加载"
                                );
                            }
                            Err(e) => {
                                error!(
                                    path = %rules_path.display(),
                                    error = ?e,
                                    "规则文件重新加载失败，保留当前工作流"
                                );
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        // 监听器未调用 stop 即被 drop 时发送端关闭
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则文件监听已停止");
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.watcher.lock().take();
        Ok(())
    }
}
