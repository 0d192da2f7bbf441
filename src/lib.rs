use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub mod commands;
pub mod config;
pub mod core;
pub mod logging;

pub use crate::core::{Exporter, FileScanner};

/// 推送给前端的事件
#[derive(Debug, Clone, Serialize)]
pub struct AppEvent {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// 事件发送端，主循环负责写出
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit<T: Serialize>(&self, event: &'static str, payload: T) {
        match serde_json::to_value(payload) {
            Ok(payload) => {
                let _ = self.tx.send(AppEvent { event, payload });
            }
            Err(e) => tracing::warn!("事件序列化失败 {}: {}", event, e),
        }
    }
}

/// 应用状态，在命令之间共享
#[derive(Clone)]
pub struct AppState {
    pub config_dir: PathBuf,
    pub events: EventSink,
    /// 扫描任务取消标志（使用 AtomicBool 便于跨线程检查）
    pub scan_cancels: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    /// 导出任务取消令牌
    pub export_cancels: Arc<Mutex<HashMap<String, CancellationToken>>>,
    /// 各导出任务最近一次进度，结束后保留一段时间再移除
    pub export_progress: Arc<Mutex<HashMap<String, crate::core::ExportProgress>>>,
}

impl AppState {
    pub fn new(events: EventSink) -> anyhow::Result<Self> {
        Self::with_config_dir(dirs::app_config_dir(), events)
    }

    pub fn with_config_dir(config_dir: PathBuf, events: EventSink) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config_dir)?;
        tracing::debug!("配置目录: {:?}", config_dir);

        Ok(Self {
            config_dir,
            events,
            scan_cancels: Arc::new(Mutex::new(HashMap::new())),
            export_cancels: Arc::new(Mutex::new(HashMap::new())),
            export_progress: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// 清理资源（退出时调用）
    pub async fn cleanup(&self) {
        tracing::info!("正在清理应用资源...");

        // 1. 标记所有扫描任务为已取消
        {
            let cancels = self.scan_cancels.lock().await;
            for (scan_id, flag) in cancels.iter() {
                tracing::debug!("取消扫描任务: {}", scan_id);
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        // 2. 取消所有正在进行的导出，临时文件由导出任务自行删除
        {
            let mut cancels = self.export_cancels.lock().await;
            for (export_id, token) in cancels.drain() {
                tracing::debug!("取消导出任务: {}", export_id);
                token.cancel();
            }
        }

        tracing::info!("资源清理完成");
    }
}

pub mod dirs {
    use std::path::PathBuf;

    /// 覆盖配置目录的环境变量
    pub const CONFIG_DIR_ENV: &str = "DOCRADAR_CONFIG_DIR";

    /// 应用配置目录
    pub fn app_config_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        config_dir()
            .map(|p| p.join("docradar"))
            .unwrap_or_else(|| PathBuf::from(".docradar"))
    }

    pub fn home_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        } else {
            std::env::var("HOME").ok().map(PathBuf::from)
        }
    }

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        }
    }
}
