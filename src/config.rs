//! 应用配置模块
//!
//! 所有配置保存在 `<config_dir>/config.json` 中，按分区存放，
//! 保存一个分区时保留文件中的其他分区。

use crate::core::{ExportConfig, ScanConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

const CONFIG_FILE: &str = "config.json";

/// 读取配置分区，文件或分区缺失、格式错误时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, section: &str) -> T {
    fs::read_to_string(config_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(section).cloned())
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// 写入配置分区
pub fn save_section<T: Serialize>(config_dir: &Path, section: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[section] = serde_json::to_value(value).map_err(io::Error::other)?;

    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(&config_file, content)
}

/// 扫描配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    /// 并发校验数，0 表示按 CPU 核数
    #[serde(default)]
    pub workers: usize,
    /// 是否启用默认排除规则
    #[serde(default = "default_true")]
    pub default_excludes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            default_excludes: true,
        }
    }
}

impl ScanSettings {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "scan")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "scan", self)
    }

    pub fn to_scan_config(&self) -> ScanConfig {
        let mut config = ScanConfig {
            default_excludes: self.default_excludes,
            ..Default::default()
        };
        if self.workers > 0 {
            config.workers = self.workers;
        }
        config
    }
}

/// 导出配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// 并发复制数（1-64）
    #[serde(default = "default_export_workers")]
    pub workers: usize,
    /// 进度事件缓冲数量
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

fn default_export_workers() -> usize {
    4
}

fn default_progress_buffer() -> usize {
    100
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            workers: default_export_workers(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl ExportSettings {
    pub fn load(config_dir: &Path) -> Self {
        let mut settings: Self = load_section(config_dir, "export");
        settings.clamp();
        settings
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "export", self)
    }

    /// 限制到合法范围
    pub fn clamp(&mut self) {
        self.workers = self.workers.clamp(1, 64);
        self.progress_buffer = self.progress_buffer.clamp(1, 10_000);
    }

    pub fn to_export_config(&self) -> ExportConfig {
        ExportConfig {
            workers: self.workers,
            progress_buffer: self.progress_buffer,
        }
    }
}
