//! 日志相关命令

use crate::logging::LogConfig;
use crate::AppState;

/// 获取日志配置
pub async fn get_log_config(state: &AppState) -> Result<LogConfig, String> {
    Ok(LogConfig::load(&state.config_dir))
}

/// 设置日志配置，重启后生效
pub async fn set_log_config(
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
    state: &AppState,
) -> Result<LogConfig, String> {
    let mut config = LogConfig::load(&state.config_dir);

    if let Some(e) = enabled {
        config.enabled = e;
    }
    if let Some(size) = max_size_mb {
        // 限制范围 1-100 MB
        config.max_size_mb = size.clamp(1, 100);
    }
    if let Some(l) = level {
        config.set_level(&l)?;
    }

    config.save(&state.config_dir).map_err(|e| e.to_string())?;

    Ok(config)
}
