//! 导出相关命令

use crate::config::ExportSettings;
use crate::core::{ExportEvent, ExportOptions, ExportProgress, ExportTask, Exporter};
use crate::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// 导出结束后保留最终进度的时长
const PROGRESS_RETENTION: Duration = Duration::from_secs(10 * 60);

type ProgressMap = Arc<Mutex<HashMap<String, ExportProgress>>>;

/// 启动导出，立即返回导出 ID
///
/// 进度通过 `export-progress` 事件推送，结束时发送一次 `export-complete`。
pub async fn start_export(options: ExportOptions, state: &AppState) -> Result<String, String> {
    let settings = ExportSettings::load(&state.config_dir);
    let exporter = Exporter::new(settings.to_export_config());

    let file_count = options.files.len();
    let task = exporter.start(options).await.map_err(|e| e.to_string())?;

    let export_id = track_export(task, state).await;
    tracing::debug!("导出任务 {}: {} 个文件, 并发 {}", export_id, file_count, settings.workers);
    Ok(export_id)
}

/// 启动压缩包导出，事件与 `start_export` 相同
///
/// `export-complete` 的结果中 `archivePath` 为生成的压缩包。
pub async fn start_zip_export(options: ExportOptions, state: &AppState) -> Result<String, String> {
    let settings = ExportSettings::load(&state.config_dir);
    let exporter = Exporter::new(settings.to_export_config());

    let file_count = options.files.len();
    let task = exporter.start_zip(options).await.map_err(|e| e.to_string())?;

    let export_id = track_export(task, state).await;
    tracing::debug!("压缩包导出任务 {}: {} 个文件", export_id, file_count);
    Ok(export_id)
}

/// 登记取消令牌并转发导出事件
async fn track_export(mut task: ExportTask, state: &AppState) -> String {
    let export_id = uuid::Uuid::new_v4().to_string();

    // 保存取消令牌
    state
        .export_cancels
        .lock()
        .await
        .insert(export_id.clone(), task.cancel_token());

    let events = state.events.clone();
    let cancels = state.export_cancels.clone();
    let progress_map = state.export_progress.clone();
    let id = export_id.clone();

    tokio::spawn(async move {
        while let Some(event) = task.recv().await {
            match event {
                ExportEvent::Progress(progress) => {
                    progress_map.lock().await.insert(id.clone(), progress.clone());
                    events.emit(
                        "export-progress",
                        serde_json::json!({ "exportId": id, "progress": progress }),
                    );
                }
                ExportEvent::Finished(result) => {
                    cancels.lock().await.remove(&id);
                    events.emit(
                        "export-complete",
                        serde_json::json!({ "exportId": id, "result": result }),
                    );
                }
            }
        }
        // 通道异常关闭时也移除取消令牌
        cancels.lock().await.remove(&id);
        forget_progress_after(progress_map, id, PROGRESS_RETENTION);
    });

    export_id
}

/// 延迟移除已结束导出的进度记录
fn forget_progress_after(map: ProgressMap, export_id: String, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if map.lock().await.remove(&export_id).is_some() {
            tracing::debug!("已清理导出进度: {}", export_id);
        }
    })
}

/// 取消导出任务
pub async fn cancel_export(export_id: String, state: &AppState) -> Result<(), String> {
    let mut cancels = state.export_cancels.lock().await;
    if let Some(token) = cancels.remove(&export_id) {
        token.cancel();
        Ok(())
    } else {
        Err("没有正在运行的导出任务".to_string())
    }
}

/// 获取导出任务最近一次进度
pub async fn get_export_progress(
    export_id: String,
    state: &AppState,
) -> Result<ExportProgress, String> {
    state
        .export_progress
        .lock()
        .await
        .get(&export_id)
        .cloned()
        .ok_or_else(|| "导出任务不存在".to_string())
}

/// 获取导出配置
pub async fn get_export_config(state: &AppState) -> Result<ExportSettings, String> {
    Ok(ExportSettings::load(&state.config_dir))
}

/// 设置导出配置
pub async fn set_export_config(
    workers: Option<usize>,
    progress_buffer: Option<usize>,
    state: &AppState,
) -> Result<ExportSettings, String> {
    let mut settings = ExportSettings::load(&state.config_dir);

    if let Some(w) = workers {
        settings.workers = w;
    }
    if let Some(b) = progress_buffer {
        settings.progress_buffer = b;
    }
    // 限制范围 1-64
    settings.clamp();

    settings.save(&state.config_dir).map_err(|e| e.to_string())?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_progress_is_forgotten_after_delay() {
        let map: ProgressMap = Arc::new(Mutex::new(HashMap::new()));
        map.lock()
            .await
            .insert("done".to_string(), ExportProgress::new(1, 1, 0, String::new()));
        map.lock()
            .await
            .insert("running".to_string(), ExportProgress::new(2, 1, 0, String::new()));

        forget_progress_after(map.clone(), "done".to_string(), Duration::from_millis(10))
            .await
            .unwrap();

        let map = map.lock().await;
        assert!(!map.contains_key("done"));
        assert!(map.contains_key("running"));
    }
}
