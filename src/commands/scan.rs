//! 扫描与过滤命令

use crate::config::ScanSettings;
use crate::core::{filter_files as run_filter, FileInfo, FileScanner, FilterOptions, FilterResult};
use crate::core::{ScanOptions, ScanProgress, ScanResult};
use crate::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 扫描目录
///
/// 扫描期间通过 `scan-progress` 事件推送进度，可用 `cancel_scan` 取消。
pub async fn scan_files(
    options: ScanOptions,
    scan_id: Option<String>,
    state: &AppState,
) -> Result<ScanResult, String> {
    let scan_id = scan_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // 创建取消标志
    let cancel_flag = Arc::new(AtomicBool::new(false));
    state
        .scan_cancels
        .lock()
        .await
        .insert(scan_id.clone(), cancel_flag.clone());

    // 在函数结束时清理取消标志
    let cleanup_state = state.scan_cancels.clone();
    let cleanup_id = scan_id.clone();
    scopeguard::defer! {
        tokio::spawn(async move {
            cleanup_state.lock().await.remove(&cleanup_id);
        });
    }

    // 启动进度监听任务
    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<ScanProgress>(100);
    let events = state.events.clone();
    let forward = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            events.emit("scan-progress", &progress);
        }
    });

    let config = ScanSettings::load(&state.config_dir).to_scan_config();
    let scanner = FileScanner::with_config(config)
        .with_cancel(cancel_flag)
        .with_progress(progress_tx);

    let result = scanner.scan(&options).await;

    // 关闭进度通道，等待剩余进度发送完
    drop(scanner);
    let _ = forward.await;

    result.map_err(|e| e.to_string())
}

/// 取消扫描任务
pub async fn cancel_scan(scan_id: String, state: &AppState) -> Result<(), String> {
    let cancels = state.scan_cancels.lock().await;
    if let Some(flag) = cancels.get(&scan_id) {
        flag.store(true, Ordering::Relaxed);
    }
    // 没有正在运行的扫描也返回成功，可能已经结束
    Ok(())
}

/// 过滤并排序文件列表
pub async fn filter_files(
    files: Vec<FileInfo>,
    filter: FilterOptions,
) -> Result<FilterResult, String> {
    Ok(run_filter(&files, &filter))
}
