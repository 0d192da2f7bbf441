//! 命令层：一行一个 JSON 请求，返回一行 JSON 响应
//!
//! 请求 `{"id": .., "command": "scan_files", "args": {..}}`，
//! 响应 `{"id": .., "ok": ..}` 或 `{"id": .., "error": ".."}`。

pub mod drives;
pub mod export;
pub mod log;
pub mod scan;

use crate::core::{ExportOptions, FileInfo, FilterOptions, ScanOptions};
use crate::AppState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, value: Value) -> Self {
        Self {
            id,
            ok: Some(value),
            error: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: None,
            error: Some(message.into()),
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() {
        serde_json::json!({})
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| format!("参数错误: {}", e))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("结果序列化失败: {}", e))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanArgs {
    options: ScanOptions,
    #[serde(default)]
    scan_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanIdArgs {
    scan_id: String,
}

#[derive(Deserialize)]
struct FilterArgs {
    #[serde(default)]
    files: Vec<FileInfo>,
    #[serde(default)]
    filter: FilterOptions,
}

#[derive(Deserialize)]
struct ExportArgs {
    options: ExportOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportIdArgs {
    export_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogConfigArgs {
    enabled: Option<bool>,
    max_size_mb: Option<u32>,
    level: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportConfigArgs {
    workers: Option<usize>,
    progress_buffer: Option<usize>,
}

/// 执行一条请求
pub async fn dispatch(state: &AppState, request: Request) -> Response {
    tracing::debug!("收到命令: {}", request.command);
    match route(state, &request.command, request.args).await {
        Ok(value) => Response::ok(request.id, value),
        Err(e) => {
            tracing::warn!("命令 {} 失败: {}", request.command, e);
            Response::error(request.id, e)
        }
    }
}

async fn route(state: &AppState, command: &str, args: Value) -> Result<Value, String> {
    match command {
        "scan_files" => {
            let a: ScanArgs = parse_args(args)?;
            to_value(scan::scan_files(a.options, a.scan_id, state).await?)
        }
        "cancel_scan" => {
            let a: ScanIdArgs = parse_args(args)?;
            to_value(scan::cancel_scan(a.scan_id, state).await?)
        }
        "filter_files" => {
            let a: FilterArgs = parse_args(args)?;
            to_value(scan::filter_files(a.files, a.filter).await?)
        }
        "start_export" => {
            let a: ExportArgs = parse_args(args)?;
            to_value(export::start_export(a.options, state).await?)
        }
        "start_zip_export" => {
            let a: ExportArgs = parse_args(args)?;
            to_value(export::start_zip_export(a.options, state).await?)
        }
        "cancel_export" => {
            let a: ExportIdArgs = parse_args(args)?;
            to_value(export::cancel_export(a.export_id, state).await?)
        }
        "get_export_progress" => {
            let a: ExportIdArgs = parse_args(args)?;
            to_value(export::get_export_progress(a.export_id, state).await?)
        }
        "get_export_config" => to_value(export::get_export_config(state).await?),
        "set_export_config" => {
            let a: ExportConfigArgs = parse_args(args)?;
            to_value(export::set_export_config(a.workers, a.progress_buffer, state).await?)
        }
        "get_drives" => to_value(drives::get_drives().await?),
        "get_log_config" => to_value(log::get_log_config(state).await?),
        "set_log_config" => {
            let a: LogConfigArgs = parse_args(args)?;
            to_value(log::set_log_config(a.enabled, a.max_size_mb, a.level, state).await?)
        }
        other => Err(format!("未知命令: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AppEvent, EventSink};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn state() -> (TempDir, AppState, UnboundedReceiver<AppEvent>) {
        let dir = TempDir::new().unwrap();
        let (sink, rx) = EventSink::channel();
        let state = AppState::with_config_dir(dir.path().join("config"), sink).unwrap();
        (dir, state, rx)
    }

    async fn call(state: &AppState, command: &str, args: Value) -> Response {
        let request: Request = serde_json::from_value(json!({
            "id": 1,
            "command": command,
            "args": args,
        }))
        .unwrap();
        dispatch(state, request).await
    }

    async fn wait_for(rx: &mut UnboundedReceiver<AppEvent>, name: &str) -> AppEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("事件通道已关闭");
                if event.event == name {
                    return event;
                }
            }
        })
        .await
        .expect("等待事件超时")
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (_dir, state, _rx) = state();
        let response = call(&state, "format_disk", Value::Null).await;
        assert!(response.ok.is_none());
        assert_eq!(response.error.as_deref(), Some("未知命令: format_disk"));

        let raw = serde_json::to_value(&response).unwrap();
        assert_eq!(raw, json!({"id": 1, "error": "未知命令: format_disk"}));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let (_dir, state, _rx) = state();
        let response = call(&state, "scan_files", json!({"options": 5})).await;
        assert!(response.error.unwrap().starts_with("参数错误"));
    }

    #[tokio::test]
    async fn test_scan_filter_export_flow() {
        let (dir, state, mut rx) = state();
        let root = dir.path().join("docs");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), "hello world\n").unwrap();
        std::fs::write(root.join("sub/b.csv"), "x,y\n1,2\n").unwrap();

        let scan = call(
            &state,
            "scan_files",
            json!({"options": {"rootPath": root.display().to_string(), "validateFiles": true}}),
        )
        .await;
        let scan = scan.ok.unwrap();
        assert_eq!(scan["totalCount"], 2);
        wait_for(&mut rx, "scan-progress").await;

        let filtered = call(
            &state,
            "filter_files",
            json!({"files": scan["files"], "filter": {"searchText": "B.CSV"}}),
        )
        .await
        .ok
        .unwrap();
        assert_eq!(filtered["totalCount"], 1);

        let dest = dir.path().join("out");
        let export_id = call(
            &state,
            "start_export",
            json!({"options": {
                "destPath": dest.display().to_string(),
                "files": scan["files"],
                "keepStructure": true,
                "basePath": root.display().to_string(),
            }}),
        )
        .await
        .ok
        .unwrap();

        let complete = wait_for(&mut rx, "export-complete").await;
        assert_eq!(complete.payload["exportId"], export_id);
        assert_eq!(complete.payload["result"]["success"], 2);
        assert!(dest.join("sub/b.csv").is_file());

        let progress = call(
            &state,
            "get_export_progress",
            json!({"exportId": export_id}),
        )
        .await
        .ok
        .unwrap();
        assert_eq!(progress["percent"], 100.0);

        // 已结束的导出无法取消
        let cancel = call(&state, "cancel_export", json!({"exportId": export_id})).await;
        assert!(cancel.error.is_some());
    }

    #[tokio::test]
    async fn test_zip_export_reports_archive_path() {
        let (dir, state, mut rx) = state();
        let root = dir.path().join("docs");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), "hello world\n").unwrap();
        std::fs::write(root.join("sub/b.txt"), "bravo\n").unwrap();

        let scan = call(
            &state,
            "scan_files",
            json!({"options": {"rootPath": root.display().to_string()}}),
        )
        .await
        .ok
        .unwrap();

        let dest = dir.path().join("out");
        let export_id = call(
            &state,
            "start_zip_export",
            json!({"options": {
                "destPath": dest.display().to_string(),
                "files": scan["files"],
                "keepStructure": true,
                "basePath": root.display().to_string(),
            }}),
        )
        .await
        .ok
        .unwrap();

        let complete = wait_for(&mut rx, "export-complete").await;
        assert_eq!(complete.payload["exportId"], export_id);
        let result = &complete.payload["result"];
        assert_eq!(result["success"], 2);
        let archive = std::path::PathBuf::from(result["archivePath"].as_str().unwrap());
        assert_eq!(archive.parent().unwrap(), dest.as_path());

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);
        assert!(zip.by_name("sub/b.txt").is_ok());
    }

    #[tokio::test]
    async fn test_export_to_file_path_is_request_error() {
        let (dir, state, _rx) = state();
        let file = dir.path().join("plain");
        std::fs::write(&file, "x").unwrap();
        let response = call(
            &state,
            "start_export",
            json!({"options": {"destPath": file.display().to_string()}}),
        )
        .await;
        assert!(response.error.unwrap().contains("不是目录"));
    }

    #[tokio::test]
    async fn test_config_commands() {
        let (_dir, state, _rx) = state();

        let log = call(&state, "set_log_config", json!({"maxSizeMb": 500, "level": "Debug"}))
            .await
            .ok
            .unwrap();
        assert_eq!(log["maxSizeMb"], 100);
        assert_eq!(log["level"], "debug");

        let bad = call(&state, "set_log_config", json!({"level": "loud"})).await;
        assert!(bad.error.is_some());
        let log = call(&state, "get_log_config", Value::Null).await.ok.unwrap();
        assert_eq!(log["level"], "debug");

        let export = call(&state, "set_export_config", json!({"workers": 0}))
            .await
            .ok
            .unwrap();
        assert_eq!(export["workers"], 1);
        let export = call(&state, "get_export_config", Value::Null).await.ok.unwrap();
        assert_eq!(export["progressBuffer"], 100);
    }

    #[tokio::test]
    async fn test_cancel_unknown_scan_is_ok() {
        let (_dir, state, _rx) = state();
        let response = call(&state, "cancel_scan", json!({"scanId": "missing"})).await;
        assert_eq!(response.ok, Some(Value::Null));
    }
}
