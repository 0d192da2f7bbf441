use docradar_lib::commands::{dispatch, Request, Response};
use docradar_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use docradar_lib::{AppState, EventSink};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// 初始化日志系统
///
/// stdout 用于协议输出，控制台日志只写到 stderr。
fn init_logging() -> Option<WorkerGuard> {
    let log_dir = get_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let config = LogConfig::load(&log_dir);

    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let subscriber = tracing_subscriber::registry();
        let _ = tracing::subscriber::set_global_default(subscriber);
        return None;
    }

    // 创建日志级别过滤器
    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    // 创建文件日志写入器
    match SizeRotatingWriter::new(&log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

            // 文件日志层 - 始终输出到文件
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            // 在 debug 模式下也输出到控制台
            #[cfg(debug_assertions)]
            {
                let console_layer = tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false);

                let subscriber = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .with(console_layer);

                let _ = tracing::subscriber::set_global_default(subscriber);
            }

            // 在 release 模式下只输出到文件
            #[cfg(not(debug_assertions))]
            {
                let subscriber = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer);

                let _ = tracing::subscriber::set_global_default(subscriber);
            }

            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            eprintln!("无法创建日志文件 {}: {}", log_dir.display(), e);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

/// 序列化为一行 JSON 并交给输出任务
fn send_line<T: Serialize>(out: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => tracing::error!("输出序列化失败: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    let _log_guard = init_logging();

    let (events, mut event_rx) = EventSink::channel();
    let state = AppState::new(events)?;
    tracing::info!("docradar 已启动，配置目录: {}", state.config_dir.display());

    // stdout 只由这一个任务写入，响应与事件不会交错
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // 转发事件
    let event_out = out_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            send_line(&event_out, &event);
        }
    });

    // 每条请求独立执行，长时间扫描期间仍可处理取消等命令
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                send_line(
                    &out_tx,
                    &Response::error(serde_json::Value::Null, format!("无效的请求: {}", e)),
                );
                continue;
            }
        };

        let state = state.clone();
        let out = out_tx.clone();
        tokio::spawn(async move {
            let response = dispatch(&state, request).await;
            send_line(&out, &response);
        });
    }

    tracing::info!("输入已关闭，准备退出");
    state.cleanup().await;
    drop(out_tx);
    drop(state);

    // 给已取消的导出留出发送结束事件的时间
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;

    Ok(())
}
