//! 请求级错误：出现时整个操作中止，不返回部分结果

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("扫描路径不存在: {0}")]
    RootNotFound(String),

    #[error("扫描路径不是目录: {0}")]
    NotADirectory(String),

    #[error("无法读取扫描路径 {path}: {source}")]
    RootUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("操作已取消")]
    Cancelled,

    #[error("扫描任务异常: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("无法创建目标目录 {path}: {source}")]
    DestinationUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("目标路径不是目录: {0}")]
    DestinationNotDirectory(String),
}
