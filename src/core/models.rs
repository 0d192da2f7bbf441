//! 扫描、过滤、导出共用的数据模型
//!
//! 所有结构体都以 camelCase 字段名序列化，可直接作为前端请求/响应载荷。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 文件类型（封闭集合，新增类型需要扩展枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Word,
    Excel,
    Ppt,
    Image,
    Archive,
    Text,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Word => "word",
            FileType::Excel => "excel",
            FileType::Ppt => "ppt",
            FileType::Image => "image",
            FileType::Archive => "archive",
            FileType::Text => "text",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(FileType::Pdf),
            "word" => Ok(FileType::Word),
            "excel" => Ok(FileType::Excel),
            "ppt" => Ok(FileType::Ppt),
            "image" => Ok(FileType::Image),
            "archive" => Ok(FileType::Archive),
            "text" => Ok(FileType::Text),
            "unknown" => Ok(FileType::Unknown),
            other => Err(format!("未知的文件类型: {}", other)),
        }
    }
}

/// 文件信息（扫描时创建，之后只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "FileInfoRecord")]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// 小写、不带点的扩展名，没有扩展名时为空
    pub extension: String,
    pub file_type: FileType,
    pub is_valid: bool,
    /// 仅当 `is_valid == false` 时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
}

impl FileInfo {
    /// 根据校验结论构造，保证 `invalid_reason` 与 `is_valid` 一致
    pub fn new(
        path: String,
        name: String,
        size: u64,
        mod_time: DateTime<Utc>,
        extension: String,
        file_type: FileType,
        verdict: Result<(), String>,
    ) -> Self {
        let (is_valid, invalid_reason) = match verdict {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        Self {
            path,
            name,
            size,
            mod_time,
            extension,
            file_type,
            is_valid,
            invalid_reason,
        }
    }
}

/// 反序列化时的原始记录，经 [`FileInfo::new`] 归一化
///
/// 以 `isValid` 为准：有效时丢弃 `invalidReason`，无效却缺少原因时补上默认原因。
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileInfoRecord {
    path: String,
    name: String,
    size: u64,
    mod_time: DateTime<Utc>,
    #[serde(default)]
    extension: String,
    file_type: FileType,
    is_valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
}

impl From<FileInfoRecord> for FileInfo {
    fn from(r: FileInfoRecord) -> Self {
        let verdict = if r.is_valid {
            Ok(())
        } else {
            Err(r
                .invalid_reason
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "未知原因".to_string()))
        };
        FileInfo::new(r.path, r.name, r.size, r.mod_time, r.extension, r.file_type, verdict)
    }
}

/// 扫描选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    pub root_path: String,
    /// 仅包含的文件类型（空表示全部）
    #[serde(default)]
    pub include_types: Vec<FileType>,
    /// 排除的路径模式
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    /// 是否验证文件有效性
    #[serde(default)]
    pub validate_files: bool,
}

/// 扫描结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub files: Vec<FileInfo>,
    pub total_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    /// 扫描耗时（秒）
    pub scan_time: f64,
}

impl ScanResult {
    /// 统计数字总是从文件列表推导
    pub fn from_files(files: Vec<FileInfo>, scan_time: f64) -> Self {
        let valid_count = files.iter().filter(|f| f.is_valid).count();
        Self {
            total_count: files.len(),
            valid_count,
            invalid_count: files.len() - valid_count,
            files,
            scan_time,
        }
    }
}

/// 扫描进度
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub current_path: String,
    pub scanned_dirs: usize,
    pub found_files: usize,
    pub current_file: String,
    pub is_scanning: bool,
}

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    ModTime,
    Type,
    Path,
}

impl From<String> for SortKey {
    /// 无法识别的排序字段按名称排序
    fn from(s: String) -> Self {
        match s.as_str() {
            "size" => SortKey::Size,
            "modTime" => SortKey::ModTime,
            "type" => SortKey::Type,
            "path" => SortKey::Path,
            _ => SortKey::Name,
        }
    }
}

impl From<SortKey> for String {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::ModTime => "modTime",
            SortKey::Type => "type",
            SortKey::Path => "path",
        }
        .to_string()
    }
}

/// 过滤选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterOptions {
    pub file_types: Vec<FileType>,
    pub valid_only: bool,
    pub invalid_only: bool,
    pub search_text: String,
    pub min_size: u64,
    /// 0 表示不限制
    pub max_size: u64,
    pub sort_by: SortKey,
    pub sort_desc: bool,
}

/// 过滤结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    pub files: Vec<FileInfo>,
    pub total_count: usize,
}

/// 导出选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    /// 目标路径
    pub dest_path: String,
    /// 要导出的文件列表（调用方已过滤）
    #[serde(default)]
    pub files: Vec<FileInfo>,
    /// 是否保持目录结构
    #[serde(default)]
    pub keep_structure: bool,
    /// 是否覆盖已存在的文件
    #[serde(default)]
    pub overwrite: bool,
    /// 计算相对路径的基准目录（通常是扫描根目录）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    /// 复制后校验内容哈希
    #[serde(default)]
    pub verify: bool,
}

/// 导出进度
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub total: usize,
    /// 已处理数（成功、失败、跳过都计入）
    pub completed: usize,
    pub failed: usize,
    /// 即将开始处理的文件，没有剩余时为空
    pub current: String,
    pub percent: f64,
}

impl ExportProgress {
    pub fn new(total: usize, completed: usize, failed: usize, current: String) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            total,
            completed,
            failed,
            current,
            percent,
        }
    }
}

/// 导出结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: usize,
    pub failed: usize,
    pub failed_files: Vec<String>,
    /// 因目标已存在而跳过的文件（不计入 success 与 failed）
    pub skipped_files: Vec<String>,
    /// 与 failed_files 一一对应的错误描述
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    /// 压缩包导出生成的文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
}

/// 导出事件流中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ExportEvent {
    Progress(ExportProgress),
    Finished(ExportResult),
}

/// 驱动器信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    pub path: String,
    pub label: String,
}
