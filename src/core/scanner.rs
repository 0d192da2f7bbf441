use super::classifier::{classify, file_type_for_extension, normalize_extension};
use super::error::ScanError;
use super::models::{FileInfo, FileType, ScanOptions, ScanProgress, ScanResult};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 默认排除的路径（按完整路径组件匹配）
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // macOS
    "Library/Containers",
    "Library/Caches",
    "Library/Application Support",
    // 通用
    "node_modules",
    ".git",
    ".svn",
    // Windows
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// 只在卷根目录下排除的 Windows 系统目录
const WINDOWS_SYSTEM_DIRS: &[&str] = &["windows", "program files", "program files (x86)", "programdata"];

/// 进度上报间隔
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 并发校验的文件数
    pub workers: usize,
    /// 是否启用默认排除规则
    pub default_excludes: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            default_excludes: true,
        }
    }
}

/// 单条排除规则
#[derive(Debug)]
enum ExcludeRule {
    /// 通配符；不含 `/` 的模式同时匹配文件名
    Glob { regex: Regex, match_name: bool },
    /// 绝对路径前缀
    Prefix(String),
    /// 连续的完整路径组件
    Components(Vec<String>),
}

/// 编译后的排除规则
///
/// 所有路径先统一为 `/` 分隔并转为小写再比较。
#[derive(Debug)]
pub struct ExcludeRules {
    root: String,
    rules: Vec<ExcludeRule>,
}

/// 统一路径分隔符并转小写
fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn is_absolute_pattern(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    pattern.starts_with('/') || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// 将通配符模式转换为正则：`**` 可跨目录，`*` 与 `?` 不跨目录
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let (body, tail) = match pattern.strip_suffix("/**") {
        Some(body) => (body, "(?:/.*)?"),
        None => (pattern, ""),
    };

    let chars: Vec<char> = body.chars().collect();
    let mut re = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => match chars[i..].iter().position(|&c| c == ']') {
                Some(end) if end > 1 => {
                    let class: String = chars[i + 1..i + end].iter().collect();
                    let class = match class.strip_prefix('!') {
                        Some(rest) => format!("^{}", rest),
                        None => class,
                    };
                    re.push('[');
                    re.push_str(&class.replace('\\', "\\\\"));
                    re.push(']');
                    i += end + 1;
                    continue;
                }
                _ => re.push_str(&regex::escape("[")),
            },
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push_str(tail);
    re.push('$');

    Regex::new(&re).ok()
}

impl ExcludeRules {
    pub fn new<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Self {
        let mut rules = Vec::new();
        for raw in patterns {
            let pattern = raw.as_ref().trim().replace('\\', "/").to_lowercase();
            if pattern.is_empty() {
                continue;
            }

            if pattern.contains(&['*', '?', '['][..]) {
                match glob_to_regex(&pattern) {
                    Some(regex) => rules.push(ExcludeRule::Glob {
                        regex,
                        match_name: !pattern.contains('/'),
                    }),
                    None => warn!("无效的排除模式，已忽略: {}", raw.as_ref()),
                }
            } else if is_absolute_pattern(&pattern) {
                let prefix = pattern.trim_end_matches('/');
                // "/" 本身保持为 "/"，否则会排除所有内容
                rules.push(ExcludeRule::Prefix(if prefix.is_empty() {
                    "/".to_string()
                } else {
                    prefix.to_string()
                }));
            } else {
                let parts: Vec<String> = pattern
                    .split('/')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                if !parts.is_empty() {
                    rules.push(ExcludeRule::Components(parts));
                }
            }
        }

        Self {
            root: normalize(root).trim_end_matches('/').to_string(),
            rules,
        }
    }

    /// 检查路径是否应该被排除（目录被排除时整个子树都会跳过）
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir && Self::is_windows_system_dir(path) {
            return true;
        }

        let full = normalize(path);
        let relative = full
            .strip_prefix(self.root.as_str())
            .unwrap_or(&full)
            .trim_start_matches('/');
        let name = relative.rsplit('/').next().unwrap_or(relative);

        self.rules.iter().any(|rule| match rule {
            ExcludeRule::Glob { regex, match_name } => {
                regex.is_match(relative) || (*match_name && regex.is_match(name))
            }
            ExcludeRule::Prefix(prefix) => {
                if prefix == "/" {
                    return full.starts_with('/');
                }
                full == *prefix
                    || full
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            ExcludeRule::Components(parts) => {
                let components: Vec<&str> = relative.split('/').collect();
                components
                    .windows(parts.len())
                    .any(|w| w.iter().zip(parts).all(|(a, b)| *a == b.as_str()))
            }
        })
    }

    fn is_windows_system_dir(path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_lowercase();
        WINDOWS_SYSTEM_DIRS.contains(&name.as_str())
            && path.parent().is_some_and(|p| p.parent().is_none())
    }
}

/// 遍历阶段的输出
struct WalkOutcome {
    candidates: Vec<PathBuf>,
    scanned_dirs: usize,
}

/// 文件扫描器
pub struct FileScanner {
    config: ScanConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
    progress_tx: Option<mpsc::Sender<ScanProgress>>,
}

impl FileScanner {
    pub fn new(workers: usize) -> Self {
        Self::with_config(ScanConfig {
            workers,
            ..Default::default()
        })
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self {
            config,
            cancel_flag: None,
            progress_tx: None,
        }
    }

    /// 设置取消标志
    pub fn with_cancel(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    /// 设置进度通道（通道满时丢弃进度，不阻塞扫描）
    pub fn with_progress(mut self, tx: mpsc::Sender<ScanProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn is_cancelled(&self) -> bool {
        is_set(&self.cancel_flag)
    }

    /// 执行扫描
    ///
    /// 只有根路径不可用（或被取消）时返回错误；单个文件的问题记录在
    /// `invalid_reason` 中。
    pub async fn scan(&self, options: &ScanOptions) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        let root = PathBuf::from(&options.root_path);
        check_root(&root)?;

        info!("开始扫描: {}", root.display());

        let mut patterns: Vec<String> = Vec::new();
        if self.config.default_excludes {
            patterns.extend(DEFAULT_EXCLUDES.iter().map(|s| s.to_string()));
        }
        patterns.extend(options.exclude_paths.iter().cloned());
        let rules = ExcludeRules::new(&root, patterns.as_slice());

        let walk_root = root.clone();
        let include_types = options.include_types.clone();
        let cancel_flag = self.cancel_flag.clone();
        let progress_tx = self.progress_tx.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            walk_tree(&walk_root, &rules, &include_types, &cancel_flag, &progress_tx)
        })
        .await
        .map_err(|e| ScanError::Internal(e.to_string()))??;

        debug!(
            "遍历完成: {} 个目录, {} 个候选文件",
            outcome.scanned_dirs,
            outcome.candidates.len()
        );

        let validate = options.validate_files;
        let workers = self.config.workers.max(1);
        let files: Vec<FileInfo> = stream::iter(outcome.candidates)
            .map(|path| {
                let cancel_flag = self.cancel_flag.clone();
                async move {
                    let task_path = path.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        if is_set(&cancel_flag) {
                            None
                        } else {
                            Some(inspect_file(&task_path, validate))
                        }
                    })
                    .await;
                    match result {
                        Ok(info) => info,
                        Err(e) => Some(unreadable_file(&path, format!("校验任务异常: {}", e))),
                    }
                }
            })
            .buffered(workers)
            .filter_map(|info| async move { info })
            .collect()
            .await;

        if self.is_cancelled() {
            info!("扫描已取消: {}", root.display());
            return Err(ScanError::Cancelled);
        }

        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(ScanProgress {
                current_path: options.root_path.clone(),
                scanned_dirs: outcome.scanned_dirs,
                found_files: files.len(),
                current_file: String::new(),
                is_scanning: false,
            });
        }

        let result = ScanResult::from_files(files, start.elapsed().as_secs_f64());
        info!(
            "扫描完成: {} 个文件 ({} 有效, {} 无效), 耗时 {:.2}s",
            result.total_count, result.valid_count, result.invalid_count, result.scan_time
        );
        Ok(result)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::with_config(ScanConfig::default())
    }
}

fn is_set(flag: &Option<Arc<AtomicBool>>) -> bool {
    flag.as_ref()
        .map(|f| f.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// 根路径必须存在、是目录且可读
fn check_root(root: &Path) -> Result<(), ScanError> {
    let display = root.display().to_string();
    let metadata = std::fs::metadata(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ScanError::RootNotFound(display.clone()),
        _ => ScanError::RootUnreadable {
            path: display.clone(),
            source: e,
        },
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(display));
    }
    std::fs::read_dir(root).map_err(|e| ScanError::RootUnreadable {
        path: display,
        source: e,
    })?;
    Ok(())
}

fn walk_tree(
    root: &Path,
    rules: &ExcludeRules,
    include_types: &[FileType],
    cancel_flag: &Option<Arc<AtomicBool>>,
    progress_tx: &Option<mpsc::Sender<ScanProgress>>,
) -> Result<WalkOutcome, ScanError> {
    let mut candidates = Vec::new();
    let mut scanned_dirs = 0usize;
    let mut last_update = Instant::now();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry: &DirEntry| {
            entry.depth() == 0 || !rules.is_excluded(entry.path(), entry.file_type().is_dir())
        });

    for entry in walker {
        if is_set(cancel_flag) {
            return Err(ScanError::Cancelled);
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                // 跳过无法访问的目录（权限问题等）
                if e.depth() == 0 {
                    let path = root.display().to_string();
                    return Err(ScanError::RootUnreadable {
                        path,
                        source: e.into_io_error().unwrap_or_else(|| {
                            std::io::Error::other("walk error")
                        }),
                    });
                }
                warn!("跳过无法访问的路径: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            scanned_dirs += 1;
            if last_update.elapsed() > PROGRESS_INTERVAL {
                send_progress(progress_tx, entry.path(), scanned_dirs, candidates.len(), "");
                last_update = Instant::now();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let file_type = file_type_for_extension(&normalize_extension(entry.path()));
        if !include_types.is_empty() && !include_types.contains(&file_type) {
            continue;
        }

        candidates.push(entry.path().to_path_buf());

        if last_update.elapsed() > PROGRESS_INTERVAL {
            let dir = entry.path().parent().unwrap_or(root);
            let name = entry.file_name().to_string_lossy();
            send_progress(progress_tx, dir, scanned_dirs, candidates.len(), &name);
            last_update = Instant::now();
        }
    }

    Ok(WalkOutcome {
        candidates,
        scanned_dirs,
    })
}

fn send_progress(
    tx: &Option<mpsc::Sender<ScanProgress>>,
    current: &Path,
    scanned_dirs: usize,
    found_files: usize,
    current_file: &str,
) {
    if let Some(tx) = tx {
        let _ = tx.try_send(ScanProgress {
            current_path: current.display().to_string(),
            scanned_dirs,
            found_files,
            current_file: current_file.to_string(),
            is_scanning: true,
        });
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(UNIX_EPOCH)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 无法获取元数据的文件：大小为 0，时间为 epoch
fn unreadable_file(path: &Path, reason: String) -> FileInfo {
    let extension = normalize_extension(path);
    let file_type = file_type_for_extension(&extension);
    FileInfo::new(
        path.display().to_string(),
        file_name(path),
        0,
        epoch(),
        extension,
        file_type,
        Err(reason),
    )
}

/// 读取元数据并（按需）校验单个文件
fn inspect_file(path: &Path, validate: bool) -> FileInfo {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!("无法获取文件信息 {}: {}", path.display(), e);
            return unreadable_file(path, format!("无法获取文件信息: {}", e));
        }
    };

    let classification = classify(path, validate);

    FileInfo::new(
        path.display().to_string(),
        file_name(path),
        metadata.len(),
        metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| epoch()),
        classification.extension,
        classification.file_type,
        classification.verdict,
    )
}
