//! 文件导出
//!
//! 导出任务由一个协调任务独占全部计数，按完成顺序通过有界通道发送进度，
//! 最后发送一次 `Finished` 并关闭通道。单个文件失败不会中断整批导出。

use super::error::ExportError;
use super::models::{ExportEvent, ExportOptions, ExportProgress, ExportResult, FileInfo};
use anyhow::{Context, Result};
use chrono::{Datelike, Local, Timelike};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 复制缓冲区大小
const COPY_BUFFER: usize = 256 * 1024;

/// 导出配置
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// 最大并发复制数
    pub workers: usize,
    /// 进度通道容量，观察者处理过慢时导出任务会等待
    pub progress_buffer: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            progress_buffer: 100,
        }
    }
}

/// 单个文件的导出结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Success,
    Skipped,
    Failed(String),
    /// 取消时中途放弃，临时文件已删除
    Abandoned,
}

/// 已确定目标路径的导出项
#[derive(Debug, Clone)]
struct ExportItem {
    source: PathBuf,
    /// 原始路径字符串，用于进度与结果列表
    label: String,
    dest: PathBuf,
}

#[derive(Debug, Clone, Copy)]
struct CopyPolicy {
    overwrite: bool,
    verify: bool,
}

/// 正在运行的导出任务
pub struct ExportTask {
    events: mpsc::Receiver<ExportEvent>,
    cancel: CancellationToken,
}

impl ExportTask {
    /// 取消令牌，可交给其他任务使用
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 停止发起新的复制；已在进行的复制会被放弃并清理
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 接收下一个事件，`Finished` 之后返回 None
    pub async fn recv(&mut self) -> Option<ExportEvent> {
        self.events.recv().await
    }

    /// 转换为事件流
    pub fn into_stream(self) -> ReceiverStream<ExportEvent> {
        ReceiverStream::new(self.events)
    }

    /// 消费全部事件并返回最终结果
    pub async fn join<F>(mut self, mut on_progress: F) -> ExportResult
    where
        F: FnMut(&ExportProgress),
    {
        let mut finished = None;
        while let Some(event) = self.events.recv().await {
            match event {
                ExportEvent::Progress(progress) => on_progress(&progress),
                ExportEvent::Finished(result) => finished = Some(result),
            }
        }
        finished.unwrap_or_else(|| {
            warn!("导出任务异常结束，未收到最终结果");
            ExportResult {
                cancelled: true,
                ..Default::default()
            }
        })
    }
}

/// 文件导出器
pub struct Exporter {
    config: ExportConfig,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// 校验目标目录并在后台启动导出
    ///
    /// 目标目录无法创建时直接返回错误，不产生任何事件。
    pub async fn start(&self, options: ExportOptions) -> Result<ExportTask, ExportError> {
        let dest_root = PathBuf::from(&options.dest_path);
        prepare_destination(&dest_root).await?;

        let items = plan_destinations(&options, &dest_root);
        let policy = CopyPolicy {
            overwrite: options.overwrite,
            verify: options.verify,
        };

        info!(
            "开始导出 {} 个文件到 {} (保持结构: {}, 覆盖: {})",
            items.len(),
            dest_root.display(),
            options.keep_structure,
            options.overwrite
        );

        let (tx, rx) = mpsc::channel(self.config.progress_buffer.max(1));
        let cancel = CancellationToken::new();
        tokio::spawn(run_export(
            items,
            policy,
            self.config.workers.max(1),
            tx,
            cancel.clone(),
        ));

        Ok(ExportTask { events: rx, cancel })
    }

    /// 把文件打包为目标目录下的一个压缩包
    ///
    /// 条目名与文件导出的目标路径规则相同，`overwrite` 与 `verify` 不适用。
    /// 取消或写入失败时不留下压缩包。
    pub async fn start_zip(&self, options: ExportOptions) -> Result<ExportTask, ExportError> {
        let dest_root = PathBuf::from(&options.dest_path);
        prepare_destination(&dest_root).await?;

        // 以空路径为根，得到的目标即为条目的相对路径
        let items = plan_destinations(&options, Path::new(""));

        info!(
            "开始打包 {} 个文件到 {} (保持结构: {})",
            items.len(),
            dest_root.display(),
            options.keep_structure
        );

        let (tx, rx) = mpsc::channel(self.config.progress_buffer.max(1));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || run_zip_export(items, dest_root, tx, task_cancel));

        Ok(ExportTask { events: rx, cancel })
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(ExportConfig::default())
    }
}

async fn prepare_destination(dest_root: &Path) -> Result<(), ExportError> {
    let display = dest_root.display().to_string();
    if let Ok(meta) = fs::metadata(dest_root).await {
        if !meta.is_dir() {
            return Err(ExportError::DestinationNotDirectory(display));
        }
        return Ok(());
    }
    fs::create_dir_all(dest_root)
        .await
        .map_err(|source| ExportError::DestinationUnavailable {
            path: display,
            source,
        })
}

/// 只保留普通路径组件，去掉盘符、根、`.` 与 `..`
fn sanitize(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// 计算保持结构时的相对路径
fn relative_path(source: &Path, base: Option<&Path>) -> PathBuf {
    if let Some(rel) = base.and_then(|b| source.strip_prefix(b).ok()) {
        let rel = sanitize(rel);
        if !rel.as_os_str().is_empty() {
            return rel;
        }
    }
    sanitize(source)
}

fn flat_name(file: &FileInfo, source: &Path) -> PathBuf {
    Path::new(&file.name)
        .file_name()
        .or_else(|| source.file_name())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("unnamed"))
}

/// 按顺序登记目标路径，已被占用时追加 " (n)"
///
/// 登记时忽略大小写，避免在不区分大小写的文件系统上互相覆盖。
fn claim_unique(dest: PathBuf, claimed: &mut HashSet<String>) -> PathBuf {
    let key = |p: &Path| p.to_string_lossy().to_lowercase();
    if claimed.insert(key(&dest)) {
        return dest;
    }

    let parent = dest.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{} ({}){}", stem, n, ext));
        if claimed.insert(key(&candidate)) {
            return candidate;
        }
        n += 1;
    }
}

/// 按文件列表顺序确定每个文件的目标路径，保证互不相同
fn plan_destinations(options: &ExportOptions, dest_root: &Path) -> Vec<ExportItem> {
    let base = options.base_path.as_deref().map(Path::new);
    let mut claimed = HashSet::new();

    options
        .files
        .iter()
        .map(|file| {
            let source = PathBuf::from(&file.path);
            let mut rel = if options.keep_structure {
                relative_path(&source, base)
            } else {
                flat_name(file, &source)
            };
            if rel.as_os_str().is_empty() {
                rel = flat_name(file, &source);
            }
            let dest = claim_unique(dest_root.join(rel), &mut claimed);
            ExportItem {
                label: file.path.clone(),
                source,
                dest,
            }
        })
        .collect()
}

async fn run_export(
    items: Vec<ExportItem>,
    policy: CopyPolicy,
    workers: usize,
    tx: mpsc::Sender<ExportEvent>,
    cancel: CancellationToken,
) {
    let total = items.len();
    let mut queue: VecDeque<ExportItem> = items.into();
    let mut in_flight = FuturesUnordered::new();
    let mut result = ExportResult::default();
    let mut completed = 0usize;
    let mut abandoned = 0usize;

    let next_label = |queue: &VecDeque<ExportItem>| {
        queue
            .front()
            .map(|item| item.label.clone())
            .unwrap_or_default()
    };

    let _ = tx
        .send(ExportEvent::Progress(ExportProgress::new(
            total,
            0,
            0,
            next_label(&queue),
        )))
        .await;

    loop {
        while in_flight.len() < workers && !cancel.is_cancelled() {
            let Some(item) = queue.pop_front() else {
                break;
            };
            let cancel = cancel.clone();
            in_flight.push(async move {
                let outcome = export_item(&item, policy, &cancel).await;
                (item, outcome)
            });
        }

        let Some((item, outcome)) = in_flight.next().await else {
            break;
        };

        match outcome {
            Outcome::Success => {
                debug!("导出完成: {} -> {}", item.label, item.dest.display());
                result.success += 1;
            }
            Outcome::Skipped => {
                debug!("目标已存在，跳过: {}", item.dest.display());
                result.skipped_files.push(item.label.clone());
            }
            Outcome::Failed(reason) => {
                warn!("导出失败: {} - {}", item.label, reason);
                result.failed += 1;
                result.failed_files.push(item.label.clone());
                result.errors.push(format!("{}: {}", item.label, reason));
            }
            Outcome::Abandoned => {
                debug!("已放弃: {}", item.label);
                abandoned += 1;
                continue;
            }
        }
        completed += 1;

        let current = if cancel.is_cancelled() {
            String::new()
        } else {
            next_label(&queue)
        };
        let _ = tx
            .send(ExportEvent::Progress(ExportProgress::new(
                total,
                completed,
                result.failed,
                current,
            )))
            .await;
    }

    result.cancelled = cancel.is_cancelled() && (abandoned > 0 || !queue.is_empty());

    info!(
        "导出结束: 成功 {}, 失败 {}, 跳过 {}{}",
        result.success,
        result.failed,
        result.skipped_files.len(),
        if result.cancelled { " (已取消)" } else { "" }
    );

    let _ = tx.send(ExportEvent::Finished(result)).await;
}

async fn export_item(item: &ExportItem, policy: CopyPolicy, cancel: &CancellationToken) -> Outcome {
    if !policy.overwrite {
        match fs::symlink_metadata(&item.dest).await {
            Ok(_) => return Outcome::Skipped,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Outcome::Failed(format!("无法检查目标文件: {}", e)),
        }
    }

    match copy_atomic(&item.source, &item.dest, policy, cancel).await {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Failed(format!("{:#}", e)),
    }
}

/// 打开源文件并原子写入目标路径
async fn copy_atomic(
    source: &Path,
    dest: &Path,
    policy: CopyPolicy,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let reader = fs::File::open(source)
        .await
        .context("无法打开源文件")?;
    let src_meta = reader.metadata().await.context("无法获取源文件信息")?;
    if !src_meta.is_file() {
        anyhow::bail!("源路径不是普通文件");
    }
    write_atomic(reader, src_meta.modified().ok(), dest, policy, cancel).await
}

/// 先写入同目录下的临时文件，再发布为目标文件
///
/// 目标路径上不会出现写了一半的文件。取消时返回 `Abandoned`；
/// 不覆盖模式下目标在写入期间被他人创建时返回 `Skipped`。
async fn write_atomic<R>(
    mut reader: R,
    modified: Option<SystemTime>,
    dest: &Path,
    policy: CopyPolicy,
    cancel: &CancellationToken,
) -> Result<Outcome>
where
    R: AsyncRead + Unpin,
{
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("无效的目标路径: {}", dest.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("无法创建目录 {}", parent.display()))?;

    let temp_path = temp_path_for(parent, dest);

    // 未成功重命名前，离开作用域时删除临时文件
    let temp_guard = scopeguard::guard(temp_path.clone(), |path| {
        let _ = std::fs::remove_file(path);
    });

    let mut writer = fs::File::create(&temp_path)
        .await
        .context("无法创建临时文件")?;
    let mut hasher = policy.verify.then(blake3::Hasher::new);
    let mut buffer = vec![0u8; COPY_BUFFER];

    loop {
        if cancel.is_cancelled() {
            drop(writer);
            return Ok(Outcome::Abandoned);
        }
        let n = reader.read(&mut buffer).await.context("读取源文件失败")?;
        if n == 0 {
            break;
        }
        if let Some(h) = hasher.as_mut() {
            h.update(&buffer[..n]);
        }
        writer
            .write_all(&buffer[..n])
            .await
            .context("写入临时文件失败")?;
    }

    writer.flush().await.context("写入临时文件失败")?;
    writer.sync_all().await.context("同步到磁盘失败")?;

    // 修改时间尽力保留
    let std_file = writer.into_std().await;
    if let Some(modified) = modified {
        if let Err(e) = std_file.set_modified(modified) {
            debug!("无法保留修改时间 {}: {}", dest.display(), e);
        }
    }
    drop(std_file);

    if let Some(hasher) = hasher {
        let written = hash_file(&temp_path).await.context("校验读取失败")?;
        if written != hasher.finalize() {
            anyhow::bail!("校验失败：写入内容与源文件不一致");
        }
    }

    if policy.overwrite {
        fs::rename(&temp_path, dest)
            .await
            .context("无法替换目标文件")?;
        scopeguard::ScopeGuard::into_inner(temp_guard);
        return Ok(Outcome::Success);
    }

    // 临时文件由 guard 删除
    if publish_new(&temp_path, dest).await? {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::Skipped)
    }
}

fn temp_path_for(parent: &Path, dest: &Path) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4().simple()))
}

/// 不覆盖已有文件地发布临时文件，目标已存在时返回 false
///
/// 硬链接在目标存在时原子地失败。文件系统不支持硬链接（如 FAT）时
/// 退回到先检查再重命名。
async fn publish_new(temp_path: &Path, dest: &Path) -> Result<bool> {
    match fs::hard_link(temp_path, dest).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => {
            debug!("硬链接失败，改用重命名 {}: {}", dest.display(), e);
            if fs::symlink_metadata(dest).await.is_ok() {
                return Ok(false);
            }
            fs::rename(temp_path, dest)
                .await
                .context("无法写入目标文件")?;
            Ok(true)
        }
    }
}

async fn hash_file(path: &Path) -> std::io::Result<blake3::Hash> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// 压缩包内的条目名，始终使用 `/` 分隔
fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 压缩包条目的修改时间，早于 1980 年的时间无法表示
fn zip_time(modified: SystemTime) -> Option<zip::DateTime> {
    let local: chrono::DateTime<Local> = modified.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

/// 在阻塞线程中写入压缩包，发送与文件导出相同的事件序列
fn run_zip_export(
    items: Vec<ExportItem>,
    dest_root: PathBuf,
    tx: mpsc::Sender<ExportEvent>,
    cancel: CancellationToken,
) {
    let total = items.len();
    let mut result = ExportResult::default();
    let mut written = Vec::new();

    let first = items.first().map(|i| i.label.clone()).unwrap_or_default();
    let _ = tx.blocking_send(ExportEvent::Progress(ExportProgress::new(total, 0, 0, first)));

    let archive_name = format!("docradar-{}.zip", Local::now().format("%Y%m%d-%H%M%S"));
    match write_archive(&items, &dest_root, &archive_name, &tx, &cancel, &mut result, &mut written) {
        Ok(Some(path)) => {
            info!("压缩包已生成: {}", path.display());
            result.archive_path = Some(path.display().to_string());
        }
        Ok(None) => {
            info!("压缩包导出已取消，未生成文件");
            // 压缩包被丢弃，已写入的条目不算成功
            result.success = 0;
            result.cancelled = true;
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!("压缩包写入失败: {}", reason);
            result.success = 0;
            for label in written {
                result.failed += 1;
                result.errors.push(format!("{}: {}", label, reason));
                result.failed_files.push(label);
            }
        }
    }

    info!(
        "压缩包导出结束: 成功 {}, 失败 {}{}",
        result.success,
        result.failed,
        if result.cancelled { " (已取消)" } else { "" }
    );
    let _ = tx.blocking_send(ExportEvent::Finished(result));
}

/// 逐个写入条目；取消时返回 `Ok(None)`，临时文件随即删除
fn write_archive(
    items: &[ExportItem],
    dest_root: &Path,
    archive_name: &str,
    tx: &mpsc::Sender<ExportEvent>,
    cancel: &CancellationToken,
    result: &mut ExportResult,
    written: &mut Vec<String>,
) -> Result<Option<PathBuf>> {
    let temp_path = dest_root.join(format!(".{}.{}.part", archive_name, uuid::Uuid::new_v4().simple()));
    let _temp_guard = scopeguard::guard(temp_path.clone(), |path| {
        let _ = std::fs::remove_file(path);
    });

    let file = std::fs::File::create(&temp_path).context("无法创建临时文件")?;
    let mut archive = ZipWriter::new(std::io::BufWriter::new(file));
    let total = items.len();

    for (index, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match add_zip_entry(&mut archive, item, cancel) {
            Ok(true) => {
                result.success += 1;
                written.push(item.label.clone());
            }
            Ok(false) => return Ok(None),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!("添加到压缩包失败: {} - {}", item.label, reason);
                result.failed += 1;
                result.failed_files.push(item.label.clone());
                result.errors.push(format!("{}: {}", item.label, reason));
            }
        }

        let current = if cancel.is_cancelled() {
            String::new()
        } else {
            items.get(index + 1).map(|i| i.label.clone()).unwrap_or_default()
        };
        let _ = tx.blocking_send(ExportEvent::Progress(ExportProgress::new(
            total,
            index + 1,
            result.failed,
            current,
        )));
    }

    let writer = archive.finish().context("无法完成压缩包")?;
    let file = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("写入压缩包失败: {}", e.error()))?;
    file.sync_all().context("同步到磁盘失败")?;
    drop(file);

    publish_archive(&temp_path, dest_root, archive_name).map(Some)
}

/// 逐块写入一个条目；取消时返回 `Ok(false)`
fn add_zip_entry<W: Write + Seek>(
    archive: &mut ZipWriter<W>,
    item: &ExportItem,
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut source = std::fs::File::open(&item.source).context("无法打开源文件")?;
    let meta = source.metadata().context("无法获取源文件信息")?;
    if !meta.is_file() {
        anyhow::bail!("源路径不是普通文件");
    }

    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(meta.len() >= u32::MAX as u64);
    if let Some(time) = meta.modified().ok().and_then(zip_time) {
        options = options.last_modified_time(time);
    }

    archive
        .start_file(zip_entry_name(&item.dest), options)
        .context("无法创建压缩包条目")?;

    let mut buffer = vec![0u8; COPY_BUFFER];
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let n = match source.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                let _ = archive.abort_file();
                return Err(e).context("读取源文件失败");
            }
        };
        if n == 0 {
            break;
        }
        if let Err(e) = archive.write_all(&buffer[..n]) {
            let _ = archive.abort_file();
            return Err(e).context("写入压缩包失败");
        }
    }
    Ok(true)
}

/// 把临时压缩包发布为 `archive_name`，重名时追加 " (n)"，不覆盖已有文件
fn publish_archive(temp_path: &Path, dest_root: &Path, archive_name: &str) -> Result<PathBuf> {
    let stem = archive_name.trim_end_matches(".zip");
    for n in 0..1000 {
        let candidate = if n == 0 {
            dest_root.join(archive_name)
        } else {
            dest_root.join(format!("{} ({}).zip", stem, n))
        };
        match std::fs::hard_link(temp_path, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                debug!("硬链接失败，改用重命名 {}: {}", candidate.display(), e);
                if candidate.exists() {
                    continue;
                }
                std::fs::rename(temp_path, &candidate).context("无法写入压缩包")?;
                return Ok(candidate);
            }
        }
    }
    anyhow::bail!("无法为压缩包找到可用的文件名")
}
