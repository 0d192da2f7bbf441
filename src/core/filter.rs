//! 扫描结果的过滤与排序（纯函数，不做任何 IO）

use super::models::{FileInfo, FilterOptions, FilterResult, ScanResult, SortKey};
use std::cmp::Ordering;

/// 对一次扫描结果执行过滤
pub fn filter(scan: &ScanResult, options: &FilterOptions) -> FilterResult {
    filter_files(&scan.files, options)
}

/// 过滤文件列表并排序
pub fn filter_files(files: &[FileInfo], options: &FilterOptions) -> FilterResult {
    let needle = options.search_text.to_lowercase();

    let mut result: Vec<FileInfo> = files
        .iter()
        .filter(|f| matches(f, options, &needle))
        .cloned()
        .collect();

    sort_files(&mut result, options.sort_by, options.sort_desc);

    FilterResult {
        total_count: result.len(),
        files: result,
    }
}

/// 所有条件都满足时保留
fn matches(file: &FileInfo, options: &FilterOptions, needle: &str) -> bool {
    // 按文件类型过滤
    if !options.file_types.is_empty() && !options.file_types.contains(&file.file_type) {
        return false;
    }

    // 按有效性过滤；两者同时为 true 时视为不限制
    match (options.valid_only, options.invalid_only) {
        (true, false) if !file.is_valid => return false,
        (false, true) if file.is_valid => return false,
        _ => {}
    }

    // 按文件名或路径搜索（忽略大小写）
    if !needle.is_empty()
        && !file.name.to_lowercase().contains(needle)
        && !file.path.to_lowercase().contains(needle)
    {
        return false;
    }

    // 按文件大小过滤
    if file.size < options.min_size {
        return false;
    }
    if options.max_size > 0 && file.size > options.max_size {
        return false;
    }

    true
}

/// 稳定排序；降序只反转排序字段的比较，相同时按路径升序
fn sort_files(files: &mut [FileInfo], sort_by: SortKey, desc: bool) {
    files.sort_by(|a, b| {
        let ord = compare_by(a, b, sort_by);
        let ord = if desc { ord.reverse() } else { ord };
        ord.then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn compare_by(a: &FileInfo, b: &FileInfo, sort_by: SortKey) -> Ordering {
    match sort_by {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::ModTime => a.mod_time.cmp(&b.mod_time),
        SortKey::Type => a.file_type.as_str().cmp(b.file_type.as_str()),
        SortKey::Path => a.path.cmp(&b.path),
    }
}
