//! 可供扫描的起始位置（驱动器、卷、常用目录）

use super::models::DriveInfo;
use std::collections::HashSet;
use std::path::Path;
use sysinfo::Disks;

/// 不作为扫描入口的系统挂载点
const PSEUDO_MOUNT_PREFIXES: &[&str] = &["/proc", "/sys", "/dev", "/run", "/boot", "/snap", "/var/lib"];

/// 列出可扫描的根位置，按路径去重，保持发现顺序
pub fn list_drives() -> Vec<DriveInfo> {
    let mut candidates = Vec::new();

    if cfg!(target_os = "windows") {
        for letter in 'C'..='Z' {
            let path = format!("{}:\\", letter);
            if Path::new(&path).exists() {
                candidates.push(DriveInfo {
                    path,
                    label: format!("{}:", letter),
                });
            }
        }
    } else {
        if let Some(home) = crate::dirs::home_dir() {
            let name = home
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            candidates.push(DriveInfo {
                path: home.display().to_string(),
                label: format!("用户目录 ({})", name),
            });
        }
        candidates.push(DriveInfo {
            path: "/".to_string(),
            label: "根目录 (/)".to_string(),
        });
        for (path, label) in [("/Volumes", "外部卷 (/Volumes)"), ("/Users", "用户 (/Users)")] {
            if Path::new(path).is_dir() {
                candidates.push(DriveInfo {
                    path: path.to_string(),
                    label: label.to_string(),
                });
            }
        }
    }

    candidates.extend(mounted_volumes());
    dedup_by_path(candidates)
}

/// 系统报告的已挂载卷
fn mounted_volumes() -> Vec<DriveInfo> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| disk.total_space() > 0)
        .filter_map(|disk| {
            let mount = disk.mount_point().to_string_lossy().into_owned();
            if is_pseudo_mount(&mount) {
                return None;
            }
            let name = disk.name().to_string_lossy().into_owned();
            let label = if name.is_empty() {
                mount.clone()
            } else {
                format!("{} ({})", name, mount)
            };
            Some(DriveInfo { path: mount, label })
        })
        .collect()
}

fn is_pseudo_mount(mount: &str) -> bool {
    PSEUDO_MOUNT_PREFIXES
        .iter()
        .any(|prefix| mount == *prefix || mount.starts_with(&format!("{}/", prefix)))
}

fn dedup_by_path(candidates: Vec<DriveInfo>) -> Vec<DriveInfo> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|d| {
            let key = d.path.trim_end_matches(['/', '\\']).to_lowercase();
            seen.insert(if key.is_empty() { d.path.clone() } else { key })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(path: &str, label: &str) -> DriveInfo {
        DriveInfo {
            path: path.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let result = dedup_by_path(vec![
            drive("/", "根目录 (/)"),
            drive("/data", "data"),
            drive("/", "sda1 (/)"),
            drive("/data/", "data again"),
        ]);
        assert_eq!(result, vec![drive("/", "根目录 (/)"), drive("/data", "data")]);
    }

    #[test]
    fn test_pseudo_mounts() {
        assert!(is_pseudo_mount("/proc"));
        assert!(is_pseudo_mount("/run/user/1000"));
        assert!(!is_pseudo_mount("/running"));
        assert!(!is_pseudo_mount("/mnt/usb"));
    }

    #[cfg(unix)]
    #[test]
    fn test_list_drives_contains_root_once() {
        let drives = list_drives();
        assert_eq!(drives.iter().filter(|d| d.path == "/").count(), 1);
        assert!(drives.iter().all(|d| !d.label.is_empty()));
    }
}
