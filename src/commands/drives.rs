use crate::core::{list_drives, DriveInfo};

/// 获取可扫描的驱动器与常用目录
pub async fn get_drives() -> Result<Vec<DriveInfo>, String> {
    tokio::task::spawn_blocking(list_drives)
        .await
        .map_err(|e| format!("获取驱动器列表失败: {}", e))
}
