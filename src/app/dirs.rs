//! 应用目录：默认位于用户主目录下的 `.shotpipe`，可用 `SHOTPIPE_HOME` 覆盖。

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use directories::BaseDirs;

pub const APP_DIR_NAME: &str = ".shotpipe";
pub const HOME_ENV: &str = "SHOTPIPE_HOME";

/// 返回应用根目录，不存在时创建
pub fn app_root_dir() -> Result<PathBuf> {
    let path = match std::env::var_os(HOME_ENV) {
        Some(custom) => PathBuf::from(custom),
        None => BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(APP_DIR_NAME))
            .ok_or_else(|| anyhow!("无法确定用户主目录"))?,
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("创建应用目录失败: {}", path.display()))?;
    Ok(path)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_root_dir()?.join("config.toml"))
}

pub fn processed_history_path() -> Result<PathBuf> {
    Ok(app_root_dir()?.join("processed_files.json"))
}

pub fn upload_history_path() -> Result<PathBuf> {
    Ok(app_root_dir()?.join("uploaded_files.json"))
}
