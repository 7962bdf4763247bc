//! 단일 인스턴스 잠금
//!
//! 실행 파일 옆의 `superelixier.lock`에 배타 잠금을 겁니다.
//! 가드가 drop되면 (에러로 빠져나가는 경로 포함) 잠금을 풀고 파일을 지웁니다.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "superelixier.lock";

#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// 실행 파일 폴더 (알 수 없으면 CWD)에 잠금
    pub fn acquire() -> Result<Self> {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::acquire_at(&dir.join(LOCK_FILE_NAME))
    }

    pub fn acquire_at(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!("The previous Superelixier Updater instance is still running.");
        }
        tracing::debug!("[Lock] Acquired {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("[Lock] Failed to unlock {}: {}", self.path.display(), e);
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("[Lock] Failed to remove {}: {}", self.path.display(), e);
        }
    }
}
