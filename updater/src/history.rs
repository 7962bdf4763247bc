//! 히스토리: 병합 중 교체된 기존 파일 보관
//!
//! 실행마다 `<appdir>/.superelixier-history/<timestamp>/`를 하나 쓰며,
//! 원래 상대 경로를 그대로 유지합니다. 폴더는 실제로 파일이 옮겨질 때 만들어집니다.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};
use crate::paths::{remove_empty_dirs, CacheLayout};

/// 히스토리 폴더 이름 형식 (Windows 파일 이름에 `:`를 쓸 수 없음)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H.%M.%S";

#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
    run_dir: PathBuf,
}

impl HistoryStore {
    /// 주어진 시각으로 이번 실행의 히스토리 폴더 경로를 정합니다.
    ///
    /// 같은 이름의 폴더가 이미 있으면 `-1`, `-2`… 를 붙여 이전 실행과 섞이지 않게 합니다.
    pub fn new(appdir: &Path, now: DateTime<Local>) -> Self {
        let root = CacheLayout::history_root(appdir);
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();

        let mut run_dir = root.join(&stamp);
        let mut suffix = 1;
        while run_dir.exists() {
            run_dir = root.join(format!("{}-{}", stamp, suffix));
            suffix += 1;
        }

        Self { root, run_dir }
    }

    pub fn begin(appdir: &Path) -> Self {
        Self::new(appdir, Local::now())
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// 설치 폴더의 `live` 파일을 히스토리의 같은 상대 경로(`rel`)로 옮깁니다.
    pub fn displace(&self, live: &Path, rel: &Path) -> Result<PathBuf> {
        let dest = self.run_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).fs_context("create history folder", parent)?;
        }
        std::fs::rename(live, &dest).fs_context("move to history", live)?;
        tracing::debug!("[History] {} -> {}", rel.display(), dest.display());
        Ok(dest)
    }

    /// 히스토리 루트 아래 빈 폴더 정리
    pub fn prune(&self) -> Result<()> {
        remove_empty_dirs(&self.root, true)
    }
}
