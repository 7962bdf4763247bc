//! 잠금 검사
//!
//! 스테이징에 있는 파일과 같은 상대 경로의 설치 파일을 append 모드로 열고
//! 배타 잠금을 시도합니다. 하나라도 실패하면 다른 프로세스가 쓰고 있는 것으로 보고
//! 지금까지 연 핸들을 모두 닫은 뒤 병합을 미룹니다.
//!
//! 잡은 핸들은 병합이 끝날 때까지 유지하다가 해당 파일을 옮기기 직전에 닫습니다.

use fs2::FileExt;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::paths::{is_probe_extension, list_files};

/// 후보 파일이 이보다 많으면 실행 파일/스크립트만 검사 (핸들 고갈 방지)
pub const PROBE_LIMIT: usize = 2000;

/// 설치 파일 경로 → 열린 핸들
#[derive(Debug, Default)]
pub struct FileLockMap {
    handles: HashMap<PathBuf, File>,
}

impl FileLockMap {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    /// 파일 하나의 핸들을 닫습니다. 잡고 있지 않던 경로면 아무 일도 하지 않음
    pub fn release(&mut self, path: &Path) {
        if let Some(file) = self.handles.remove(path) {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::debug!("[Lock] unlock {} failed: {}", path.display(), e);
            }
        }
    }

    /// 남은 핸들을 모두 닫습니다.
    pub fn release_all(&mut self) {
        let paths: Vec<PathBuf> = self.handles.keys().cloned().collect();
        for path in paths {
            self.release(&path);
        }
    }
}

impl Drop for FileLockMap {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// 잠금 검사 결과
#[derive(Debug)]
pub enum ProbeOutcome {
    /// 모든 후보 파일의 핸들을 잡음
    Acquired(FileLockMap),
    /// 사용 중인 파일이 있음: 병합을 미뤄야 함
    Locked { path: PathBuf, reason: String },
}

/// 병합 전에 설치 폴더의 잠금 상태를 확인합니다.
///
/// `staged_files`는 `staging` 아래의 절대 경로입니다.
pub fn probe(appdir: &Path, staging: &Path, staged_files: &[PathBuf]) -> ProbeOutcome {
    let targets: HashSet<PathBuf> = staged_files
        .iter()
        .filter_map(|f| f.strip_prefix(staging).ok())
        .map(|rel| appdir.join(rel))
        .collect();

    let mut candidates: Vec<PathBuf> = list_files(appdir)
        .into_iter()
        .filter(|f| targets.contains(f))
        .collect();

    if candidates.len() > PROBE_LIMIT {
        tracing::debug!(
            "[Lock] {} candidate files, probing executables and scripts only",
            candidates.len()
        );
        candidates.retain(|f| is_probe_extension(f));
    }

    let mut locks = FileLockMap::default();
    for path in candidates {
        match try_lock(&path) {
            Ok(file) => {
                locks.handles.insert(path, file);
            }
            Err(e) => {
                // 지금까지 연 핸들은 locks가 drop되면서 모두 닫힘
                return ProbeOutcome::Locked {
                    path,
                    reason: e.to_string(),
                };
            }
        }
    }

    tracing::debug!("[Lock] holding {} handle(s) in {}", locks.len(), appdir.display());
    ProbeOutcome::Acquired(locks)
}

fn try_lock(path: &Path) -> std::io::Result<File> {
    let file = OpenOptions::new().append(true).open(path)?;
    file.try_lock_exclusive()?;
    Ok(file)
}
