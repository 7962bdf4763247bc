//! 병합 엔진: 스테이징 트리를 설치 폴더 위에 적용
//!
//! ## 순서
//! 1. 보존 목록(keep set) 계산: `appdatas`에 해당하는 설치 파일
//! 2. 스테이징 파일 목록 계산
//! 3. 잠금 검사: 하나라도 사용 중이면 아무것도 건드리지 않고 `false`
//! 4. 보존 목록과 겹치는 스테이징 파일 삭제
//! 5. 파일마다 이동 / 히스토리로 옮긴 뒤 이동 / 교체
//! 6. 핸들 정리, 빈 스테이징·히스토리 폴더 정리
//!
//! 설치 파일은 항상 rename 한 번으로 바뀌거나 그대로 남습니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result, UpdaterError};
use crate::history::HistoryStore;
use crate::lock::{probe, ProbeOutcome};
use crate::paths::{list_files, remove_empty_dirs};
use crate::AppDescriptor;

#[derive(Debug, Clone)]
pub struct MergeEngine {
    keep_history: bool,
}

impl MergeEngine {
    pub fn new(keep_history: bool) -> Self {
        Self { keep_history }
    }

    /// 스테이징을 `app.appdir`에 병합합니다.
    ///
    /// 설치 폴더가 사용 중이면 `Ok(false)`를 돌려주며 스테이징은 그대로 남습니다.
    /// 이때 호출자가 [`DeferredCache::store`](crate::DeferredCache::store)를 불러야 합니다.
    pub fn merge(&self, app: &AppDescriptor, staging: &Path) -> Result<bool> {
        let appdir = &app.appdir;
        let keep = keep_set(app);
        let mut staged = list_files(staging);
        staged.sort();

        let mut locks = match probe(appdir, staging, &staged) {
            ProbeOutcome::Acquired(locks) => locks,
            ProbeOutcome::Locked { path, reason } => {
                tracing::warn!(
                    "[Merge] {}: {} is in use ({}), deferring update",
                    app.name,
                    path.display(),
                    reason
                );
                return Ok(false);
            }
        };

        // 사용자 데이터와 겹치는 새 파일은 버림
        let mut pending = Vec::with_capacity(staged.len());
        for file in staged {
            let Ok(rel) = file.strip_prefix(staging) else { continue };
            let rel = rel.to_path_buf();
            if keep.contains(&appdir.join(&rel)) {
                std::fs::remove_file(&file).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        UpdaterError::PermissionDenied {
                            path: file.display().to_string(),
                        }
                    } else {
                        UpdaterError::from_io(&e, "discard staged appdata", &file)
                    }
                })?;
                tracing::debug!("[Merge] {}: keeping user data {}", app.name, rel.display());
                continue;
            }
            pending.push((file, rel));
        }

        let history = self.keep_history.then(|| HistoryStore::begin(appdir));

        let mut replaced = 0usize;
        for (source, rel) in &pending {
            let target = appdir.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).fs_context("create folder", parent)?;
            }

            if !target.exists() {
                std::fs::rename(source, &target).fs_context("move new file", &target)?;
                continue;
            }

            locks.release(&target);
            match &history {
                Some(history) => {
                    history.displace(&target, rel)?;
                    std::fs::rename(source, &target).fs_context("move new file", &target)?;
                }
                // 같은 볼륨 안의 rename은 기존 파일을 원자적으로 교체
                None => std::fs::rename(source, &target).fs_context("replace file", &target)?,
            }
            replaced += 1;
        }

        locks.release_all();
        remove_empty_dirs(staging, true)?;
        if let Some(history) = &history {
            history.prune()?;
        }

        tracing::info!(
            "[Merge] {}: {} file(s) applied, {} replaced",
            app.name,
            pending.len(),
            replaced
        );
        Ok(true)
    }
}

/// 설정된 `appdatas`에 해당하는 설치 파일 집합
///
/// 폴더면 하위 파일 전체가 들어가며, 없는 경로는 로그만 남깁니다.
pub fn keep_set(app: &AppDescriptor) -> HashSet<PathBuf> {
    let mut keep = HashSet::new();

    for entry in &app.appdatas {
        let matches = if has_glob_meta(entry) {
            expand_glob(&app.appdir, entry)
        } else {
            let path = relative_to(&app.appdir, entry);
            if path.exists() {
                vec![path]
            } else {
                Vec::new()
            }
        };

        if matches.is_empty() {
            tracing::info!("[Merge] {}: appdata '{}' not found", app.name, entry);
            continue;
        }

        for path in matches {
            if path.is_dir() {
                keep.extend(list_files(&path));
            } else if path.is_file() {
                keep.insert(path);
            }
        }
    }
    keep
}

fn has_glob_meta(entry: &str) -> bool {
    entry.contains(|c: char| matches!(c, '*' | '?' | '['))
}

fn relative_to(appdir: &Path, entry: &str) -> PathBuf {
    entry
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .fold(appdir.to_path_buf(), |acc, c| acc.join(c))
}

fn expand_glob(appdir: &Path, entry: &str) -> Vec<PathBuf> {
    let base = glob::Pattern::escape(&appdir.to_string_lossy());
    let pattern = format!(
        "{}/{}",
        base.trim_end_matches(|c: char| c == '/' || c == '\\'),
        entry.trim_start_matches('/')
    );

    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
        Err(e) => {
            tracing::warn!("[Merge] Invalid appdata pattern '{}': {}", entry, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VersionInfo;

    fn app_with(target: &Path, appdatas: &[&str]) -> AppDescriptor {
        let mut app = AppDescriptor::new("Demo", target, VersionInfo::new(serde_json::json!({})));
        app.appdatas = appdatas.iter().map(|s| s.to_string()).collect();
        app
    }

    #[test]
    fn keep_set_expands_files_dirs_and_globs() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app_with(tmp.path(), &["settings.ini", "profile", "logs/*.log", "missing.cfg"]);
        std::fs::create_dir_all(app.appdir.join("profile/sub")).unwrap();
        std::fs::create_dir_all(app.appdir.join("logs")).unwrap();
        std::fs::write(app.appdir.join("settings.ini"), b"s").unwrap();
        std::fs::write(app.appdir.join("profile/a.db"), b"a").unwrap();
        std::fs::write(app.appdir.join("profile/sub/b.db"), b"b").unwrap();
        std::fs::write(app.appdir.join("logs/x.log"), b"x").unwrap();
        std::fs::write(app.appdir.join("logs/keep.txt"), b"t").unwrap();

        let keep = keep_set(&app);
        assert_eq!(keep.len(), 4);
        assert!(keep.contains(&app.appdir.join("settings.ini")));
        assert!(keep.contains(&app.appdir.join("profile/a.db")));
        assert!(keep.contains(&app.appdir.join("profile/sub/b.db")));
        assert!(keep.contains(&app.appdir.join("logs/x.log")));
    }

    #[test]
    fn replace_without_history() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app_with(tmp.path(), &[]);
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&app.appdir).unwrap();
        std::fs::create_dir_all(staging.join("lib")).unwrap();
        std::fs::write(app.appdir.join("app.exe"), b"old").unwrap();
        std::fs::write(staging.join("app.exe"), b"new").unwrap();
        std::fs::write(staging.join("lib/extra.dll"), b"dll").unwrap();

        assert!(MergeEngine::new(false).merge(&app, &staging).unwrap());

        assert_eq!(std::fs::read(app.appdir.join("app.exe")).unwrap(), b"new");
        assert_eq!(std::fs::read(app.appdir.join("lib/extra.dll")).unwrap(), b"dll");
        assert!(!app.appdir.join(".superelixier-history").exists());
        assert!(!staging.exists());
    }
}
