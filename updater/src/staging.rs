//! 스테이징: 다운로드부터 버전 마커 기록까지
//!
//! 1. 보류 슬롯이 최신 버전이면 그대로 재사용
//! 2. 아니면 새 스테이징 폴더를 만들고 모든 blob URL을 다운로드
//! 3. 아카이브는 풀고 삭제, 인스톨러는 설정에 따라 처리
//! 4. 새로 받은 경우에만 평탄화/불필요 파일 제거
//! 5. 실패가 아니면 `superelixier.json` 기록

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::deferred::DeferredCache;
use crate::error::{IoContext, Result};
use crate::extract::{extract_archive, extract_installer, ExtractTools};
use crate::fetcher::Fetcher;
use crate::paths::{is_archive, is_executable, top_level_entries, CacheLayout};
use crate::{AppDescriptor, InstallerMode};

/// 준비된 스테이징 트리
#[derive(Debug, Clone)]
pub struct StagedUpdate {
    /// 스테이징 폴더 (재사용 시 보류 슬롯 경로)
    pub dir: PathBuf,
    /// 보류 슬롯을 그대로 재사용했는지 여부
    pub reused: bool,
    /// 마지막 blob의 주 파일 (압축 해제 후 파일이 하나만 남은 경우)
    pub primary: Option<PathBuf>,
    /// 버전 마커가 기록되었는지 여부
    pub ready: bool,
}

pub struct Stager<'a> {
    fetcher: &'a Fetcher,
    tools: &'a ExtractTools,
}

impl<'a> Stager<'a> {
    pub fn new(fetcher: &'a Fetcher, tools: &'a ExtractTools) -> Self {
        Self { fetcher, tools }
    }

    pub async fn download_and_prepare(&self, app: &AppDescriptor) -> Result<StagedUpdate> {
        let deferred = DeferredCache::new(&app.target_dir);
        if let Some(slot) = deferred.try_reuse(app)? {
            tracing::info!("[Staging] {}: Re-using previously downloaded update files", app.name);
            return Ok(StagedUpdate {
                dir: slot,
                reused: true,
                primary: None,
                ready: true,
            });
        }

        let layout = CacheLayout::new(&app.target_dir);
        let staging = layout.staging(&uuid::Uuid::new_v4().to_string());
        if staging.exists() {
            std::fs::remove_dir_all(&staging).fs_context("clear staging", &staging)?;
        }
        std::fs::create_dir_all(&staging).fs_context("create staging", &staging)?;

        match self.populate(app, &staging).await {
            Ok(staged) => Ok(staged),
            Err(e) => {
                // 실패한 스테이징은 다음 실행에 쓸 수 없으므로 정리
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    tracing::warn!("[Staging] Failed to remove {}: {}", staging.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    async fn populate(&self, app: &AppDescriptor, staging: &Path) -> Result<StagedUpdate> {
        let blobs = app.version_latest.blobs();
        if blobs.is_empty() {
            tracing::warn!("[Staging] {}: No matching downloads for the latest version", app.name);
        }

        let include_sfx = app.optionals.installer == Some(InstallerMode::Sfx);
        let mut primary = None;

        for url in &blobs {
            let mut payload = self.fetcher.fetch(url, app.url.as_deref(), staging).await?;

            if is_archive(&file_name(&payload), include_sfx) {
                extract_archive(self.tools, &payload, staging).await?;
                std::fs::remove_file(&payload).fs_context("remove archive", &payload)?;

                // zip 안에 인스톨러 하나만 들어 있는 경우
                let extracted = top_level_entries(staging)?;
                if extracted.len() == 1 {
                    payload = extracted[0].clone();
                }
            }

            if payload.is_file() && is_executable(&file_name(&payload)) {
                match app.optionals.installer {
                    Some(InstallerMode::Innoextract) => {
                        extract_installer(self.tools, &payload, staging).await?;
                        std::fs::remove_file(&payload).fs_context("remove installer", &payload)?;
                    }
                    None => {
                        let renamed = staging.join(format!("{}.exe", app.name));
                        if renamed != payload {
                            std::fs::rename(&payload, &renamed).fs_context("rename executable", &renamed)?;
                        }
                        payload = renamed;
                    }
                    Some(InstallerMode::Sfx) => {}
                }
            }

            primary = payload.exists().then_some(payload);
        }

        let ready = normalize(app, staging)?;
        // 평탄화로 옮겨졌으면 더 이상 가리킬 파일이 없음
        let primary = primary.filter(|p| p.exists());
        if ready {
            app.version_latest.write_marker(staging)?;
        }

        Ok(StagedUpdate {
            dir: staging.to_path_buf(),
            reused: false,
            primary,
            ready,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 스테이징 트리 정리
///
/// - 비어 있으면 실패 (`false`)
/// - 폴더 하나만 있으면 그 내용을 한 단계 위로 올리고 반복
/// - 파일 하나만 있으면 완료
/// - 여러 항목이면 불필요 파일을 지우고 완료
pub fn normalize(app: &AppDescriptor, staging: &Path) -> Result<bool> {
    loop {
        let entries = top_level_entries(staging)?;
        match entries.as_slice() {
            [] => {
                tracing::warn!("[Staging] {}: Failure downloading or extracting this app", app.name);
                return Ok(false);
            }
            [only] if only.is_dir() => flatten(only, staging)?,
            [_] => return Ok(true),
            _ => {
                prune_unwanted(app, &entries)?;
                return Ok(true);
            }
        }
    }
}

/// `dir`의 내용을 `parent`로 옮기고 `dir`을 삭제
fn flatten(dir: &Path, parent: &Path) -> Result<()> {
    // foo/foo/ 처럼 같은 이름의 자식이 있어도 충돌하지 않도록 먼저 임시 이름으로 바꿈
    let holding = parent.join(format!(".flatten-{}", uuid::Uuid::new_v4()));
    std::fs::rename(dir, &holding).fs_context("flatten staging", dir)?;

    for entry in top_level_entries(&holding)? {
        let Some(name) = entry.file_name() else { continue };
        let dest = parent.join(name);
        std::fs::rename(&entry, &dest).fs_context("flatten staging", &dest)?;
    }
    std::fs::remove_dir(&holding).fs_context("flatten staging", &holding)?;
    Ok(())
}

fn prune_unwanted(app: &AppDescriptor, entries: &[PathBuf]) -> Result<()> {
    let patterns: Vec<Regex> = app
        .blob_unwanted
        .iter()
        .filter_map(|p| match Regex::new(&format!("^(?:{})$", p)) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("[Staging] {}: Invalid unwanted pattern '{}': {}", app.name, p, e);
                None
            }
        })
        .collect();

    let mut listing = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = file_name(entry);
        if patterns.iter().any(|re| re.is_match(&name)) {
            if entry.is_dir() {
                std::fs::remove_dir_all(entry).fs_context("remove unwanted", entry)?;
            } else {
                std::fs::remove_file(entry).fs_context("remove unwanted", entry)?;
            }
            tracing::info!("[Staging] {}: removed unwanted entry {}", app.name, name);
            listing.push(format!("{} (removed)", name));
        } else {
            listing.push(name);
        }
    }

    tracing::info!("[Staging] {}: extracted files: {}", app.name, listing.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VersionInfo;

    fn app_in(target: &Path) -> AppDescriptor {
        AppDescriptor::new("Demo", target, VersionInfo::new(serde_json::json!({"blobs": []})))
    }

    #[test]
    fn flattens_single_top_level_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(staging.join("foo")).unwrap();
        std::fs::write(staging.join("foo/a.txt"), b"a").unwrap();
        std::fs::write(staging.join("foo/b.txt"), b"b").unwrap();

        assert!(normalize(&app_in(tmp.path()), &staging).unwrap());

        assert!(!staging.join("foo").exists());
        assert_eq!(std::fs::read(staging.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(staging.join("b.txt")).unwrap(), b"b");
    }

    #[test]
    fn flattens_repeatedly_and_handles_same_name_child() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(staging.join("app/app/bin")).unwrap();
        std::fs::write(staging.join("app/app/bin/tool.exe"), b"MZ").unwrap();
        std::fs::write(staging.join("app/app/readme.txt"), b"r").unwrap();

        assert!(normalize(&app_in(tmp.path()), &staging).unwrap());

        assert!(staging.join("bin/tool.exe").is_file());
        assert!(staging.join("readme.txt").is_file());
        assert!(!staging.join("app").exists());
    }

    #[test]
    fn empty_staging_is_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&staging).unwrap();

        assert!(!normalize(&app_in(tmp.path()), &staging).unwrap());
    }

    #[test]
    fn single_file_is_done() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("Demo.exe"), b"MZ").unwrap();

        assert!(normalize(&app_in(tmp.path()), &staging).unwrap());
        assert!(staging.join("Demo.exe").is_file());
    }

    #[test]
    fn prunes_unwanted_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(staging.join("docs")).unwrap();
        std::fs::write(staging.join("docs/manual.pdf"), b"pdf").unwrap();
        std::fs::write(staging.join("app.exe"), b"MZ").unwrap();
        std::fs::write(staging.join("README.md"), b"readme").unwrap();

        let mut app = app_in(tmp.path());
        app.blob_unwanted = vec!["README.*".to_string(), "docs".to_string(), "(".to_string()];

        assert!(normalize(&app, &staging).unwrap());
        assert!(staging.join("app.exe").is_file());
        assert!(!staging.join("README.md").exists());
        assert!(!staging.join("docs").exists());
    }

    #[test]
    fn unwanted_patterns_match_whole_name() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("stage");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("app.exe"), b"MZ").unwrap();
        std::fs::write(staging.join("app.exe.sig"), b"sig").unwrap();

        let mut app = app_in(tmp.path());
        app.blob_unwanted = vec!["app\\.exe".to_string()];

        normalize(&app, &staging).unwrap();
        assert!(!staging.join("app.exe").exists());
        assert!(staging.join("app.exe.sig").exists());
    }
}
