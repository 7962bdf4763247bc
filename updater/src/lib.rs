//! # superelixier 업데이트 엔진
//!
//! 포터블 애플리케이션의 새 릴리스를 내려받아 스테이징 폴더에 풀고,
//! 사용자 데이터를 보존하면서 기존 설치 폴더 위에 병합합니다.
//!
//! ## 동작 원리
//! - **다운로드(fetcher.rs)**: 리다이렉트/스크립트 리다이렉트 처리, 파일 이름 결정
//! - **스테이징(staging.rs)**: 다운로드 → 압축 해제 → 인스톨러 처리 → 단일 폴더 평탄화 → 불필요 파일 제거 → 버전 마커
//! - **보류 캐시(deferred.rs)**: 설치 폴더가 사용 중이면 스테이징을 다음 실행까지 보관
//! - **병합(merge.rs)**: 보존 목록 계산, 잠금 검사(lock.rs), 교체, 히스토리(history.rs)
//!
//! ## 디렉터리 구조
//! ```text
//! <target_dir>/.superelixier-cache/<random-id>/        실행별 스테이징
//! <target_dir>/.superelixier-cache/.deferred/<app>/    보류 슬롯
//! <appdir>/.superelixier-history/<timestamp>/          교체된 파일
//! ```
//!
//! 버전 비교와 원격 소스 조회는 이 크레이트 밖(바이너리 크레이트)에서 수행하고,
//! 여기서는 [`AppDescriptor`]만 받습니다.

// ══════════════════════════════════════════════════════
// 모듈
// ══════════════════════════════════════════════════════

pub mod deferred;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod history;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod staging;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use deferred::DeferredCache;
pub use error::{Result, UpdaterError};
pub use extract::ExtractTools;
pub use fetcher::Fetcher;
pub use history::HistoryStore;
pub use lock::{FileLockMap, ProbeOutcome};
pub use merge::MergeEngine;
pub use paths::{make_path_native, CacheLayout, VERSION_MARKER};
pub use staging::{StagedUpdate, Stager};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use error::IoContext;

// ══════════════════════════════════════════════════════
// 애플리케이션 정의
// ══════════════════════════════════════════════════════

/// 인스톨러 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerMode {
    /// 자동 압축 해제 실행 파일: `.exe`를 아카이브로 취급
    Sfx,
    /// Inno Setup 인스톨러: innoextract로 풀기
    Innoextract,
}

/// 앱별 선택 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optionals {
    #[serde(default)]
    pub installer: Option<InstallerMode>,
}

/// 원격 소스가 알려준 최신 버전 정보
///
/// 내용은 폴링 계층이 정하며 이 크레이트는 동등 비교와 `blobs` 읽기만 합니다.
/// 버전 마커(`superelixier.json`)에 그대로 기록됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionInfo(serde_json::Value);

impl VersionInfo {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// 다운로드 URL 목록
    pub fn blobs(&self) -> Vec<String> {
        self.0
            .get("blobs")
            .and_then(|b| b.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// 버전 마커 파일 읽기. 파일이 없으면 `Ok(None)`
    pub fn read_marker(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(VERSION_MARKER);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).fs_context("read version marker", &path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| UpdaterError::FileSystem {
                operation: "parse version marker".to_string(),
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn write_marker(&self, dir: &Path) -> Result<()> {
        let path = dir.join(VERSION_MARKER);
        let json = serde_json::to_string(&self.0).map_err(|e| UpdaterError::FileSystem {
            operation: "serialize version marker".to_string(),
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, json).fs_context("write version marker", &path)
    }
}

/// 업데이트 대상 애플리케이션
///
/// 폴링 계층이 실행마다 한 번 만들며 이 크레이트에서는 읽기만 합니다.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    pub name: String,
    /// 설치 폴더 (`target_dir/name`)
    pub appdir: PathBuf,
    /// 설치 폴더의 부모
    pub target_dir: PathBuf,
    /// 상대 다운로드 URL을 풀 때 쓰는 페이지 주소
    pub url: Option<String>,
    /// 업데이트 후에도 보존할 상대 경로 (`/` 구분, glob 허용)
    pub appdatas: Vec<String>,
    /// 압축 해제 후 지울 파일 이름 정규식
    pub blob_unwanted: Vec<String>,
    pub optionals: Optionals,
    pub version_latest: VersionInfo,
}

impl AppDescriptor {
    pub fn new(name: &str, target_dir: &Path, version_latest: VersionInfo) -> Self {
        Self {
            name: name.to_string(),
            appdir: target_dir.join(name),
            target_dir: target_dir.to_path_buf(),
            url: None,
            appdatas: Vec::new(),
            blob_unwanted: Vec::new(),
            optionals: Optionals::default(),
            version_latest,
        }
    }
}

// ══════════════════════════════════════════════════════
// UpdateManager
// ══════════════════════════════════════════════════════

/// 업데이트 엔진 설정
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// 교체된 파일을 히스토리 폴더로 옮길지 여부
    pub keep_history: bool,
    pub tools: ExtractTools,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            keep_history: true,
            tools: ExtractTools::default(),
        }
    }
}

/// 앱 하나를 처리한 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// 새 파일이 설치 폴더에 병합됨
    Updated,
    /// 설치 폴더가 새로 만들어짐
    Installed,
    /// 설치 폴더가 사용 중: 업데이트 파일을 보류 슬롯에 보관
    Deferred,
    /// 다운로드/압축 해제 결과가 비어 있어 옮길 것이 없음
    NothingToDo,
}

/// 앱 단위 다운로드/설치/업데이트를 담당하는 매니저
///
/// 앱 간 병합은 순차적으로만 실행해야 합니다.
pub struct UpdateManager {
    config: UpdaterConfig,
    fetcher: Fetcher,
}

impl UpdateManager {
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        Ok(Self {
            config,
            fetcher: Fetcher::new()?,
        })
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    fn stager(&self) -> Stager<'_> {
        Stager::new(&self.fetcher, &self.config.tools)
    }

    /// 기존 설치를 업데이트
    pub async fn project_update(&self, app: &AppDescriptor) -> Result<ProjectOutcome> {
        let staged = self.stager().download_and_prepare(app).await?;
        Self::log_staged(app, &staged);

        let outcome = if !staged.ready {
            ProjectOutcome::NothingToDo
        } else if MergeEngine::new(self.config.keep_history).merge(app, &staged.dir)? {
            ProjectOutcome::Updated
        } else {
            DeferredCache::new(&app.target_dir).store(&staged.dir, app)?;
            ProjectOutcome::Deferred
        };

        Self::post_install(app)?;
        Ok(outcome)
    }

    /// 설치되지 않은 앱을 새로 설치
    pub async fn project_install(&self, app: &AppDescriptor) -> Result<ProjectOutcome> {
        let staged = self.stager().download_and_prepare(app).await?;
        Self::log_staged(app, &staged);

        let outcome = if staged.ready {
            std::fs::rename(&staged.dir, &app.appdir).fs_context("install", &app.appdir)?;
            tracing::info!("[Updater] {} installed to {}", app.name, app.appdir.display());
            ProjectOutcome::Installed
        } else {
            ProjectOutcome::NothingToDo
        };

        Self::post_install(app)?;
        Ok(outcome)
    }

    fn log_staged(app: &AppDescriptor, staged: &StagedUpdate) {
        if let Some(primary) = &staged.primary {
            tracing::debug!("[Updater] {}: primary payload {}", app.name, primary.display());
        }
        if !staged.ready {
            // 비어 있는 스테이징은 pre_exit_cleanup에서 지워짐
            tracing::warn!("[Updater] {}: nothing to apply from {}", app.name, staged.dir.display());
        }
    }

    /// 설치/업데이트 후 앱별 후처리
    fn post_install(app: &AppDescriptor) -> Result<()> {
        // VS Code 계열은 data 폴더가 있어야 포터블 모드로 동작
        if matches!(app.name.as_str(), "VSCode" | "VSCodium") && app.appdir.is_dir() {
            let data = app.appdir.join("data");
            std::fs::create_dir_all(&data).fs_context("create portable data folder", &data)?;
        }
        Ok(())
    }

    /// 종료 전 비어 있는 캐시 폴더 정리
    pub fn pre_exit_cleanup<P: AsRef<Path>>(target_dirs: &[P]) {
        for target in target_dirs {
            let layout = CacheLayout::new(target.as_ref());
            if let Err(e) = paths::remove_empty_dirs(layout.cache_root(), true) {
                tracing::warn!("[Updater] Cache cleanup failed for {}: {}", target.as_ref().display(), e);
            }
        }
    }
}
