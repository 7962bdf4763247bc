//! 원격 소스: 최신 버전 조회와 설치 버전 비교
//!
//! 소스 종류마다 [`AppSource`] 구현이 하나씩 있습니다.
//! - [`GithubApp`]: GitHub 최신 릴리스, `published_at` 시각 비교
//! - [`AppveyorApp`]: Appveyor 브랜치 최신 빌드, 버전 번호 비교
//! - [`HtmlApp`]: 다운로드 페이지 스크래핑, 버전 번호 비교
//!
//! 비교 결과는 [`UpdateStatus`]로 기록되고, 업데이트가 필요한 앱은
//! [`AppSource::descriptor`]로 업데이트 엔진에 넘어갑니다.

pub mod appveyor;
pub mod github;
pub mod html;
pub mod version;

pub use appveyor::AppveyorApp;
pub use github::GithubApp;
pub use html::HtmlApp;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use superelixier_updater_lib::{AppDescriptor, Optionals, VersionInfo};

use crate::config::{Job, RepoKind};
use crate::status::UpdateStatus;

// ══════════════════════════════════════════════════════
// 공통 앱 정보
// ══════════════════════════════════════════════════════

/// 모든 소스가 공유하는 앱 정보와 확인 결과
#[derive(Debug, Clone)]
pub struct AppCommon {
    pub name: String,
    pub target_dir: PathBuf,
    pub appdir: PathBuf,
    /// 상대 다운로드 링크의 기준 페이지
    pub url: Option<String>,
    pub appdatas: Vec<String>,
    pub blob_unwanted: Vec<String>,
    pub optionals: Optionals,
    pub blob_re: Option<Regex>,
    pub version_latest: Option<VersionInfo>,
    pub status: UpdateStatus,
}

impl AppCommon {
    pub fn from_job(job: &Job) -> Result<Self> {
        let app = &job.app;
        let blob_re = app
            .blob_re
            .as_deref()
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("{}: invalid blob_re", app.name))?;

        Ok(Self {
            name: app.name.clone(),
            target_dir: job.target_dir.clone(),
            appdir: job.target_dir.join(&app.name),
            url: app.url.clone(),
            appdatas: app.appdatas.clone(),
            blob_unwanted: app.blob_unwanted.clone(),
            optionals: Optionals {
                installer: app.installer,
            },
            blob_re,
            version_latest: None,
            status: UpdateStatus::Unknown,
        })
    }

    /// 다운로드 후보 이름이 `blob_re`에 맞는지 (정규식이 없으면 모두 허용)
    pub fn blob_matches(&self, candidate: &str) -> bool {
        self.blob_re
            .as_ref()
            .map(|re| re.is_match(candidate))
            .unwrap_or(true)
    }
}

// ══════════════════════════════════════════════════════
// AppSource
// ══════════════════════════════════════════════════════

#[async_trait]
pub trait AppSource: Send + Sync {
    fn common(&self) -> &AppCommon;
    fn common_mut(&mut self) -> &mut AppCommon;

    /// 원격에서 최신 버전 정보를 가져옵니다 (`blobs` 포함).
    async fn fetch_latest(&self, http: &reqwest::Client) -> Result<VersionInfo>;

    /// 최신 버전과 설치된 버전 비교. 비교할 수 없으면 `None`
    fn compare(&self, latest: &VersionInfo, installed: &VersionInfo) -> Option<Ordering>;

    fn name(&self) -> &str {
        &self.common().name
    }

    fn appdir(&self) -> &Path {
        &self.common().appdir
    }

    fn latest_version(&self) -> Option<&VersionInfo> {
        self.common().version_latest.as_ref()
    }

    fn blobs(&self) -> Vec<String> {
        self.latest_version().map(|v| v.blobs()).unwrap_or_default()
    }

    fn appdatas(&self) -> &[String] {
        &self.common().appdatas
    }

    fn unwanted_patterns(&self) -> &[String] {
        &self.common().blob_unwanted
    }

    fn optionals(&self) -> &Optionals {
        &self.common().optionals
    }

    fn status(&self) -> UpdateStatus {
        self.common().status
    }

    /// 최신 버전을 알 때만 업데이트 엔진용 정의를 만듭니다.
    fn descriptor(&self) -> Option<AppDescriptor> {
        let common = self.common();
        let mut descriptor =
            AppDescriptor::new(self.name(), &common.target_dir, self.latest_version()?.clone());
        descriptor.url = common.url.clone();
        descriptor.appdatas = self.appdatas().to_vec();
        descriptor.blob_unwanted = self.unwanted_patterns().to_vec();
        descriptor.optionals = self.optionals().clone();
        Some(descriptor)
    }

    /// 최신 버전을 조회하고 상태를 기록합니다.
    async fn check(&mut self, http: &reqwest::Client) -> UpdateStatus {
        let status = match self.fetch_latest(http).await {
            Ok(latest) => {
                let status = evaluate(self.appdir(), &latest, |l, i| self.compare(l, i));
                self.common_mut().version_latest = Some(latest);
                status
            }
            Err(e) => {
                tracing::warn!("[Sources] {}: {:#}", self.name(), e);
                if self.appdir().is_dir() {
                    UpdateStatus::Failed
                } else {
                    UpdateStatus::NotInstalled
                }
            }
        };
        self.common_mut().status = status;
        status
    }
}

/// 설치 폴더와 버전 마커를 보고 상태 결정
pub fn evaluate<F>(appdir: &Path, latest: &VersionInfo, compare: F) -> UpdateStatus
where
    F: Fn(&VersionInfo, &VersionInfo) -> Option<Ordering>,
{
    if !appdir.is_dir() {
        return UpdateStatus::NotInstalled;
    }

    let installed = match VersionInfo::read_marker(appdir) {
        Ok(Some(installed)) => installed,
        Ok(None) => return UpdateStatus::NoVersionFile,
        Err(e) => {
            tracing::debug!("[Sources] {}", e);
            return UpdateStatus::Error;
        }
    };

    match compare(latest, &installed) {
        Some(Ordering::Equal) => UpdateStatus::NoUpdate,
        Some(Ordering::Greater) => UpdateStatus::UpdateAvailable,
        Some(Ordering::Less) => UpdateStatus::InstalledNewer,
        None => UpdateStatus::Error,
    }
}

/// 버전 객체의 문자열 필드
pub(crate) fn field<'a>(version: &'a VersionInfo, key: &str) -> Option<&'a str> {
    version.as_value().get(key).and_then(|v| v.as_str())
}

/// 설정 항목으로 소스 구현 생성
pub fn build_source(job: &Job, github_token: Option<&str>) -> Result<Box<dyn AppSource>> {
    let common = AppCommon::from_job(job)?;
    let app = &job.app;
    let required = |value: &Option<String>, key: &str| {
        value
            .clone()
            .ok_or_else(|| anyhow!("{}: `{}` is required for {:?} sources", app.name, key, app.repo))
    };

    let source: Box<dyn AppSource> = match app.repo {
        RepoKind::Github => Box::new(GithubApp::new(
            common,
            &required(&app.user, "user")?,
            &required(&app.project, "project")?,
            github_token,
        )),
        RepoKind::Appveyor => Box::new(AppveyorApp::new(
            common,
            &required(&app.user, "user")?,
            &required(&app.project, "project")?,
            app.branch.as_deref(),
        )),
        RepoKind::Html => {
            let version_re = Regex::new(&required(&app.version_re, "version_re")?)
                .with_context(|| format!("{}: invalid version_re", app.name))?;
            let url = required(&app.url, "url")?;
            Box::new(HtmlApp::new(common, &url, version_re))
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AvailableApp;
    use serde_json::json;

    fn job(target: &Path, repo: RepoKind) -> Job {
        Job {
            target_dir: target.to_path_buf(),
            app: AvailableApp {
                name: "Demo".to_string(),
                repo,
                user: Some("someone".to_string()),
                project: Some("demo".to_string()),
                blob_re: Some(r"demo-.*-win64\.zip".to_string()),
                appdatas: vec!["settings".to_string()],
                blob_unwanted: vec!["README.*".to_string()],
                installer: None,
                url: None,
                version_re: None,
                branch: None,
            },
        }
    }

    fn by_string(latest: &VersionInfo, installed: &VersionInfo) -> Option<Ordering> {
        Some(field(latest, "version")?.cmp(field(installed, "version")?))
    }

    #[test]
    fn test_evaluate_states() {
        let tmp = tempfile::tempdir().unwrap();
        let appdir = tmp.path().join("Demo");
        let latest = VersionInfo::new(json!({"version": "b"}));

        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::NotInstalled);

        std::fs::create_dir_all(&appdir).unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::NoVersionFile);

        VersionInfo::new(json!({"version": "a"})).write_marker(&appdir).unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::UpdateAvailable);

        latest.write_marker(&appdir).unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::NoUpdate);

        VersionInfo::new(json!({"version": "c"})).write_marker(&appdir).unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::InstalledNewer);

        VersionInfo::new(json!({"other": 1})).write_marker(&appdir).unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::Error);

        std::fs::write(appdir.join("superelixier.json"), b"{broken").unwrap();
        assert_eq!(evaluate(&appdir, &latest, by_string), UpdateStatus::Error);
    }

    #[test]
    fn test_descriptor_requires_latest_version() {
        let tmp = tempfile::tempdir().unwrap();
        let mut j = job(tmp.path(), RepoKind::Github);
        j.app.installer = Some(superelixier_updater_lib::InstallerMode::Sfx);
        let mut source = build_source(&j, None).unwrap();
        assert!(source.descriptor().is_none());

        source.common_mut().version_latest =
            Some(VersionInfo::new(json!({"blobs": ["https://x.test/a.zip"]})));
        let descriptor = source.descriptor().unwrap();
        assert_eq!(descriptor.appdir, tmp.path().join("Demo"));
        assert_eq!(descriptor.appdatas, source.appdatas().to_vec());
        assert_eq!(descriptor.blob_unwanted, vec!["README.*".to_string()]);
        assert_eq!(descriptor.optionals, *source.optionals());
        assert_eq!(
            descriptor.optionals.installer,
            Some(superelixier_updater_lib::InstallerMode::Sfx)
        );
        assert_eq!(source.unwanted_patterns(), descriptor.blob_unwanted.as_slice());
        assert_eq!(descriptor.version_latest.blobs(), vec!["https://x.test/a.zip".to_string()]);
    }

    #[test]
    fn test_blob_matching() {
        let tmp = tempfile::tempdir().unwrap();
        let common = AppCommon::from_job(&job(tmp.path(), RepoKind::Github)).unwrap();
        assert!(common.blob_matches("demo-1.2-win64.zip"));
        assert!(!common.blob_matches("demo-1.2-linux.tar.gz"));
    }

    #[test]
    fn test_build_source_validates_required_fields() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(build_source(&job(tmp.path(), RepoKind::Github), None).is_ok());
        assert!(build_source(&job(tmp.path(), RepoKind::Appveyor), None).is_ok());

        // html은 url과 version_re가 필요
        assert!(build_source(&job(tmp.path(), RepoKind::Html), None).is_err());

        let mut html = job(tmp.path(), RepoKind::Html);
        html.app.url = Some("https://example.com/download".to_string());
        html.app.version_re = Some(r"Version ([0-9.]+)".to_string());
        let source = build_source(&html, None).unwrap();
        assert_eq!(source.name(), "Demo");
        assert_eq!(source.status(), UpdateStatus::Unknown);

        let mut bad = job(tmp.path(), RepoKind::Github);
        bad.app.blob_re = Some("(".to_string());
        assert!(build_source(&bad, None).is_err());
    }
}
