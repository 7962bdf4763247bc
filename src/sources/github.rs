//! GitHub Release API 소스
//!
//! `releases/latest`의 에셋 중 `blob_re`에 맞는 것을 다운로드 대상으로 삼고,
//! 릴리스의 `published_at` 시각으로 설치 버전과 비교합니다.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::cmp::Ordering;
use superelixier_updater_lib::VersionInfo;

use super::{field, AppCommon, AppSource};

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// GitHub Release 응답 (필요한 필드만)
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

/// GitHub Release Asset
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

pub struct GithubApp {
    common: AppCommon,
    user: String,
    project: String,
    token: Option<String>,
    /// API 베이스 URL (기본: "https://api.github.com")
    /// 로컬 mock 서버 테스트 시 "http://127.0.0.1:9876" 등으로 오버라이드
    api_base: String,
}

impl GithubApp {
    pub fn new(common: AppCommon, user: &str, project: &str, token: Option<&str>) -> Self {
        Self {
            common,
            user: user.to_string(),
            project: project.to_string(),
            token: token.map(|t| t.to_string()),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// base_url을 오버라이드 (테스트/mock 서버용)
    pub fn with_api_base(mut self, base_url: &str) -> Self {
        if !base_url.trim().is_empty() {
            self.api_base = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    /// 최신 릴리스 가져오기 (프리릴리스 제외)
    pub async fn fetch_latest_release(&self, http: &reqwest::Client) -> Result<GitHubRelease> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, self.user, self.project
        );

        let mut request = http
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error ({}): {}", status, body.trim());
        }

        let release: GitHubRelease = response.json().await?;
        Ok(release)
    }
}

/// 버전 객체 또는 예전 형식(날짜 문자열 하나)에서 배포 시각을 꺼냄
fn published_at(version: &VersionInfo) -> Option<DateTime<Utc>> {
    let raw = field(version, "published_at").or_else(|| version.as_value().as_str())?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl AppSource for GithubApp {
    fn common(&self) -> &AppCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut AppCommon {
        &mut self.common
    }

    async fn fetch_latest(&self, http: &reqwest::Client) -> Result<VersionInfo> {
        let release = self.fetch_latest_release(http).await?;
        let published = release
            .published_at
            .clone()
            .with_context(|| format!("release {} has no publish date", release.tag_name))?;

        let blobs: Vec<String> = release
            .assets
            .iter()
            .filter(|a| self.common.blob_matches(&a.name))
            .map(|a| a.browser_download_url.clone())
            .collect();
        tracing::debug!(
            "[GitHub] {}: {} ({} matching asset(s))",
            self.common.name,
            release.tag_name,
            blobs.len()
        );

        Ok(VersionInfo::new(json!({
            "tag": release.tag_name,
            "published_at": published,
            "blobs": blobs,
        })))
    }

    fn compare(&self, latest: &VersionInfo, installed: &VersionInfo) -> Option<Ordering> {
        Some(published_at(latest)?.cmp(&published_at(installed)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvailableApp, Job, RepoKind};

    fn app() -> GithubApp {
        let job = Job {
            target_dir: std::path::PathBuf::from("/tmp/portable"),
            app: AvailableApp {
                name: "Demo".to_string(),
                repo: RepoKind::Github,
                user: Some("someone".to_string()),
                project: Some("demo".to_string()),
                blob_re: None,
                appdatas: vec![],
                blob_unwanted: vec![],
                installer: None,
                url: None,
                version_re: None,
                branch: None,
            },
        };
        GithubApp::new(AppCommon::from_job(&job).unwrap(), "someone", "demo", None)
    }

    #[test]
    fn test_compare_publish_dates() {
        let app = app();
        let older = VersionInfo::new(json!({"published_at": "2021-03-01T10:00:00Z"}));
        let newer = VersionInfo::new(json!({"published_at": "2021-04-01T10:00:00Z"}));

        assert_eq!(app.compare(&newer, &older), Some(Ordering::Greater));
        assert_eq!(app.compare(&older, &newer), Some(Ordering::Less));
        assert_eq!(app.compare(&newer, &newer.clone()), Some(Ordering::Equal));
    }

    #[test]
    fn test_compare_accepts_bare_date_marker() {
        let app = app();
        let latest = VersionInfo::new(json!({"published_at": "2021-04-01T10:00:00Z"}));
        let legacy = VersionInfo::new(json!("2021-04-01T10:00:00Z"));
        assert_eq!(app.compare(&latest, &legacy), Some(Ordering::Equal));

        let junk = VersionInfo::new(json!({"tag": "v1"}));
        assert_eq!(app.compare(&latest, &junk), None);
    }

    #[test]
    fn test_api_base_override() {
        let app = app().with_api_base("http://127.0.0.1:9876/");
        assert_eq!(app.api_base, "http://127.0.0.1:9876");
        let app = app.with_api_base("  ");
        assert_eq!(app.api_base, "http://127.0.0.1:9876");
    }
}
