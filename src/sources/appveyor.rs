//! Appveyor CI 소스
//!
//! 브랜치의 마지막 빌드가 성공했으면 첫 번째 잡의 아티팩트 중
//! `blob_re`에 맞는 것을 내려받습니다. 버전은 빌드 버전 번호로 비교합니다.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::cmp::Ordering;
use superelixier_updater_lib::VersionInfo;

use super::version::compare_versions;
use super::{field, AppCommon, AppSource};

const DEFAULT_API_BASE: &str = "https://ci.appveyor.com/api";
const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    build: Build,
}

#[derive(Debug, Deserialize)]
struct Build {
    version: String,
    status: String,
    #[serde(default)]
    jobs: Vec<BuildJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildJob {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    file_name: String,
}

pub struct AppveyorApp {
    common: AppCommon,
    user: String,
    project: String,
    branch: String,
    api_base: String,
}

impl AppveyorApp {
    pub fn new(common: AppCommon, user: &str, project: &str, branch: Option<&str>) -> Self {
        Self {
            common,
            user: user.to_string(),
            project: project.to_string(),
            branch: branch.unwrap_or(DEFAULT_BRANCH).to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, base_url: &str) -> Self {
        if !base_url.trim().is_empty() {
            self.api_base = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        url: &str,
    ) -> Result<T> {
        let response = http.get(url).send().await?;
        if !response.status().is_success() {
            bail!("Appveyor API error ({}) for {}", response.status(), url);
        }
        response
            .json()
            .await
            .with_context(|| format!("unexpected Appveyor response from {}", url))
    }
}

#[async_trait]
impl AppSource for AppveyorApp {
    fn common(&self) -> &AppCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut AppCommon {
        &mut self.common
    }

    async fn fetch_latest(&self, http: &reqwest::Client) -> Result<VersionInfo> {
        let project_url = format!(
            "{}/projects/{}/{}/branch/{}",
            self.api_base, self.user, self.project, self.branch
        );
        let project: ProjectResponse = self.get_json(http, &project_url).await?;
        let build = project.build;

        if build.status != "success" {
            bail!("last build {} has status '{}'", build.version, build.status);
        }
        let job = build
            .jobs
            .first()
            .with_context(|| format!("build {} has no jobs", build.version))?;

        let artifacts_url = format!("{}/buildjobs/{}/artifacts", self.api_base, job.job_id);
        let artifacts: Vec<Artifact> = self.get_json(http, &artifacts_url).await?;

        let blobs: Vec<String> = artifacts
            .iter()
            .filter(|a| self.common.blob_matches(&a.file_name))
            .map(|a| format!("{}/{}", artifacts_url, a.file_name))
            .collect();
        tracing::debug!(
            "[Appveyor] {}: build {} ({} matching artifact(s))",
            self.common.name,
            build.version,
            blobs.len()
        );

        Ok(VersionInfo::new(json!({
            "version": build.version,
            "blobs": blobs,
        })))
    }

    fn compare(&self, latest: &VersionInfo, installed: &VersionInfo) -> Option<Ordering> {
        compare_versions(field(latest, "version")?, field(installed, "version")?)
    }
}
