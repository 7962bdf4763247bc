//! 다운로드 페이지 스크래핑 소스
//!
//! 페이지 본문에서 `version_re`로 버전을 찾고, `href` 링크 중 `blob_re`에 맞는 것을
//! 다운로드 대상으로 삼습니다. 상대 링크는 다운로드할 때 페이지 주소 기준으로 풀립니다.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::cmp::Ordering;
use superelixier_updater_lib::VersionInfo;

use super::version::compare_versions;
use super::{field, AppCommon, AppSource};

pub struct HtmlApp {
    common: AppCommon,
    url: String,
    version_re: Regex,
}

impl HtmlApp {
    pub fn new(mut common: AppCommon, url: &str, version_re: Regex) -> Self {
        common.url = Some(url.to_string());
        Self {
            common,
            url: url.to_string(),
            version_re,
        }
    }

    /// 페이지에서 버전과 다운로드 링크 추출
    pub fn scrape(&self, page: &str) -> Result<(String, Vec<String>)> {
        let captures = self
            .version_re
            .captures(page)
            .with_context(|| format!("no version found on {}", self.url))?;
        let version = captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let href = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#)?;
        let mut blobs: Vec<String> = Vec::new();
        for link in href.captures_iter(page).filter_map(|c| c.get(1)) {
            let link = link.as_str().to_string();
            if self.common.blob_matches(&link) && !blobs.contains(&link) {
                blobs.push(link);
            }
        }
        Ok((version, blobs))
    }
}

#[async_trait]
impl AppSource for HtmlApp {
    fn common(&self) -> &AppCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut AppCommon {
        &mut self.common
    }

    async fn fetch_latest(&self, http: &reqwest::Client) -> Result<VersionInfo> {
        let response = http.get(&self.url).send().await?;
        if !response.status().is_success() {
            bail!("HTTP error ({}) for {}", response.status(), self.url);
        }
        let page = response.text().await?;

        let (version, blobs) = self.scrape(&page)?;
        tracing::debug!(
            "[Html] {}: version {} ({} matching link(s))",
            self.common.name,
            version,
            blobs.len()
        );

        Ok(VersionInfo::new(json!({
            "version": version,
            "blobs": blobs,
        })))
    }

    fn compare(&self, latest: &VersionInfo, installed: &VersionInfo) -> Option<Ordering> {
        compare_versions(field(latest, "version")?, field(installed, "version")?)
    }
}
