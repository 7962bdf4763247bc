//! 원격 다운로드
//!
//! ## 동작 순서
//! 1. URL 정규화: 스킴/호스트가 없으면 참조 URL에서 가져옴
//! 2. 리다이렉트를 따라가는 스트리밍 GET
//! 3. `refresh` 헤더가 있으면 그 URL로 다시 요청
//! 4. HTML 응답이면 `window.location = '...'` 대입을 찾아 다시 요청
//!    (원래 호스트와 같은 호스트일 때만 허용)
//! 5. 응답 본문을 `download-incomplete`에 저장한 뒤 파일 이름을 정해 rename

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::{IoContext, Result, UpdaterError};
use crate::paths::{is_known_download_extension, INCOMPLETE_DOWNLOAD};

pub const USER_AGENT: &str = concat!(
    "Superelixier Updater/",
    env!("CARGO_PKG_VERSION"),
    " (portable application updater)"
);

/// 다운로드 클라이언트
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UpdaterError::Network {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }

    /// `url`을 받아 `staging` 폴더에 저장하고 저장된 파일 경로를 반환
    ///
    /// `referer`는 상대 URL을 풀 때 쓰는 페이지 주소입니다.
    pub async fn fetch(&self, url: &str, referer: Option<&str>, staging: &Path) -> Result<PathBuf> {
        let mut url = normalize_url(url, referer)?;
        tracing::info!("[Fetcher] Downloading file from: {}", url);

        let tmpfile = staging.join(INCOMPLETE_DOWNLOAD);
        let mut response = self.get(&url).await?;

        let refresh = response
            .headers()
            .get("refresh")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_refresh);

        if let Some(target) = refresh {
            let next = normalize_url(&target, Some(url.as_str()))?;
            tracing::info!("[Fetcher] Redirected to: {}", next);
            url = next;
            response = self.get(&url).await?;
        } else if is_html(&response) {
            stream_to_file(response, &tmpfile, url.as_str()).await?;
            let bytes = tokio::fs::read(&tmpfile)
                .await
                .fs_context("read redirect page", &tmpfile)?;
            let page = String::from_utf8_lossy(&bytes);

            let target = find_script_redirect(&page).ok_or_else(|| {
                UpdaterError::resolution(url.as_str(), "no download URL found in HTML page")
            })?;
            let next = normalize_url(&target, Some(url.as_str()))?;
            ensure_same_origin(&url, &next)?;
            tracing::info!("[Fetcher] Redirected to: {}", next);
            url = next;
            response = self.get(&url).await?;
        }

        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        // HTTP 리다이렉트 이후의 주소(CDN 등)가 아니라 요청한 주소 기준
        let filename = remote_filename(&url, disposition.as_deref());

        stream_to_file(response, &tmpfile, url.as_str()).await?;

        let destination = staging.join(&filename);
        tokio::fs::rename(&tmpfile, &destination)
            .await
            .fs_context("rename download", &destination)?;
        tracing::debug!("[Fetcher] Saved {}", destination.display());
        Ok(destination)
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, url.as_str()))?;

        if !response.status().is_success() {
            return Err(UpdaterError::Http {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

async fn stream_to_file(response: reqwest::Response, path: &Path, url: &str) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .fs_context("create download file", path)?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| UpdaterError::from_reqwest(&e, url))?;
        file.write_all(&chunk).await.fs_context("write download file", path)?;
    }
    file.flush().await.fs_context("write download file", path)?;
    Ok(())
}

fn unescape_html(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn has_scheme(raw: &str) -> bool {
    raw.split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .map(|first| first.contains(':'))
        .unwrap_or(false)
}

/// URL 정규화
///
/// `url`에 스킴/호스트가 있으면 그대로, 없으면 `source`의 스킴/호스트를 붙입니다.
/// 경로는 항상 `url`의 것을 씁니다.
pub fn normalize_url(url: &str, source: Option<&str>) -> Result<Url> {
    let raw = unescape_html(url.trim());

    match Url::parse(&raw) {
        Ok(parsed) if parsed.has_host() => return Ok(parsed),
        Ok(_) => return Err(UpdaterError::resolution(url, "URL has no host")),
        // 스킴이 있는데 파싱에 실패했다면 상대 URL이 아님
        Err(e) if has_scheme(&raw) => return Err(UpdaterError::resolution(url, &e.to_string())),
        Err(_) => {}
    }

    let source = source.ok_or_else(|| UpdaterError::resolution(url, "relative URL without a source"))?;
    let base = Url::parse(&unescape_html(source.trim()))
        .map_err(|e| UpdaterError::resolution(source, &e.to_string()))?;
    let host = base
        .host_str()
        .ok_or_else(|| UpdaterError::resolution(source, "source URL has no host"))?;
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let joined = if let Some(rest) = raw.strip_prefix("//") {
        format!("{}://{}", base.scheme(), rest)
    } else if raw.starts_with('/') {
        format!("{}://{}{}", base.scheme(), authority, raw)
    } else {
        format!("{}://{}/{}", base.scheme(), authority, raw)
    };

    match Url::parse(&joined) {
        Ok(parsed) if parsed.has_host() => Ok(parsed),
        Ok(_) => Err(UpdaterError::resolution(url, "URL has no host")),
        Err(e) => Err(UpdaterError::resolution(url, &e.to_string())),
    }
}

/// 스크립트 리다이렉트 대상이 원래 호스트와 같은지 확인
///
/// 공개 접미사 목록 없이 상위 도메인을 비교하면 위험하므로 호스트가 정확히 같아야 합니다.
pub fn ensure_same_origin(original: &Url, redirect: &Url) -> Result<()> {
    if original.host_str() == redirect.host_str() && original.port() == redirect.port() {
        Ok(())
    } else {
        Err(UpdaterError::TrustViolation {
            from_host: original.host_str().unwrap_or_default().to_string(),
            to_host: redirect.host_str().unwrap_or_default().to_string(),
        })
    }
}

/// `refresh: 5; url=https://...` 헤더에서 URL 부분을 꺼냄
pub fn parse_refresh(value: &str) -> Option<String> {
    let (_, rest) = value.split_once(';')?;
    let rest = rest.trim();
    let target = match rest.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("url=") => &rest[4..],
        _ => rest,
    };
    let target = target.trim().trim_matches(|c| c == '\'' || c == '"').trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// HTML 본문에서 `window.location = '...'` 대입을 찾음
pub fn find_script_redirect(page: &str) -> Option<String> {
    let re = Regex::new(r#"window\.location(?:\.href)?\s*=\s*["']([^"']+)["']"#).ok()?;
    re.captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn filename_from_disposition(disposition: &str) -> Option<String> {
    // RFC 5987 `filename*=UTF-8''My%20App.zip` 형식이 우선
    let extended = Regex::new(r#"(?i)filename\*\s*=\s*"?[\w-]*'[^']*'([^";]+)"?"#).ok()?;
    if let Some(raw) = extended.captures(disposition).and_then(|c| c.get(1)) {
        let raw = raw.as_str().trim();
        return Some(
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| raw.to_string()),
        );
    }

    let plain = Regex::new(r#"(?i)filename\s*=\s*"?([^";]+)"?"#).ok()?;
    plain
        .captures(disposition)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || "-_.() ".contains(*c))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.trim_matches('.').is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

/// 저장할 파일 이름 결정
///
/// `Content-Disposition`의 filename이 우선이고, 없으면 URL의 마지막 세그먼트를 씁니다.
/// 세그먼트가 이미 아카이브/실행 파일 확장자로 끝나면 뒤의 쿼리 문자열을 버립니다.
pub fn remote_filename(url: &Url, content_disposition: Option<&str>) -> String {
    if let Some(name) = content_disposition.and_then(filename_from_disposition) {
        return sanitize_filename(&name);
    }

    let segment = url.as_str().rsplit('/').next().unwrap_or_default();
    let segment = match segment.split_once('?') {
        Some((path_part, _)) => {
            let known = Path::new(path_part)
                .extension()
                .and_then(|e| e.to_str())
                .map(is_known_download_extension)
                .unwrap_or(false);
            if known {
                path_part
            } else {
                segment
            }
        }
        None => segment,
    };
    sanitize_filename(segment)
}
