//! 에러 타입
//!
//! ## 지원하는 에러 상황
//! - 네트워크 끊김 / HTTP 오류
//! - 신뢰할 수 없는 도메인으로의 스크립트 리다이렉트
//! - URL 해석 실패
//! - 외부 압축 해제 도구 실패
//! - 파일 시스템 오류 / 권한 거부
//!
//! 잠긴 설치 폴더는 에러가 아닙니다. `merge`가 `false`를 반환하고
//! 업데이트 파일은 다음 실행을 위해 보류됩니다.

use std::fmt;
use std::path::Path;
use serde::{Deserialize, Serialize};

/// 업데이터 에러 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 스크립트 리다이렉트가 원래 호스트와 다른 호스트를 가리킴
    TrustViolation {
        from_host: String,
        to_host: String,
    },
    /// URL을 정규화할 수 없거나 HTML 페이지에서 리다이렉트 대상을 찾지 못함
    Resolution {
        url: String,
        reason: String,
    },
    /// 네트워크 연결 실패
    Network {
        message: String,
    },
    /// 성공이 아닌 HTTP 응답
    Http {
        status_code: u16,
        url: String,
    },
    /// 파일 시스템 오류
    FileSystem {
        operation: String,
        path: String,
        message: String,
    },
    /// 보존 대상 파일의 스테이징 사본을 지울 수 없음
    PermissionDenied {
        path: String,
    },
    /// 외부 추출 도구 실패
    Extraction {
        tool: String,
        file: String,
        message: String,
    },
    /// 설정 오류
    Config {
        message: String,
    },
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::TrustViolation { from_host, to_host } => {
                write!(
                    f,
                    "Could not do a script-triggered download because '{}' is not the trusted domain '{}'",
                    to_host, from_host
                )
            }
            UpdaterError::Resolution { url, reason } => {
                write!(f, "Failed to resolve URL '{}': {}", url, reason)
            }
            UpdaterError::Network { message } => {
                write!(f, "Network error: {}", message)
            }
            UpdaterError::Http { status_code, url } => {
                write!(f, "HTTP error ({}) for {}", status_code, url)
            }
            UpdaterError::FileSystem { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
            UpdaterError::PermissionDenied { path } => {
                write!(f, "Permission denied for {}", path)
            }
            UpdaterError::Extraction { tool, file, message } => {
                write!(f, "{} failed on '{}': {}", tool, file, message)
            }
            UpdaterError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for UpdaterError {}

impl UpdaterError {
    /// 사용자에게 표시할 한 줄 메시지
    pub fn user_message(&self) -> String {
        match self {
            UpdaterError::TrustViolation { .. } => {
                "Download blocked: the download domain is not trusted.".to_string()
            }
            UpdaterError::Resolution { .. } => {
                "Failed to find a download URL.".to_string()
            }
            UpdaterError::Network { .. } | UpdaterError::Http { .. } => {
                "Could not connect to URL or API.".to_string()
            }
            UpdaterError::FileSystem { .. } => {
                "A file operation failed. Check disk space and permissions.".to_string()
            }
            UpdaterError::PermissionDenied { path } => {
                format!("Permission denied for {}", path)
            }
            UpdaterError::Extraction { tool, .. } => {
                format!("Extraction with {} failed.", tool)
            }
            UpdaterError::Config { message } => {
                format!("Configuration error: {}", message)
            }
        }
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        if let Some(status) = err.status() {
            UpdaterError::Http {
                status_code: status.as_u16(),
                url: url.to_string(),
            }
        } else if err.is_connect() {
            UpdaterError::Network {
                message: format!("connection to {} failed", url),
            }
        } else {
            UpdaterError::Network {
                message: err.to_string(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &Path) -> Self {
        UpdaterError::FileSystem {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn resolution(url: &str, reason: &str) -> Self {
        UpdaterError::Resolution {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;

/// `std::io::Result`에 작업 이름과 경로를 붙이는 헬퍼
pub(crate) trait IoContext<T> {
    fn fs_context(self, operation: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn fs_context(self, operation: &str, path: &Path) -> Result<T> {
        self.map_err(|e| UpdaterError::from_io(&e, operation, path))
    }
}
