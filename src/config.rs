//! 설정 파일 관리
//!
//! `superelixier.toml`을 읽어 실행 전체에서 쓰는 [`Config`]를 만듭니다.
//! 전역 상태 없이 `main`에서 한 번 만들어 참조로 넘깁니다.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use superelixier_updater_lib::{make_path_native, ExtractTools, InstallerMode, UpdaterConfig};

pub const CONFIG_FILE_NAME: &str = "superelixier.toml";

/// 설정 파일 경로 결정
pub fn config_file_path() -> PathBuf {
    // 1. 실행 파일 옆
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let cfg = dir.join(CONFIG_FILE_NAME);
            if cfg.exists() {
                return cfg;
            }
        }
    }

    // 2. CWD (없어도 이 경로로 에러 메시지를 냄)
    PathBuf::from(CONFIG_FILE_NAME)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub updater: UpdaterSection,
    #[serde(default)]
    pub auth: AuthSection,
    /// 설치 대상 폴더 → 앱 목록
    #[serde(default)]
    pub local: BTreeMap<String, Vec<String>>,
    /// 키는 소문자 앱 ID
    #[serde(default)]
    pub available: BTreeMap<String, AvailableApp>,
    /// 상대 도구 경로의 기준 (설정 파일이 있는 폴더)
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterSection {
    #[serde(default)]
    pub eula_accepted: bool,
    #[serde(default = "default_true")]
    pub keep_history: bool,
    #[serde(default = "default_check_workers")]
    pub check_workers: usize,
    pub sevenzip: Option<String>,
    pub innoextract: Option<String>,
}

impl Default for UpdaterSection {
    fn default() -> Self {
        Self {
            eula_accepted: false,
            keep_history: true,
            check_workers: default_check_workers(),
            sevenzip: None,
            innoextract: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_check_workers() -> usize {
    8
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSection {
    pub github_token: Option<String>,
}

impl AuthSection {
    /// 빈 문자열은 토큰 없음으로 취급
    pub fn token(&self) -> Option<&str> {
        self.github_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Github,
    Appveyor,
    Html,
}

/// `[available.<id>]` 항목
#[derive(Debug, Clone, Deserialize)]
pub struct AvailableApp {
    pub name: String,
    pub repo: RepoKind,
    pub user: Option<String>,
    pub project: Option<String>,
    /// 다운로드 파일 이름 정규식
    pub blob_re: Option<String>,
    #[serde(default)]
    pub appdatas: Vec<String>,
    #[serde(default)]
    pub blob_unwanted: Vec<String>,
    pub installer: Option<InstallerMode>,
    pub url: Option<String>,
    pub version_re: Option<String>,
    pub branch: Option<String>,
}

/// 설치 대상 폴더 하나와 그 안에서 관리할 앱
#[derive(Debug, Clone)]
pub struct Job {
    pub target_dir: PathBuf,
    pub app: AvailableApp,
}

impl Config {
    /// 지정된 경로(없으면 [`config_file_path`])에서 설정 로드
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let mut cfg = Self::parse(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        cfg.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::info!("[Config] Loaded from {}", path.display());
        Ok(cfg)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(content)?;
        // 앱 ID는 대소문자 구분 없이 찾음
        cfg.available = cfg
            .available
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        if cfg.updater.check_workers == 0 {
            bail!("updater.check_workers must be at least 1");
        }
        Ok(cfg)
    }

    pub fn ensure_eula(&self) -> Result<()> {
        if !self.updater.eula_accepted {
            bail!(
                "The license terms have not been accepted. \
                 Set `eula_accepted = true` in the [updater] section to continue."
            );
        }
        Ok(())
    }

    fn resolve_tool(&self, tool: &Option<String>) -> Option<PathBuf> {
        tool.as_deref().filter(|t| !t.trim().is_empty()).map(|t| {
            let native = make_path_native(t);
            if native.is_absolute() {
                native
            } else {
                self.base_dir.join(native)
            }
        })
    }

    /// 업데이트 엔진에 넘길 설정
    pub fn updater_config(&self, keep_history_override: Option<bool>) -> UpdaterConfig {
        UpdaterConfig {
            keep_history: keep_history_override.unwrap_or(self.updater.keep_history),
            tools: ExtractTools {
                sevenzip: self.resolve_tool(&self.updater.sevenzip),
                innoextract: self.resolve_tool(&self.updater.innoextract),
            },
        }
    }

    /// 설정 파일에 나온 설치 대상 폴더 (네이티브 경로)
    pub fn target_dirs(&self) -> Vec<PathBuf> {
        self.local.keys().map(|p| make_path_native(p)).collect()
    }

    /// `[local]`에 나온 앱 중 `[available]`에 정의가 있는 것만
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs = Vec::new();
        for (path, apps) in &self.local {
            let target_dir = make_path_native(path);
            for id in apps {
                match self.available.get(&id.to_lowercase()) {
                    Some(app) => jobs.push(Job {
                        target_dir: target_dir.clone(),
                        app: app.clone(),
                    }),
                    None => tracing::warn!("[Config] '{}' is not a known application", id),
                }
            }
        }
        jobs
    }
}
