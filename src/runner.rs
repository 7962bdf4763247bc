//! 실행 루프
//!
//! 1. 설정의 앱마다 소스를 만들고 병렬로 버전 확인 (워커 수 제한)
//! 2. 업데이트/설치가 필요한 앱을 하나씩 순서대로 처리
//! 3. 종료 전 빈 캐시 폴더 정리

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use superelixier_updater_lib::fetcher::USER_AGENT;
use superelixier_updater_lib::{ProjectOutcome, UpdateManager};

use crate::config::Config;
use crate::sources::{build_source, AppSource};
use crate::status::{print_action, print_error, print_status, Action};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 확인만 하고 업데이트하지 않음
    pub check_only: bool,
    /// `--no-history` 로 설정값을 덮어씀
    pub keep_history: Option<bool>,
}

/// 실행 결과 집계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub checked: usize,
    pub updated: usize,
    pub installed: usize,
    pub deferred: usize,
    pub failed: usize,
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(std::time::Duration::from_secs(30))
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")
}

pub async fn run(config: &Config, options: &RunOptions) -> Result<RunSummary> {
    let http = http_client()?;

    let mut sources = Vec::new();
    for job in config.jobs() {
        match build_source(&job, config.auth.token()) {
            Ok(source) => sources.push(source),
            Err(e) => print_error(&format!("{:#}", e)),
        }
    }

    let checked = check_all(sources, &http, config.updater.check_workers).await;
    let mut summary = RunSummary {
        checked: checked.len(),
        ..Default::default()
    };

    if !options.check_only {
        let manager = UpdateManager::new(config.updater_config(options.keep_history))?;
        summary = apply_updates(&checked, &manager, summary).await;
    }

    UpdateManager::pre_exit_cleanup(&config.target_dirs());
    Ok(summary)
}

/// 모든 소스를 최대 `workers`개씩 병렬로 확인
///
/// 각 확인은 자기 소스의 상태만 바꾸므로 서로 동기화할 필요가 없습니다.
pub async fn check_all(
    sources: Vec<Box<dyn AppSource>>,
    http: &reqwest::Client,
    workers: usize,
) -> Vec<Box<dyn AppSource>> {
    let mut checked: Vec<Box<dyn AppSource>> = stream::iter(sources)
        .map(|mut source| async move {
            let status = source.check(http).await;
            print_status(source.name(), status);
            source
        })
        .buffer_unordered(workers.max(1))
        .collect()
        .await;

    checked.sort_by(|a, b| a.name().cmp(b.name()));
    checked
}

/// 업데이트가 필요한 앱을 순서대로 처리
///
/// 병합은 설치 폴더를 직접 바꾸므로 앱 사이에서도 동시에 실행하지 않습니다.
pub async fn apply_updates(
    sources: &[Box<dyn AppSource>],
    manager: &UpdateManager,
    mut summary: RunSummary,
) -> RunSummary {
    for source in sources {
        let Some(action) = source.status().action() else {
            continue;
        };
        let Some(descriptor) = source.descriptor() else {
            tracing::warn!("[Runner] {}: no version information, skipping", source.name());
            continue;
        };

        print_action(source.name(), action);
        let result = match action {
            Action::Update | Action::ForcedUpdate => manager.project_update(&descriptor).await,
            Action::Install => manager.project_install(&descriptor).await,
        };

        match result {
            Ok(ProjectOutcome::Updated) => summary.updated += 1,
            Ok(ProjectOutcome::Installed) => summary.installed += 1,
            Ok(ProjectOutcome::Deferred) => summary.deferred += 1,
            Ok(ProjectOutcome::NothingToDo) => {}
            Err(e) => {
                tracing::error!("[Runner] {}: {}", source.name(), e);
                print_error(&format!("{}: {}", source.name(), e.user_message()));
                summary.failed += 1;
            }
        }
    }
    summary
}
