//! 보류 캐시: 잠금 때문에 병합하지 못한 스테이징을 다음 실행까지 보관
//!
//! 앱마다 슬롯은 하나(`.superelixier-cache/.deferred/<app>/`)이며,
//! 슬롯의 버전 마커가 최신 버전과 같을 때만 재사용합니다.

use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result};
use crate::paths::CacheLayout;
use crate::{AppDescriptor, VersionInfo};

#[derive(Debug, Clone)]
pub struct DeferredCache {
    layout: CacheLayout,
}

impl DeferredCache {
    pub fn new(target_dir: &Path) -> Self {
        Self {
            layout: CacheLayout::new(target_dir),
        }
    }

    pub fn slot(&self, app_name: &str) -> PathBuf {
        self.layout.deferred(app_name)
    }

    /// 슬롯이 최신 버전이면 그 경로를 돌려줍니다.
    ///
    /// 마커가 다르거나 읽을 수 없으면 슬롯을 지우고 `None`.
    /// 마커가 아예 없으면 슬롯은 그대로 두고 `None`.
    pub fn try_reuse(&self, app: &AppDescriptor) -> Result<Option<PathBuf>> {
        let slot = self.slot(&app.name);
        if !slot.is_dir() {
            return Ok(None);
        }

        let stale = match VersionInfo::read_marker(&slot) {
            Ok(Some(version)) if version == app.version_latest => return Ok(Some(slot)),
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::debug!("[Deferred] {}: slot has no version marker", app.name);
                false
            }
            Err(e) => {
                tracing::warn!("[Deferred] {}: unreadable version marker: {}", app.name, e);
                true
            }
        };

        if stale {
            tracing::info!("[Deferred] {}: discarding outdated deferred update", app.name);
            std::fs::remove_dir_all(&slot).fs_context("remove stale deferred slot", &slot)?;
        }
        Ok(None)
    }

    /// 스테이징을 앱의 슬롯으로 옮깁니다. 기존 슬롯은 교체됩니다.
    pub fn store(&self, staging: &Path, app: &AppDescriptor) -> Result<()> {
        let slot = self.slot(&app.name);
        // 재사용한 슬롯을 자기 자신으로 덮어쓰면 안 됨
        if staging == slot {
            tracing::info!("[Deferred] {}: update stays deferred", app.name);
            return Ok(());
        }

        if slot.exists() {
            std::fs::remove_dir_all(&slot).fs_context("replace deferred slot", &slot)?;
        }
        let root = self.layout.deferred_root();
        std::fs::create_dir_all(&root).fs_context("create deferred cache", &root)?;
        std::fs::rename(staging, &slot).fs_context("store deferred update", &slot)?;

        tracing::info!(
            "[Deferred] {}: files are in use, update kept for the next run",
            app.name
        );
        Ok(())
    }
}
