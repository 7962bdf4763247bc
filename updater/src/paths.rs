//! 경로 / 아카이브 정규화
//!
//! 설정 파일의 `/` 구분 경로를 네이티브 경로로 바꾸고,
//! 다운로드한 파일이 아카이브인지 실행 파일인지 판정하며,
//! 캐시/히스토리 디렉터리 배치를 한 곳에서 정의합니다.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IoContext, Result};

/// 대상 폴더 아래 캐시 디렉터리 이름
pub const CACHE_DIR: &str = ".superelixier-cache";
/// 캐시 아래 보류(deferred) 슬롯 디렉터리 이름
pub const DEFERRED_DIR: &str = ".deferred";
/// 설치 폴더 아래 히스토리 디렉터리 이름
pub const HISTORY_DIR: &str = ".superelixier-history";
/// 버전 마커 파일 이름
pub const VERSION_MARKER: &str = "superelixier.json";
/// 다운로드 중 임시 파일 이름
pub const INCOMPLETE_DOWNLOAD: &str = "download-incomplete";

const ARCHIVE_EXTENSIONS: &[&str] = &[
    "001", "7z", "bz2", "bzip2", "gz", "gzip", "lzma", "rar", "tar", "tgz", "txz", "xz", "zip",
];

const PROBE_EXTENSIONS: &[&str] = &[
    "bat", "cmd", "com", "dll", "exe", "elf", "js", "jse", "msc", "ps1", "sh", "vbe", "vbs", "wsf",
    "wsh",
];

/// `D:/Portable/apps` 같은 경로를 네이티브 경로로 변환
///
/// 첫 요소가 `C:`처럼 드라이브 문자만 있으면 `C:\`로 보정합니다.
pub fn make_path_native(path: &str) -> PathBuf {
    let mut native = PathBuf::new();
    if path.starts_with('/') {
        native.push(std::path::MAIN_SEPARATOR.to_string());
    }

    for (idx, crumb) in path.split('/').filter(|c| !c.is_empty()).enumerate() {
        if idx == 0 && crumb.len() == 2 && crumb.ends_with(':') {
            native.push(format!("{}{}", crumb, std::path::MAIN_SEPARATOR));
        } else {
            native.push(crumb);
        }
    }
    native
}

fn extension_lower(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 7-Zip으로 풀어야 하는 파일인지 판정 (`sfx` 모드면 `.exe`도 포함)
pub fn is_archive(name: &str, include_sfx: bool) -> bool {
    match extension_lower(name) {
        Some(ext) => ARCHIVE_EXTENSIONS.contains(&ext.as_str()) || (include_sfx && ext == "exe"),
        None => false,
    }
}

pub fn is_executable(name: &str) -> bool {
    extension_lower(name).as_deref() == Some("exe")
}

/// 잠금 검사 대상을 줄일 때 쓰는 실행 파일/스크립트 확장자인지 판정
pub fn is_probe_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PROBE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 다운로드 파일 이름에서 쿼리를 떼어낼지 판단할 때 쓰는 확장자 목록
pub(crate) fn is_known_download_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    ext == "exe" || ARCHIVE_EXTENSIONS.contains(&ext.as_str())
}

/// `dir` 아래의 모든 일반 파일 (재귀)
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("[Paths] Error walking {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// 최상위 항목 이름 목록
pub(crate) fn top_level_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).fs_context("list directory", dir)? {
        let entry = entry.fs_context("list directory", dir)?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

pub(crate) fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut it| it.next().is_none())
        .unwrap_or(false)
}

/// 이 프로그램이 만든 빈 폴더를 지웁니다.
///
/// 설치된 앱 폴더에는 쓰지 마세요. 앱이 만든 빈 폴더까지 사라집니다.
pub fn remove_empty_dirs(top_dir: &Path, delete_top: bool) -> Result<()> {
    if !top_dir.is_dir() {
        return Ok(());
    }

    loop {
        let mut removed_any = false;
        // 깊은 경로부터 보면 한 바퀴에 대부분 정리됨
        let mut dirs: Vec<PathBuf> = WalkDir::new(top_dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        for dir in dirs {
            if is_empty_dir(&dir) {
                std::fs::remove_dir(&dir).fs_context("remove empty directory", &dir)?;
                removed_any = true;
            }
        }
        if !removed_any {
            break;
        }
    }

    if delete_top && is_empty_dir(top_dir) {
        std::fs::remove_dir(top_dir).fs_context("remove empty directory", top_dir)?;
    }
    Ok(())
}

/// 캐시 / 히스토리 배치
///
/// ```text
/// <target_dir>/.superelixier-cache/<random-id>/        스테이징
/// <target_dir>/.superelixier-cache/.deferred/<app>/    보류 슬롯
/// <appdir>/.superelixier-history/<timestamp>/          히스토리
/// ```
#[derive(Debug, Clone)]
pub struct CacheLayout {
    cache_root: PathBuf,
}

impl CacheLayout {
    pub fn new(target_dir: &Path) -> Self {
        Self {
            cache_root: target_dir.join(CACHE_DIR),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn staging(&self, random_id: &str) -> PathBuf {
        self.cache_root.join(random_id)
    }

    pub fn deferred_root(&self) -> PathBuf {
        self.cache_root.join(DEFERRED_DIR)
    }

    pub fn deferred(&self, app_name: &str) -> PathBuf {
        self.deferred_root().join(app_name)
    }

    pub fn history_root(appdir: &Path) -> PathBuf {
        appdir.join(HISTORY_DIR)
    }
}
