//! 업데이트 엔진 통합 테스트
//!
//! ## 테스트 시나리오
//! 1. 병합: 멱등성, 사용자 데이터 보존, 히스토리 보관
//! 2. 잠금: 사용 중인 설치 폴더는 건드리지 않고 보류
//! 3. 보류 캐시 재사용: 네트워크 없이 UpdateManager 전체 흐름
//! 4. 에러 타입

use crate::{
    AppDescriptor, DeferredCache, MergeEngine, ProjectOutcome, UpdateManager, UpdaterConfig,
    UpdaterError, VersionInfo,
};
use fs2::FileExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 상대 경로 → 내용 스냅샷
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    crate::paths::list_files(dir)
        .into_iter()
        .map(|f| {
            let rel = f.strip_prefix(dir).unwrap().to_path_buf();
            let content = std::fs::read(&f).unwrap();
            (rel, content)
        })
        .collect()
}

fn write(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn test_app(target: &Path, version: &str) -> AppDescriptor {
    AppDescriptor::new(
        "Demo",
        target,
        VersionInfo::new(json!({
            "version": version,
            "blobs": ["https://downloads.example/demo.zip"],
        })),
    )
}

/// 기존 설치 (1.0) 와 새 스테이징 (1.1)
fn installed_and_staged(target: &Path) -> (AppDescriptor, PathBuf) {
    let mut app = test_app(target, "1.1");
    app.appdatas = vec!["settings.ini".to_string(), "profile".to_string()];

    write(&app.appdir.join("Demo.exe"), b"exe 1.0");
    write(&app.appdir.join("lib/core.dll"), b"dll 1.0");
    write(&app.appdir.join("settings.ini"), b"user settings");
    write(&app.appdir.join("profile/bookmarks.json"), b"user bookmarks");

    let staging = target.join(".superelixier-cache/run");
    write(&staging.join("Demo.exe"), b"exe 1.1");
    write(&staging.join("lib/core.dll"), b"dll 1.1");
    write(&staging.join("lib/new.dll"), b"new in 1.1");
    write(&staging.join("settings.ini"), b"default settings");
    write(&staging.join("profile/bookmarks.json"), b"default bookmarks");
    app.version_latest.write_marker(&staging).unwrap();

    (app, staging)
}

// ═══════════════════════════════════════════════════════
// 테스트 1: 병합
// ═══════════════════════════════════════════════════════

#[test]
fn test_merge_empty_staging_is_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = installed_and_staged(tmp.path());
    let before = snapshot(&app.appdir);

    let staging = tmp.path().join(".superelixier-cache/empty");
    std::fs::create_dir_all(&staging).unwrap();

    let merged = MergeEngine::new(true).merge(&app, &staging).unwrap();
    assert!(merged);
    assert_eq!(snapshot(&app.appdir), before, "설치 폴더가 그대로여야 함");
    assert!(
        !app.appdir.join(".superelixier-history").exists(),
        "히스토리가 생기면 안 됨"
    );

    // 두 번째도 같음
    std::fs::create_dir_all(&staging).unwrap();
    assert!(MergeEngine::new(true).merge(&app, &staging).unwrap());
    assert_eq!(snapshot(&app.appdir), before);

    println!("✓ 빈 스테이징 병합 멱등성 테스트 통과");
}

#[test]
fn test_merge_preserves_appdata() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, staging) = installed_and_staged(tmp.path());

    assert!(MergeEngine::new(false).merge(&app, &staging).unwrap());

    assert_eq!(std::fs::read(app.appdir.join("settings.ini")).unwrap(), b"user settings");
    assert_eq!(
        std::fs::read(app.appdir.join("profile/bookmarks.json")).unwrap(),
        b"user bookmarks"
    );
    assert_eq!(std::fs::read(app.appdir.join("Demo.exe")).unwrap(), b"exe 1.1");
    assert_eq!(std::fs::read(app.appdir.join("lib/new.dll")).unwrap(), b"new in 1.1");
    assert_eq!(
        VersionInfo::read_marker(&app.appdir).unwrap(),
        Some(app.version_latest.clone())
    );
    assert!(!staging.exists(), "병합 후 스테이징은 삭제되어야 함");

    println!("✓ 사용자 데이터 보존 테스트 통과");
}

#[test]
fn test_merge_history_keeps_replaced_files() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, staging) = installed_and_staged(tmp.path());

    assert!(MergeEngine::new(true).merge(&app, &staging).unwrap());

    let history_root = app.appdir.join(".superelixier-history");
    let runs: Vec<PathBuf> = std::fs::read_dir(&history_root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1, "실행당 히스토리 폴더는 하나");

    let run = &runs[0];
    assert_eq!(std::fs::read(run.join("Demo.exe")).unwrap(), b"exe 1.0");
    assert_eq!(std::fs::read(run.join("lib/core.dll")).unwrap(), b"dll 1.0");
    // 새로 추가된 파일과 보존된 파일은 히스토리에 없음
    assert!(!run.join("lib/new.dll").exists());
    assert!(!run.join("settings.ini").exists());

    assert_eq!(std::fs::read(app.appdir.join("lib/core.dll")).unwrap(), b"dll 1.1");

    println!("✓ 히스토리 보관 테스트 통과");
}

// ═══════════════════════════════════════════════════════
// 테스트 2: 잠금
// ═══════════════════════════════════════════════════════

#[test]
fn test_locked_install_defers_then_merges() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, staging) = installed_and_staged(tmp.path());
    let install_before = snapshot(&app.appdir);
    let staging_before = snapshot(&staging);

    // 실행 중인 앱이 라이브러리를 잡고 있는 상황
    let holder = std::fs::File::open(app.appdir.join("lib/core.dll")).unwrap();
    holder.lock_exclusive().unwrap();

    let merged = MergeEngine::new(true).merge(&app, &staging).unwrap();
    assert!(!merged, "잠긴 설치 폴더는 병합하면 안 됨");
    assert_eq!(snapshot(&app.appdir), install_before, "설치 폴더 변경 없음");
    assert_eq!(snapshot(&staging), staging_before, "스테이징 보존");

    FileExt::unlock(&holder).unwrap();
    drop(holder);

    assert!(MergeEngine::new(true).merge(&app, &staging).unwrap());
    assert_eq!(std::fs::read(app.appdir.join("lib/core.dll")).unwrap(), b"dll 1.1");

    println!("✓ 잠금 보류 후 재시도 테스트 통과");
}

// ═══════════════════════════════════════════════════════
// 테스트 3: 보류 캐시 재사용 (네트워크 없음)
// ═══════════════════════════════════════════════════════

fn deferred_slot(app: &AppDescriptor) -> PathBuf {
    let slot = DeferredCache::new(&app.target_dir).slot(&app.name);
    write(&slot.join("Demo.exe"), b"exe 1.1");
    write(&slot.join("lib/core.dll"), b"dll 1.1");
    app.version_latest.write_marker(&slot).unwrap();
    slot
}

#[tokio::test]
async fn test_project_update_from_deferred_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = installed_and_staged(tmp.path());
    let slot = deferred_slot(&app);

    let manager = UpdateManager::new(UpdaterConfig::default()).unwrap();
    let outcome = manager.project_update(&app).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Updated);
    assert_eq!(std::fs::read(app.appdir.join("Demo.exe")).unwrap(), b"exe 1.1");
    assert!(!slot.exists(), "사용한 보류 슬롯은 정리되어야 함");

    println!("✓ 보류 슬롯 재사용 업데이트 테스트 통과");
}

#[tokio::test]
async fn test_project_update_locked_keeps_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let (app, _) = installed_and_staged(tmp.path());
    let slot = deferred_slot(&app);

    let holder = std::fs::File::open(app.appdir.join("Demo.exe")).unwrap();
    holder.lock_exclusive().unwrap();

    let manager = UpdateManager::new(UpdaterConfig::default()).unwrap();
    let outcome = manager.project_update(&app).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Deferred);
    assert!(slot.join("Demo.exe").is_file(), "보류 슬롯이 그대로 남아야 함");
    assert_eq!(std::fs::read(app.appdir.join("Demo.exe")).unwrap(), b"exe 1.0");

    FileExt::unlock(&holder).unwrap();
    println!("✓ 잠긴 상태에서 보류 슬롯 유지 테스트 통과");
}

#[tokio::test]
async fn test_project_install_from_deferred_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let mut app = test_app(tmp.path(), "2.0");
    app.name = "VSCodium".to_string();
    app.appdir = tmp.path().join("VSCodium");
    deferred_slot(&app);

    let manager = UpdateManager::new(UpdaterConfig::default()).unwrap();
    let outcome = manager.project_install(&app).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Installed);
    assert!(app.appdir.join("Demo.exe").is_file());
    assert!(app.appdir.join("superelixier.json").is_file());
    assert!(app.appdir.join("data").is_dir(), "포터블 data 폴더 생성");

    UpdateManager::pre_exit_cleanup(&[tmp.path()]);
    assert!(
        !tmp.path().join(".superelixier-cache").exists(),
        "빈 캐시 폴더는 종료 시 정리"
    );

    println!("✓ 보류 슬롯 설치 테스트 통과");
}

#[tokio::test]
async fn test_empty_download_is_not_applied() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut app, _) = installed_and_staged(tmp.path());
    // 다운로드 대상이 없으면 스테이징이 비어 준비되지 않음
    app.version_latest = VersionInfo::new(json!({"version": "1.1", "blobs": []}));
    let before = snapshot(&app.appdir);

    let manager = UpdateManager::new(UpdaterConfig::default()).unwrap();
    assert_eq!(manager.project_update(&app).await.unwrap(), ProjectOutcome::NothingToDo);
    assert_eq!(snapshot(&app.appdir), before, "설치 폴더는 그대로");
    assert!(!app.appdir.join(".superelixier-history").exists());

    let mut fresh = test_app(tmp.path(), "1.0");
    fresh.name = "Fresh".to_string();
    fresh.appdir = tmp.path().join("Fresh");
    fresh.version_latest = VersionInfo::new(json!({"version": "1.0", "blobs": []}));
    assert_eq!(manager.project_install(&fresh).await.unwrap(), ProjectOutcome::NothingToDo);
    assert!(!fresh.appdir.exists(), "빈 스테이징으로 설치하지 않음");

    println!("✓ 빈 다운로드 미적용 테스트 통과");
}

#[test]
fn test_pre_exit_cleanup_keeps_pending_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let app = test_app(tmp.path(), "1.1");
    let slot = deferred_slot(&app);
    std::fs::create_dir_all(tmp.path().join(".superelixier-cache/abandoned/empty")).unwrap();

    UpdateManager::pre_exit_cleanup(&[tmp.path()]);

    assert!(slot.join("Demo.exe").exists());
    assert!(!tmp.path().join(".superelixier-cache/abandoned").exists());

    println!("✓ 종료 정리 테스트 통과");
}

// ═══════════════════════════════════════════════════════
// 테스트 4: 에러 타입
// ═══════════════════════════════════════════════════════

#[test]
fn test_display_all_variants() {
    let errors = vec![
        UpdaterError::TrustViolation {
            from_host: "a.example".into(),
            to_host: "b.example".into(),
        },
        UpdaterError::resolution("/x", "missing host"),
        UpdaterError::Network { message: "reset".into() },
        UpdaterError::Http { status_code: 404, url: "https://a.example/x".into() },
        UpdaterError::FileSystem {
            operation: "rename".into(),
            path: "/tmp/x".into(),
            message: "denied".into(),
        },
        UpdaterError::PermissionDenied { path: "/tmp/x".into() },
        UpdaterError::Extraction {
            tool: "7-Zip".into(),
            file: "a.7z".into(),
            message: "exit code 2".into(),
        },
        UpdaterError::Config { message: "bad".into() },
    ];

    for err in &errors {
        assert!(!err.to_string().is_empty());
        assert!(!err.user_message().is_empty());
    }
    assert!(errors[0].to_string().contains("b.example"));
    assert!(errors[3].to_string().contains("404"));
}

#[test]
fn test_error_serde_roundtrip() {
    let err = UpdaterError::TrustViolation {
        from_host: "a.example".into(),
        to_host: "b.example".into(),
    };
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["type"], "TrustViolation");
    assert_eq!(json["details"]["to_host"], "b.example");

    let back: UpdaterError = serde_json::from_value(json).unwrap();
    assert!(matches!(back, UpdaterError::TrustViolation { .. }));
}

#[test]
fn test_from_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err = UpdaterError::from_io(&io, "move new file", Path::new("/apps/Demo/x.dll"));
    match err {
        UpdaterError::FileSystem { operation, path, .. } => {
            assert_eq!(operation, "move new file");
            assert!(path.ends_with("x.dll"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
