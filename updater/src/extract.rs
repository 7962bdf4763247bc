//! 아카이브 / 인스톨러 추출
//!
//! - 7-Zip이 설정되어 있으면 `7z x -aoa <file>`을 스테이징 폴더에서 실행
//! - 설정이 없으면 zip / tar / tar.gz / gz 를 내장 추출기로 처리
//! - Inno Setup 인스톨러는 `innoextract -n <file>`로 처리
//!
//! ## 종료 코드
//! 7-Zip: `0` 정상, `1` 경고(로그 후 계속), `2` 이상은 실패.
//! innoextract: `0`이 아니면 실패.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{Result, UpdaterError};

/// 외부 추출 도구 경로
#[derive(Debug, Clone, Default)]
pub struct ExtractTools {
    /// 7z 실행 파일. None이면 내장 추출기 사용
    pub sevenzip: Option<PathBuf>,
    /// innoextract 실행 파일
    pub innoextract: Option<PathBuf>,
}

/// Windows에서 콘솔 창이 뜨지 않도록 플래그 적용
#[cfg(target_os = "windows")]
fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

fn file_label(archive: &Path) -> String {
    archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| archive.display().to_string())
}

async fn run_tool(tool: &Path, args: &[&str], cwd: &Path) -> Result<i32> {
    let mut cmd = Command::new(tool);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    apply_creation_flags(&mut cmd);

    let output = cmd.output().await.map_err(|e| UpdaterError::Extraction {
        tool: tool.display().to_string(),
        file: args.last().map(|s| s.to_string()).unwrap_or_default(),
        message: format!("failed to start: {}", e),
    })?;

    if !output.stderr.is_empty() {
        tracing::debug!(
            "[Extract] {} stderr: {}",
            tool.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    // 시그널로 종료되면 코드가 없음
    Ok(output.status.code().unwrap_or(-1))
}

/// 스테이징 폴더 안의 아카이브를 같은 폴더에 풉니다 (덮어쓰기).
pub async fn extract_archive(tools: &ExtractTools, archive: &Path, staging: &Path) -> Result<()> {
    let name = file_label(archive);

    match &tools.sevenzip {
        Some(sevenzip) => {
            tracing::debug!("[Extract] 7z x -aoa {}", name);
            let code = run_tool(sevenzip, &["x", "-aoa", &name], staging).await?;
            match code {
                0 => Ok(()),
                1 => {
                    tracing::warn!("[Extract] 7-Zip reported warnings for {}", name);
                    Ok(())
                }
                code => Err(UpdaterError::Extraction {
                    tool: "7-Zip".to_string(),
                    file: name,
                    message: format!("exit code {}", code),
                }),
            }
        }
        None => {
            let archive = archive.to_path_buf();
            let staging = staging.to_path_buf();
            tokio::task::spawn_blocking(move || extract_builtin(&archive, &staging))
                .await
                .map_err(|e| UpdaterError::Extraction {
                    tool: "built-in extractor".to_string(),
                    file: name,
                    message: e.to_string(),
                })?
        }
    }
}

/// Inno Setup 인스톨러를 스테이징 폴더에 풉니다.
pub async fn extract_installer(tools: &ExtractTools, installer: &Path, staging: &Path) -> Result<()> {
    let name = file_label(installer);
    let innoextract = tools.innoextract.as_ref().ok_or_else(|| UpdaterError::Config {
        message: "innoextract is not configured".to_string(),
    })?;

    tracing::debug!("[Extract] innoextract -n {}", name);
    let code = run_tool(innoextract, &["-n", &name], staging).await?;
    if code != 0 {
        return Err(UpdaterError::Extraction {
            tool: "innoextract".to_string(),
            file: name,
            message: format!("exit code {}", code),
        });
    }
    Ok(())
}

fn builtin_error(archive: &Path, message: impl ToString) -> UpdaterError {
    UpdaterError::Extraction {
        tool: "built-in extractor".to_string(),
        file: file_label(archive),
        message: message.to_string(),
    }
}

/// zip / tar / tar.gz / gz 내장 추출
fn extract_builtin(archive: &Path, dest: &Path) -> Result<()> {
    let lower = file_label(archive).to_ascii_lowercase();
    let file = std::fs::File::open(archive).map_err(|e| builtin_error(archive, e))?;

    if lower.ends_with(".zip") {
        let mut zip = zip::ZipArchive::new(file).map_err(|e| builtin_error(archive, e))?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| builtin_error(archive, e))?;
            let out_path = match entry.enclosed_name() {
                Some(path) => dest.join(path),
                None => continue,
            };

            if entry.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|e| builtin_error(archive, e))?;
            } else {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| builtin_error(archive, e))?;
                }
                let mut outfile =
                    std::fs::File::create(&out_path).map_err(|e| builtin_error(archive, e))?;
                std::io::copy(&mut entry, &mut outfile).map_err(|e| builtin_error(archive, e))?;
            }
        }
        Ok(())
    } else if lower.ends_with(".tar") {
        tar::Archive::new(file)
            .unpack(dest)
            .map_err(|e| builtin_error(archive, e))
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        let gz = flate2::read::GzDecoder::new(file);
        tar::Archive::new(gz)
            .unpack(dest)
            .map_err(|e| builtin_error(archive, e))
    } else if lower.ends_with(".gz") || lower.ends_with(".gzip") {
        let stem = archive
            .file_stem()
            .map(|s| s.to_os_string())
            .ok_or_else(|| builtin_error(archive, "no file name"))?;
        let mut gz = flate2::read::GzDecoder::new(file);
        let mut outfile =
            std::fs::File::create(dest.join(stem)).map_err(|e| builtin_error(archive, e))?;
        std::io::copy(&mut gz, &mut outfile).map_err(|e| builtin_error(archive, e))?;
        Ok(())
    } else {
        Err(builtin_error(
            archive,
            "format not supported without 7-Zip; set `sevenzip` in the configuration",
        ))
    }
}
