//! 앱별 업데이트 상태와 터미널 출력
//!
//! 상태마다 색과 메시지가 정해져 있으며 `match`가 모든 경우를 다룹니다.

use crossterm::style::{Color, Stylize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// 설치 폴더가 없음
    NotInstalled,
    /// 설치되어 있지만 `superelixier.json`이 없음
    NoVersionFile,
    NoUpdate,
    UpdateAvailable,
    /// 설치된 버전이 원격보다 새로움
    InstalledNewer,
    /// 설치된 버전 정보를 해석할 수 없음
    Error,
    /// 원격 소스 조회 실패
    Failed,
    /// 아직 확인하지 않음
    Unknown,
}

/// 상태에 따라 실행할 작업
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Update,
    ForcedUpdate,
    Install,
}

impl UpdateStatus {
    pub fn color(&self) -> Color {
        match self {
            UpdateStatus::NoUpdate => Color::White,
            UpdateStatus::InstalledNewer | UpdateStatus::NoVersionFile => Color::Magenta,
            UpdateStatus::UpdateAvailable => Color::Green,
            UpdateStatus::NotInstalled => Color::Cyan,
            UpdateStatus::Error | UpdateStatus::Failed | UpdateStatus::Unknown => Color::Red,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            UpdateStatus::NoUpdate => "No update available",
            UpdateStatus::InstalledNewer => "Installed is newer",
            UpdateStatus::UpdateAvailable => "Update available",
            UpdateStatus::NoVersionFile => "Update forced (no valid version info found)",
            UpdateStatus::NotInstalled => "Will be installed",
            UpdateStatus::Error => "Could not determine the version installed",
            UpdateStatus::Failed => "Could not connect to URL or API",
            UpdateStatus::Unknown => "Failed to check this project",
        }
    }

    pub fn action(&self) -> Option<Action> {
        match self {
            UpdateStatus::UpdateAvailable => Some(Action::Update),
            UpdateStatus::NoVersionFile => Some(Action::ForcedUpdate),
            UpdateStatus::NotInstalled => Some(Action::Install),
            UpdateStatus::NoUpdate
            | UpdateStatus::InstalledNewer
            | UpdateStatus::Error
            | UpdateStatus::Failed
            | UpdateStatus::Unknown => None,
        }
    }
}

impl Action {
    pub fn color(&self) -> Color {
        match self {
            Action::Update => Color::Green,
            Action::ForcedUpdate => Color::Magenta,
            Action::Install => Color::Cyan,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Update => "Updating",
            Action::ForcedUpdate => "Updating (forced)",
            Action::Install => "Installing",
        }
    }
}

/// 상태 한 줄 (`<name>: <message>`)
pub fn status_line(name: &str, status: UpdateStatus) -> String {
    let mut line = format!("{}: {}", name, status.message());
    if status == UpdateStatus::InstalledNewer {
        line.push_str(&format!(
            "\n{}: Please make sure your version wasn't retracted because of problems with it.",
            name
        ));
    }
    line
}

pub fn print_status(name: &str, status: UpdateStatus) {
    println!("{}", status_line(name, status).with(status.color()));
}

pub fn print_action(name: &str, action: Action) {
    println!("{}", format!("{}: {}", name, action.label()).with(action.color()).bold());
}

pub fn print_error(message: &str) {
    println!("{}", message.with(Color::Red).bold());
}
