//! superelixier: 포터블 앱 업데이트 도구
//!
//! 원격 소스 확인, 설정, 상태 출력, 실행 루프를 담당합니다.
//! 다운로드/병합 엔진은 `superelixier-updater-lib` 크레이트에 있습니다.

pub mod config;
pub mod instance_lock;
pub mod runner;
pub mod sources;
pub mod status;
