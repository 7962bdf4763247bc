//! 버전 문자열 비교
//!
//! Appveyor 빌드 번호(`1.4.0.312`)나 웹 페이지에서 뽑은 버전(`v2.1`, `3.0-beta2`)처럼
//! 자릿수가 일정하지 않은 버전을 비교합니다.

use std::cmp::Ordering;
use std::fmt;

/// 숫자 자리 목록 + 선택적 프리릴리스 꼬리표
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    pub parts: Vec<u64>,
    pub prerelease: Option<String>,
}

impl SemVer {
    /// `v1.2.3`, `1.2`, `1.2.3.4`, `1.0.0-beta.1` 형식을 파싱
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix(|c: char| c == 'v' || c == 'V').unwrap_or(s);
        let (numbers, prerelease) = match s.split_once(|c: char| c == '-' || c == '+') {
            Some((n, pre)) => (n, Some(pre.to_string()).filter(|p| !p.is_empty())),
            None => (s, None),
        };

        let parts = numbers
            .split('.')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        if parts.is_empty() {
            return None;
        }

        Some(Self { parts, prerelease })
    }

    pub fn is_newer_than(&self, other: &SemVer) -> bool {
        self > other
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn part(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", numbers.join("."))?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        // 빠진 자리는 0 (1.2 == 1.2.0)
        let len = self.parts.len().max(other.parts.len());
        for idx in 0..len {
            match self.part(idx).cmp(&other.part(idx)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 두 버전 문자열 비교. 하나라도 해석할 수 없으면 `None`
pub fn compare_versions(latest: &str, installed: &str) -> Option<Ordering> {
    Some(SemVer::parse(latest)?.cmp(&SemVer::parse(installed)?))
}
