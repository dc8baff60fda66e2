//! 룰 파일 로딩 — YAML 디렉토리 스캔과 검증
//!
//! 디렉토리의 `.yml`/`.yaml` 파일을 룰 하나씩 로드합니다.
//! 유효하지 않은 룰 파일은 에러 로그와 함께 건너뛰고, 나머지 유효한
//! 룰은 그대로 적용됩니다. 파일 하나의 문제로 전체 로딩이 실패하지
//! 않습니다.

use std::collections::HashSet;
use std::path::Path;

use super::types::NotificationRule;

/// 룰 로딩 결과
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// 로드된 유효한 룰
    pub rules: Vec<NotificationRule>,
    /// 건너뛴 파일 수 (파싱/검증 실패, 중복 이름)
    pub skipped: usize,
}

/// 디렉토리에서 알림 룰을 로드합니다.
///
/// 디렉토리가 없으면 빈 결과를 반환합니다 (룰 없이 기동 허용).
pub async fn load_rules_from_dir(dir: &Path) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();
    let mut seen_names: HashSet<String> = HashSet::new();

    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) => {
            tracing::warn!(
                dir = %dir.display(),
                error = %e,
                "rules directory unavailable, starting with no rules"
            );
            return outcome;
        }
    };

    let mut paths = Vec::new();
    while let Ok(Some(dir_entry)) = read_dir.next_entry().await {
        let path = dir_entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yml" || ext == "yaml");
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read rule file, skipping");
                outcome.skipped += 1;
                continue;
            }
        };

        let rule: NotificationRule = match serde_yaml::from_str(&content) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to parse rule file, skipping");
                outcome.skipped += 1;
                continue;
            }
        };

        if let Err(e) = rule.validate() {
            tracing::error!(path = %path.display(), error = %e, "invalid rule, skipping");
            outcome.skipped += 1;
            continue;
        }

        if !seen_names.insert(rule.name.clone()) {
            tracing::error!(
                path = %path.display(),
                rule = %rule.name,
                "duplicate rule name, skipping"
            );
            outcome.skipped += 1;
            continue;
        }

        tracing::debug!(rule = %rule.name, path = %path.display(), "rule loaded");
        outcome.rules.push(rule);
    }

    tracing::info!(
        dir = %dir.display(),
        loaded = outcome.rules.len(),
        skipped = outcome.skipped,
        "notification rules loaded"
    );
    outcome
}
