//! 디렉토리 소스 확장 — glob 패턴 매칭과 가상 소스 이름
//!
//! 디렉토리 소스는 `file_pattern`에 매칭되는 각 파일을 독립적인
//! 가상 소스로 추적합니다. 가상 소스는 디렉토리의 폴링 주기와
//! 우선순위를 공유합니다.

use std::path::{Path, PathBuf};

use glob::Pattern;

use logwarden_core::error::SourceError;

/// `file_pattern`을 컴파일합니다.
pub fn compile_pattern(pattern: &str) -> Result<Pattern, SourceError> {
    Pattern::new(pattern).map_err(|e| SourceError::InvalidPattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

/// 디렉토리에서 패턴에 매칭되는 일반 파일을 나열합니다.
///
/// 결정적 동작을 위해 경로 기준으로 정렬하여 반환합니다.
/// 하위 디렉토리는 내려가지 않습니다.
pub async fn expand_directory(
    dir: &Path,
    pattern: &Pattern,
) -> Result<Vec<PathBuf>, SourceError> {
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SourceError::NotFound {
            path: dir.display().to_string(),
        },
        std::io::ErrorKind::PermissionDenied => SourceError::PermissionDenied {
            path: dir.display().to_string(),
        },
        _ => SourceError::ReadFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        },
    })?;

    let mut matches = Vec::new();
    loop {
        let dir_entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "directory entry read failed");
                break;
            }
        };
        let path = dir_entry.path();
        let is_file = dir_entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str())
            && pattern.matches(file_name)
        {
            matches.push(path);
        }
    }

    matches.sort();
    Ok(matches)
}

/// 디렉토리 소스 내 파일의 가상 소스 이름을 만듭니다.
///
/// 예: 소스 `app_logs`의 `access.log` → `app_logs/access.log`
pub fn virtual_source_name(source_name: &str, file: &Path) -> String {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    format!("{source_name}/{file_name}")
}
