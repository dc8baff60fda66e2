//! 단일 파일 tail 읽기 — 오프셋 기반 증분 읽기와 로테이션 감지
//!
//! [`FileTail`]은 하나의 파일에 대해 `tail -f` 동작을 비동기로
//! 구현합니다.
//!
//! # 로테이션/truncation 감지
//! 현재 파일 크기가 커서보다 작으면 새 파일로 간주합니다.
//! 커서를 0으로 리셋하고 처음부터 다시 읽으며, 바이트를 조용히
//! 버리지 않도록 호출자에게 로테이션을 보고합니다.
//!
//! # 부분 라인 처리
//! 커서는 마지막 완성된 라인 끝까지만 전진합니다. 개행 없이 끝나는
//! 꼬리 바이트는 다음 읽기에서 다시 읽히므로 하나의 논리 라인이
//! 두 엔트리로 쪼개지지 않습니다. 라인이 `max_line_bytes`를 넘으면
//! 그 지점에서 강제 분리합니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use logwarden_core::error::SourceError;

/// 한 번의 읽기에서 나온 완성된 라인
#[derive(Debug)]
pub struct TailLine {
    /// 라인 내용 (개행 제외)
    pub content: String,
    /// 이 라인의 시작 바이트 오프셋
    pub start_offset: u64,
    /// 이 라인 직후의 바이트 오프셋 (개행 포함)
    pub end_offset: u64,
}

/// 한 번의 폴링 읽기 결과
#[derive(Debug, Default)]
pub struct TailOutcome {
    /// 완성된 라인 목록 (파일 순서)
    pub lines: Vec<TailLine>,
    /// 로테이션/truncation 감지 여부
    pub rotated: bool,
    /// 현재 파일 크기
    pub file_size: u64,
    /// 이번에 읽어들인 바이트 수
    pub bytes_read: u64,
}

/// 단일 파일 tail 커서
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    offset: u64,
    chunk_size: usize,
    max_line_bytes: usize,
}

impl FileTail {
    /// 지정한 오프셋에서 시작하는 tail 커서를 생성합니다.
    pub fn new(path: impl Into<PathBuf>, offset: u64, chunk_size: usize, max_line_bytes: usize) -> Self {
        Self {
            path: path.into(),
            offset,
            chunk_size: chunk_size.max(1),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// 현재 커서 오프셋을 반환합니다.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 파일 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 커서 이후에 추가된 완성된 라인들을 읽습니다.
    ///
    /// 커서는 마지막 완성된 라인 끝까지 전진합니다. 파일 크기가
    /// 커서보다 작으면 로테이션으로 간주하여 커서를 0으로 리셋하고
    /// 처음부터 다시 읽습니다.
    pub async fn read_new(&mut self) -> Result<TailOutcome, SourceError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| map_io_error(&self.path, e))?;
        let file_size = metadata.len();

        let mut outcome = TailOutcome {
            file_size,
            ..TailOutcome::default()
        };

        // truncation 기반 로테이션: 크기가 커서보다 줄어들었음
        if file_size < self.offset {
            tracing::info!(
                path = %self.path.display(),
                old_offset = self.offset,
                new_size = file_size,
                "file truncated below cursor, treating as rotation"
            );
            self.offset = 0;
            outcome.rotated = true;
        }

        if file_size == self.offset {
            return Ok(outcome);
        }

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| map_io_error(&self.path, e))?;
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| map_io_error(&self.path, e))?;

        // 새로 도착한 바이트만 청크 단위로 읽음
        let mut available = (file_size - self.offset) as usize;
        let mut buffer: Vec<u8> = Vec::with_capacity(available.min(self.chunk_size * 4));
        let mut chunk = vec![0u8; self.chunk_size];
        while available > 0 {
            let want = available.min(self.chunk_size);
            let n = file
                .read(&mut chunk[..want])
                .await
                .map_err(|e| map_io_error(&self.path, e))?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            available -= n;
        }
        outcome.bytes_read = buffer.len() as u64;

        // 개행 경계로 분리, 꼬리 부분 라인은 커서를 전진시키지 않음
        let mut line_start = 0usize;
        let base = self.offset;
        let mut cursor = 0usize;
        while cursor < buffer.len() {
            let is_newline = buffer[cursor] == b'\n';
            let overlong = !is_newline && cursor - line_start + 1 >= self.max_line_bytes;
            if is_newline || overlong {
                let end = if is_newline { cursor } else { cursor + 1 };
                let raw = &buffer[line_start..end];
                let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                let consumed_end = cursor + 1;
                outcome.lines.push(TailLine {
                    content: String::from_utf8_lossy(raw).into_owned(),
                    start_offset: base + line_start as u64,
                    end_offset: base + consumed_end as u64,
                });
                line_start = consumed_end;
            }
            cursor += 1;
        }

        if let Some(last) = outcome.lines.last() {
            self.offset = last.end_offset;
        }

        Ok(outcome)
    }
}

/// I/O 에러를 소스 에러로 매핑합니다.
fn map_io_error(path: &Path, e: std::io::Error) -> SourceError {
    let path = path.display().to_string();
    match e.kind() {
        std::io::ErrorKind::NotFound => SourceError::NotFound { path },
        std::io::ErrorKind::PermissionDenied => SourceError::PermissionDenied { path },
        _ => SourceError::ReadFailed {
            path,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, content: &[u8]) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    fn append_file(path: &Path, content: &[u8]) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[tokio::test]
    async fn reads_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"first line\nsecond line\n");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        let outcome = tail.read_new().await.unwrap();

        assert_eq!(outcome.lines.len(), 2);
        assert_eq!(outcome.lines[0].content, "first line");
        assert_eq!(outcome.lines[1].content, "second line");
        assert_eq!(tail.offset(), 23);
        assert!(!outcome.rotated);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_not_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"complete\npartial");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        let outcome = tail.read_new().await.unwrap();

        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].content, "complete");
        // 커서는 완성된 라인 끝까지만 전진
        assert_eq!(tail.offset(), 9);

        // 나머지가 도착하면 하나의 논리 라인으로 읽힘
        append_file(&path, b" now complete\n");
        let outcome = tail.read_new().await.unwrap();
        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].content, "partial now complete");
    }

    #[tokio::test]
    async fn incremental_reads_resume_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"one\n");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        let first = tail.read_new().await.unwrap();
        assert_eq!(first.lines.len(), 1);

        append_file(&path, b"two\nthree\n");
        let second = tail.read_new().await.unwrap();
        let contents: Vec<&str> = second.lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, ["two", "three"]);
    }

    #[tokio::test]
    async fn no_new_bytes_yields_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"line\n");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        tail.read_new().await.unwrap();
        let outcome = tail.read_new().await.unwrap();
        assert!(outcome.lines.is_empty());
        assert_eq!(outcome.bytes_read, 0);
    }

    #[tokio::test]
    async fn truncation_resets_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"old content line\nmore old content\n");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        tail.read_new().await.unwrap();
        assert!(tail.offset() > 0);

        // truncation-로테이션: 파일이 커서보다 작아짐
        write_file(&path, b"fresh\n");
        let outcome = tail.read_new().await.unwrap();
        assert!(outcome.rotated);
        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].content, "fresh");
        assert_eq!(tail.offset(), 6);
    }

    #[tokio::test]
    async fn missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.log");
        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        let err = tail.read_new().await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn overlong_line_is_force_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let long = vec![b'x'; 100];
        write_file(&path, &long);

        let mut tail = FileTail::new(&path, 0, 8192, 40);
        let outcome = tail.read_new().await.unwrap();
        // 100바이트가 40바이트 단위로 강제 분리, 꼬리 20바이트는 미완성
        assert_eq!(outcome.lines.len(), 2);
        assert_eq!(outcome.lines[0].content.len(), 40);
        assert_eq!(tail.offset(), 80);
    }

    #[tokio::test]
    async fn crlf_line_endings_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"windows line\r\n");

        let mut tail = FileTail::new(&path, 0, 8192, 65536);
        let outcome = tail.read_new().await.unwrap();
        assert_eq!(outcome.lines[0].content, "windows line");
        // 오프셋은 \r\n을 포함한 전체 바이트를 소비
        assert_eq!(tail.offset(), 14);
    }

    #[tokio::test]
    async fn offsets_account_every_consumed_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_file(&path, b"aa\nbbbb\ncc\n");

        let mut tail = FileTail::new(&path, 0, 4, 65536); // 작은 청크로 경계 테스트
        let outcome = tail.read_new().await.unwrap();
        assert_eq!(outcome.lines.len(), 3);
        assert_eq!(outcome.lines[0].end_offset, 3);
        assert_eq!(outcome.lines[1].end_offset, 8);
        assert_eq!(outcome.lines[2].end_offset, 11);
        // 연속된 라인 오프셋은 빈틈이 없어야 함
        assert_eq!(outcome.lines[1].start_offset, outcome.lines[0].end_offset);
        assert_eq!(outcome.lines[2].start_offset, outcome.lines[1].end_offset);
    }
}
