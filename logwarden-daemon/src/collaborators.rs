//! Built-in default collaborators.
//!
//! The core pipeline consumes its parser, analyzer, persistence, and
//! notification channels through narrow traits. Production deployments
//! are expected to plug in real implementations (format-detecting
//! parsers, an AI severity scorer, a database); these defaults keep a
//! standalone daemon functional without any of that infrastructure:
//!
//! * [`PlainParser`] - wraps a raw line without format detection
//! * [`KeywordAnalyzer`] - deterministic keyword-table severity scoring
//! * [`FilePersistence`] - offsets and results as files under data_dir
//! * [`LogChannel`] - notification channel that writes to the log

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use logwarden_core::error::{AnalysisError, DeliveryError, ParseError, StorageError};
use logwarden_core::pipeline::{Analyzer, BoxFuture, NotificationChannel, Parser, Persistence};
use logwarden_core::types::{Analysis, ProcessingResult, Severity, StructuredEvent};

// ─── Parser ──────────────────────────────────────────────────────────

/// Pass-through parser.
///
/// Format detection heuristics live outside this daemon; this default
/// treats every line as an opaque message and rejects only inputs that
/// cannot form a meaningful entry.
pub struct PlainParser {
    max_len: usize,
}

impl PlainParser {
    /// Create a parser with the default 64KB input limit.
    pub fn new() -> Self {
        Self { max_len: 64 * 1024 }
    }
}

impl Default for PlainParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for PlainParser {
    fn name(&self) -> &str {
        "plain"
    }

    fn parse(&self, content: &str, source_hint: &str) -> Result<StructuredEvent, ParseError> {
        if content.len() > self.max_len {
            return Err(ParseError::TooLarge {
                size: content.len(),
                max: self.max_len,
            });
        }
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Failed {
                reason: "empty line".to_owned(),
            });
        }
        Ok(StructuredEvent {
            message: trimmed.to_owned(),
            source_name: source_hint.to_owned(),
            timestamp: None,
            fields: Vec::new(),
        })
    }
}

// ─── Analyzer ────────────────────────────────────────────────────────

/// One row of the keyword scoring table.
struct KeywordRule {
    keywords: &'static [&'static str],
    category: &'static str,
    severity: u8,
    explanation: &'static str,
    recommendation: &'static str,
}

/// Keyword table, evaluated top to bottom; first match wins.
const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        keywords: &["failed password", "authentication failure", "invalid user"],
        category: "authentication",
        severity: 8,
        explanation: "repeated credential failures indicate a possible brute force attempt",
        recommendation: "review source address and consider blocking it",
    },
    KeywordRule {
        keywords: &["accepted password", "session opened"],
        category: "authentication",
        severity: 2,
        explanation: "successful authentication event",
        recommendation: "no action required",
    },
    KeywordRule {
        keywords: &["permission denied", "unauthorized", "forbidden"],
        category: "access_control",
        severity: 6,
        explanation: "access to a protected resource was denied",
        recommendation: "verify the requesting principal and its permissions",
    },
    KeywordRule {
        keywords: &["segfault", "kernel panic", "out of memory"],
        category: "system",
        severity: 7,
        explanation: "process or kernel level fault detected",
        recommendation: "inspect the affected host",
    },
    KeywordRule {
        keywords: &["error", "failure"],
        category: "system",
        severity: 3,
        explanation: "generic error condition reported",
        recommendation: "review surrounding log context",
    },
];

/// Deterministic keyword-based analyzer.
///
/// Stands in for the external AI severity scorer. Scores are stable for
/// a given input, which also makes end-to-end tests reproducible.
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze<'a>(
        &'a self,
        event: &'a StructuredEvent,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Analysis, AnalysisError>> {
        Box::pin(async move {
            let message = event.message.to_lowercase();
            for rule in KEYWORD_RULES {
                if rule.keywords.iter().any(|k| message.contains(k)) {
                    return Ok(Analysis {
                        severity: Severity::clamped(rule.severity),
                        category: rule.category.to_owned(),
                        explanation: rule.explanation.to_owned(),
                        recommendations: vec![rule.recommendation.to_owned()],
                    });
                }
            }
            Ok(Analysis {
                severity: Severity::clamped(1),
                category: "system".to_owned(),
                explanation: "no known pattern matched".to_owned(),
                recommendations: Vec::new(),
            })
        })
    }
}

// ─── Persistence ─────────────────────────────────────────────────────

/// File-backed persistence under the daemon data directory.
///
/// * `offsets.json` - source offsets, written atomically (tmp + rename)
/// * `results.jsonl` - processing results, append-only
/// * `unparsed.jsonl` - raw content preserved on parse failure
pub struct FilePersistence {
    data_dir: PathBuf,
    offsets: Mutex<HashMap<String, u64>>,
}

impl FilePersistence {
    /// Open (or create) the data directory and load persisted offsets.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let offsets_path = data_dir.join("offsets.json");
        let offsets = match tokio::fs::read_to_string(&offsets_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "offsets.json corrupt, starting fresh");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            data_dir,
            offsets: Mutex::new(offsets),
        })
    }

    async fn append_line(&self, file_name: &str, line: &str) -> Result<(), StorageError> {
        let path = self.data_dir.join(file_name);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn flush_offsets(&self, offsets: &HashMap<String, u64>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(offsets)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let tmp = self.data_dir.join("offsets.json.tmp");
        let target = self.data_dir.join("offsets.json");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn save_result<'a>(
        &'a self,
        result: &'a ProcessingResult,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let line = serde_json::to_string(result)
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            self.append_line("results.jsonl", &line).await
        })
    }

    fn save_raw_on_failure<'a>(
        &'a self,
        content: &'a str,
        source_name: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let line = serde_json::to_string(&serde_json::json!({
                "source": source_name,
                "content": content,
            }))
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            self.append_line("unparsed.jsonl", &line).await
        })
    }

    fn save_offset<'a>(
        &'a self,
        source_name: &'a str,
        offset: u64,
        _file_size: u64,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let snapshot = {
                let mut offsets = self.offsets.lock().await;
                offsets.insert(source_name.to_owned(), offset);
                offsets.clone()
            };
            self.flush_offsets(&snapshot).await
        })
    }

    fn load_offset<'a>(
        &'a self,
        source_name: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>, StorageError>> {
        Box::pin(async move { Ok(self.offsets.lock().await.get(source_name).copied()) })
    }
}

// ─── Notification channel ────────────────────────────────────────────

/// Notification channel that writes to the daemon log.
///
/// Useful as a default sink and for deployments where the log stream is
/// already shipped to an alerting system.
pub struct LogChannel {
    channel_name: String,
}

impl LogChannel {
    /// Create a log channel with the given rule-facing identifier.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
        }
    }
}

impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.channel_name
    }

    fn send<'a>(
        &'a self,
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            tracing::info!(
                channel = %self.channel_name,
                subject,
                body,
                "notification"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_parser_trims_and_wraps() {
        let parser = PlainParser::new();
        let event = parser.parse("  hello world \n", "src").unwrap();
        assert_eq!(event.message, "hello world");
        assert_eq!(event.source_name, "src");
    }

    #[test]
    fn plain_parser_rejects_blank() {
        let parser = PlainParser::new();
        assert!(parser.parse("   ", "src").is_err());
    }

    #[tokio::test]
    async fn keyword_analyzer_scores_auth_failures_high() {
        let analyzer = KeywordAnalyzer;
        let event = StructuredEvent {
            message: "Failed password for invalid user admin from 10.0.0.5 port 22".to_owned(),
            source_name: "auth_logs".to_owned(),
            timestamp: None,
            fields: Vec::new(),
        };
        let analysis = analyzer
            .analyze(&event, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(analysis.category, "authentication");
        assert!(analysis.severity.get() >= 7);
    }

    #[tokio::test]
    async fn keyword_analyzer_defaults_low() {
        let analyzer = KeywordAnalyzer;
        let event = StructuredEvent {
            message: "routine heartbeat".to_owned(),
            source_name: "s".to_owned(),
            timestamp: None,
            fields: Vec::new(),
        };
        let analysis = analyzer
            .analyze(&event, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(analysis.severity.get(), 1);
    }

    #[tokio::test]
    async fn file_persistence_offset_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let persistence = FilePersistence::open(dir.path()).await.unwrap();
            persistence.save_offset("auth_logs", 128, 256).await.unwrap();
        }
        // Reopen simulates a daemon restart
        let persistence = FilePersistence::open(dir.path()).await.unwrap();
        assert_eq!(persistence.load_offset("auth_logs").await.unwrap(), Some(128));
        assert_eq!(persistence.load_offset("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_persistence_appends_results() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path()).await.unwrap();

        let result = ProcessingResult::parse_failed(
            logwarden_core::types::EntryRef {
                sequence: 1,
                source_name: "s".to_owned(),
            },
            "garbage",
            "unparseable",
            1,
        );
        persistence.save_result(&result).await.unwrap();
        persistence.save_result(&result).await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("results.jsonl"))
            .await
            .unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn file_persistence_preserves_raw() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FilePersistence::open(dir.path()).await.unwrap();
        persistence
            .save_raw_on_failure("::: garbage :::", "auth_logs")
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("unparsed.jsonl"))
            .await
            .unwrap();
        assert!(content.contains("garbage"));
        assert!(content.contains("auth_logs"));
    }

    #[tokio::test]
    async fn log_channel_reports_configured_name() {
        let channel = LogChannel::new("security_email");
        assert_eq!(channel.name(), "security_email");
        channel.send("subject", "body").await.unwrap();
    }
}
