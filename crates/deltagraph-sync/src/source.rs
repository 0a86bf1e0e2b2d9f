//! Event sources feeding the supervisor.
//!
//! A live chain transport pushes events into an mpsc channel; a recorded
//! stream is replayed from a JSON-lines file or stdin.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

use deltagraph_core::{Cursor, StreamEvent, StreamRecord, SyncError};

#[async_trait]
pub trait DeltaSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, SyncError>;
}

#[async_trait]
impl DeltaSource for mpsc::Receiver<StreamEvent> {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, SyncError> {
        Ok(self.recv().await)
    }
}

type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Replays a recorded stream, one `StreamRecord` per line.
pub struct JsonLinesSource {
    lines: Lines<BoxedReader>,
    origin: String,
    line_no: usize,
    resume_after: Option<Cursor>,
}

impl JsonLinesSource {
    pub fn new(reader: BoxedReader, origin: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            origin: origin.into(),
            line_no: 0,
            resume_after: None,
        }
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::Transport(format!("{}: {e}", path.display())))?;
        Ok(Self::new(
            Box::new(BufReader::new(file)),
            path.display().to_string(),
        ))
    }

    pub fn stdin() -> Self {
        Self::new(Box::new(BufReader::new(tokio::io::stdin())), "<stdin>")
    }

    /// Skip every delta up to and including the one carrying `cursor`.
    pub fn resume_after(mut self, cursor: Option<Cursor>) -> Self {
        self.resume_after = cursor.filter(|c| !c.is_empty());
        self
    }

    async fn next_record(&mut self) -> Result<Option<StreamRecord>, SyncError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| SyncError::Transport(format!("{}: {e}", self.origin)))?;
            let Some(line) = line else {
                return Ok(None);
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| {
                SyncError::Transport(format!("{}:{}: {e}", self.origin, self.line_no))
            })?;
            return Ok(Some(record));
        }
    }
}

#[async_trait]
impl DeltaSource for JsonLinesSource {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, SyncError> {
        while let Some(record) = self.next_record().await? {
            let Some(resume) = &self.resume_after else {
                return Ok(Some(record.into()));
            };

            match &record {
                StreamRecord::Delta { cursor, .. } => {
                    if cursor == resume {
                        tracing::info!(cursor = %cursor, line = self.line_no, "Resumed after cursor");
                        self.resume_after = None;
                    }
                }
                StreamRecord::Complete { .. } => return Ok(Some(record.into())),
                StreamRecord::Error { .. } => {}
            }
        }

        if let Some(resume) = self.resume_after.take() {
            tracing::warn!(
                cursor = %resume,
                origin = %self.origin,
                "Resume cursor never seen; nothing was replayed"
            );
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltagraph_core::{DbOp, ForkStep};
    use std::io::Write;

    const STREAM: &str = r#"{"type":"delta","cursor":"c1","delta":{"table_name":"documents","operation":"insert","new_data":{"hash":"a"}}}

{"type":"error","message":"reconnecting"}
{"type":"delta","cursor":"c2","fork_step":"undo","delta":{"table_name":"documents","operation":"remove","old_data":{"hash":"a"}}}
{"type":"delta","cursor":"c3","delta":{"table_name":"edges","operation":"insert","new_data":{"from_node":"a","to_node":"b","edge_name":"owns"}}}
{"type":"complete","last_block":"1042"}
"#;

    fn write_stream(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    async fn drain(source: &mut impl DeltaSource) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = source.next_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    fn cursor_of(event: &StreamEvent) -> Option<&str> {
        match event {
            StreamEvent::Delta { cursor, .. } => Some(cursor.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_replay_file() {
        let file = write_stream(STREAM);
        let mut source = JsonLinesSource::open(file.path()).await.unwrap();
        let events = drain(&mut source).await;

        assert_eq!(events.len(), 5);
        assert_eq!(cursor_of(&events[0]), Some("c1"));
        assert_eq!(events[1], StreamEvent::Error("reconnecting".to_string()));
        match &events[2] {
            StreamEvent::Delta {
                delta, fork_step, ..
            } => {
                assert_eq!(*fork_step, ForkStep::Undo);
                assert_eq!(delta.operation, DbOp::Remove);
                assert!(!delta.old_data.is_empty());
            }
            other => panic!("expected delta, got {other:?}"),
        }
        assert_eq!(
            events[4],
            StreamEvent::Complete {
                last_block: "1042".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_resume_after_cursor() {
        let file = write_stream(STREAM);
        let mut source = JsonLinesSource::open(file.path())
            .await
            .unwrap()
            .resume_after(Some(Cursor::new("c2")));
        let events = drain(&mut source).await;

        assert_eq!(events.len(), 2);
        assert_eq!(cursor_of(&events[0]), Some("c3"));
        assert!(matches!(events[1], StreamEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn test_unknown_resume_cursor_replays_nothing() {
        let file = write_stream(STREAM);
        let mut source = JsonLinesSource::open(file.path())
            .await
            .unwrap()
            .resume_after(Some(Cursor::new("c99")));
        let events = drain(&mut source).await;

        // Only the completion marker gets through.
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn test_malformed_line_reports_position() {
        let file = write_stream("{\"type\":\"error\",\"message\":\"x\"}\n{\"type\":\"delta\"\n");
        let mut source = JsonLinesSource::open(file.path()).await.unwrap();

        assert!(source.next_event().await.unwrap().is_some());
        let err = source.next_event().await.unwrap_err();
        match err {
            SyncError::Transport(msg) => assert!(msg.contains(":2: "), "{msg}"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = JsonLinesSource::open(dir.path().join("absent.jsonl")).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(StreamEvent::Error("boom".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(
            rx.next_event().await.unwrap(),
            Some(StreamEvent::Error("boom".to_string()))
        );
        assert_eq!(rx.next_event().await.unwrap(), None);
    }
}
