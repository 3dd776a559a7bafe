//! Streaming batch loader.
//!
//! Reads the source one line at a time, classifies each line, and flushes
//! accumulated records to a [`RecordSink`] at batch boundaries.
//!
//! # Batch boundaries
//!
//! Every line gets an index (`skip_rows` for the first line, then +1 per
//! line, whether or not it produced a record). After a record is appended the
//! batch is flushed when the index is a multiple of the batch size. Malformed
//! lines never trigger a flush, so a malformed line on a boundary index lets
//! the batch run on to the next multiple. Whatever remains at end of input is
//! flushed last.
//!
//! # Failure policy
//!
//! - Malformed lines are counted and skipped.
//! - A fatal line error, a read error, or a sink error stops the run
//!   immediately. The in-progress batch is dropped unflushed and no further
//!   line is read; batches committed earlier stay committed.

use crate::batch::{Batch, LoadStats, LoaderState};
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::record::parse_line;
use crate::sink::RecordSink;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

const READ_BUFFER_BYTES: usize = 1 << 20;

pub struct BatchLoader<S> {
    sink: S,
    dimensions: usize,
    batch_size: usize,
    skip_rows: u64,
    stats: LoadStats,
    state: LoaderState,
}

impl<S: RecordSink> BatchLoader<S> {
    pub fn new(config: &LoaderConfig, sink: S) -> Self {
        Self {
            sink,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            skip_rows: config.skip_rows,
            stats: LoadStats::default(),
            state: LoaderState::Streaming,
        }
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Open `path` and load it.
    pub async fn load_file(&mut self, path: &Path) -> Result<LoadStats, LoadError> {
        let file = File::open(path).await.map_err(|source| {
            self.state = LoaderState::Aborted;
            LoadError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;

        log::info!("loading {}", path.display());
        self.load(BufReader::with_capacity(READ_BUFFER_BYTES, file))
            .await
    }

    /// Stream `reader` to the sink. Invalid UTF-8 is replaced, not rejected.
    pub async fn load<R>(&mut self, mut reader: R) -> Result<LoadStats, LoadError>
    where
        R: AsyncBufRead + Unpin,
    {
        let batch_size = self.batch_size as u64;
        let mut batch = Batch::with_capacity(self.batch_size);
        let mut buf = Vec::new();
        let mut next_index = self.skip_rows;

        loop {
            buf.clear();
            let read = match reader.read_until(b'\n', &mut buf).await {
                Ok(read) => read,
                Err(source) => {
                    self.state = LoaderState::Aborted;
                    return Err(LoadError::Read {
                        line: next_index,
                        source,
                    });
                }
            };
            if read == 0 {
                break;
            }

            let index = next_index;
            next_index = next_index.saturating_add(1);
            self.stats.lines_read += 1;

            let line = String::from_utf8_lossy(&buf);
            match parse_line(&line, self.dimensions) {
                Ok(record) => batch.push(record),
                Err(err) if !err.is_fatal() => {
                    self.stats.malformed += 1;
                    log::trace!("skipping line {}: {}", index, err);
                    continue;
                }
                Err(err) => {
                    log::error!("error processing line {}", index);
                    log::error!("  the line is: {}", line.trim_end_matches(['\r', '\n']));
                    log::error!("  error: {}", err);
                    self.state = LoaderState::Aborted;
                    return Err(LoadError::Aborted {
                        line: index,
                        source: err,
                    });
                }
            }

            if index % batch_size == 0 {
                self.flush(&mut batch).await?;
                log::info!(
                    "inserted {} rows so far (line {})",
                    self.stats.inserted,
                    index
                );
            }
        }

        if !batch.is_empty() {
            let remaining = batch.len();
            self.flush(&mut batch).await?;
            log::info!(
                "inserted final {} records (total {} rows, {} lines)",
                remaining,
                self.stats.inserted,
                self.stats.lines_read
            );
        }

        self.state = LoaderState::Finished;
        Ok(self.stats.clone())
    }

    async fn flush(&mut self, batch: &mut Batch) -> Result<(), LoadError> {
        self.state = LoaderState::Flushing;
        let submitted = batch.len() as u64;

        match self.sink.flush(batch.records()).await {
            Ok(inserted) => {
                self.stats.record_flush(submitted, inserted);
                log::debug!(
                    "batch {}: {} submitted, {} inserted",
                    self.stats.batches,
                    submitted,
                    inserted
                );
                batch.clear();
                self.state = LoaderState::Streaming;
                Ok(())
            }
            Err(err) => {
                log::error!("flush of {} records failed: {}", submitted, err);
                self.state = LoaderState::Aborted;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::error::LineError;
    use crate::record::Record;
    use std::collections::HashSet;
    use std::io::Write;
    use std::path::PathBuf;

    /// Keeps every flushed batch and emulates the unique-key conflict skip.
    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Vec<Record>>,
        keys: HashSet<String>,
        fail_on_batch: Option<usize>,
    }

    impl RecordSink for RecordingSink {
        async fn flush(&mut self, records: &[Record]) -> Result<u64, LoadError> {
            if self.fail_on_batch == Some(self.batches.len()) {
                return Err(LoadError::Database(sqlx::Error::PoolTimedOut));
            }
            let mut inserted = 0;
            for record in records {
                if self.keys.insert(record.key.clone()) {
                    inserted += 1;
                }
            }
            self.batches.push(records.to_vec());
            Ok(inserted)
        }
    }

    fn config(dimensions: usize, batch_size: usize) -> LoaderConfig {
        LoaderConfig {
            source: PathBuf::from("unused.txt"),
            dimensions,
            batch_size,
            skip_rows: 1,
            target: TargetConfig {
                database_url: "postgres://localhost/postgres".to_string(),
                table: "words".to_string(),
                key_column: "word".to_string(),
                vector_column: "embedding".to_string(),
                vector_type: "vector".to_string(),
            },
            tunnel: None,
        }
    }

    fn record(key: &str, vector: &str) -> Record {
        Record {
            key: key.to_string(),
            vector: vector.to_string(),
        }
    }

    fn batch_sizes(sink: &RecordingSink) -> Vec<usize> {
        sink.batches.iter().map(Vec::len).collect()
    }

    #[tokio::test]
    async fn skips_dot_key_and_flushes_on_boundaries() {
        let input = "cat 1.0 2.0\ndog 3.0 4.0\n. 0.0 0.0\nbird 5.0 6.0\n";
        let mut loader = BatchLoader::new(&config(2, 2), RecordingSink::default());

        let stats = loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(stats.inserted, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.lines_read, 4);
        assert_eq!(loader.state(), LoaderState::Finished);

        let sink = loader.into_sink();
        assert_eq!(
            sink.batches,
            vec![
                vec![record("cat", "[1.0, 2.0]"), record("dog", "[3.0, 4.0]")],
                vec![record("bird", "[5.0, 6.0]")],
            ]
        );
    }

    #[tokio::test]
    async fn issues_ceil_m_over_n_inserts() {
        for (lines, batch_size) in [(10usize, 3usize), (9, 3), (1, 5), (7, 1)] {
            let input: String = (0..lines).map(|i| format!("w{i} {i}.0\n")).collect();
            let mut loader = BatchLoader::new(&config(1, batch_size), RecordingSink::default());

            let stats = loader.load(input.as_bytes()).await.expect("load succeeds");
            let sink = loader.into_sink();

            let expected_batches = lines.div_ceil(batch_size);
            assert_eq!(sink.batches.len(), expected_batches);
            assert!(sink.batches.iter().all(|b| b.len() <= batch_size));
            let last = if lines % batch_size == 0 { batch_size } else { lines % batch_size };
            assert_eq!(sink.batches.last().map(Vec::len), Some(last));
            assert_eq!(stats.inserted, lines as u64);
        }
    }

    #[tokio::test]
    async fn malformed_lines_do_not_change_inserted_count() {
        let input = "a 1.0 2.0\nb 1.0\nc 1.0 2.0 3.0\n\nd 4.0 5.0\n";
        let mut loader = BatchLoader::new(&config(2, 100), RecordingSink::default());

        let stats = loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(stats.lines_read, 5);
        assert_eq!(stats.malformed, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(batch_sizes(&loader.into_sink()), vec![2]);
    }

    #[tokio::test]
    async fn malformed_line_on_boundary_defers_flush_to_next_multiple() {
        // Index 2 is malformed, so no flush happens there; a, b and c are
        // committed together at index 4.
        let input = "a 1.0\nbad\nb 2.0\nc 3.0\nd 4.0\n";
        let mut loader = BatchLoader::new(&config(1, 2), RecordingSink::default());

        loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(batch_sizes(&loader.into_sink()), vec![3, 1]);
    }

    #[tokio::test]
    async fn maximal_offset_does_not_overflow_line_index() {
        let mut cfg = config(1, 2);
        cfg.skip_rows = u64::MAX;
        let input = "a 1.0\nb 2.0\nc 3.0\n";
        let mut loader = BatchLoader::new(&cfg, RecordingSink::default());

        let stats = loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.inserted, 3);
    }

    #[tokio::test]
    async fn huge_dimensionality_skips_lines_instead_of_panicking() {
        let input = "a 1.0\n\n";
        let mut loader = BatchLoader::new(&config(usize::MAX, 2), RecordingSink::default());

        let stats = loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.inserted, 0);
    }

    #[tokio::test]
    async fn zero_offset_flushes_first_line_alone() {
        let mut cfg = config(1, 2);
        cfg.skip_rows = 0;
        let input = "a 1.0\nb 2.0\nc 3.0\n";
        let mut loader = BatchLoader::new(&cfg, RecordingSink::default());

        loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(batch_sizes(&loader.into_sink()), vec![1, 2]);
    }

    #[tokio::test]
    async fn second_run_inserts_nothing() {
        let input = "a 1.0\nb 2.0\nc 3.0\n";
        let mut first = BatchLoader::new(&config(1, 2), RecordingSink::default());
        first.load(input.as_bytes()).await.expect("first run");
        let sink = first.into_sink();

        let mut second = BatchLoader::new(&config(1, 2), sink);
        let stats = second.load(input.as_bytes()).await.expect("second run");

        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.conflicts, 3);
    }

    #[tokio::test]
    async fn fatal_line_aborts_without_flushing_pending_batch() {
        let input = "a 1.0\nb 2.0\nc 3.0\nd\0 4.0\ne 5.0\n";
        let mut loader = BatchLoader::new(&config(1, 2), RecordingSink::default());

        let err = loader.load(input.as_bytes()).await.expect_err("run aborts");

        assert!(matches!(
            err,
            LoadError::Aborted {
                line: 4,
                source: LineError::NulByte
            }
        ));
        assert_eq!(loader.state(), LoaderState::Aborted);
        // Nothing after the failing line was read.
        assert_eq!(loader.stats().lines_read, 4);
        assert_eq!(loader.stats().inserted, 2);

        let sink = loader.into_sink();
        assert_eq!(batch_sizes(&sink), vec![2]);
        assert!(!sink.keys.contains("c"));
    }

    #[tokio::test]
    async fn sink_failure_is_fatal() {
        let input = "a 1.0\nb 2.0\nc 3.0\nd 4.0\n";
        let sink = RecordingSink {
            fail_on_batch: Some(1),
            ..RecordingSink::default()
        };
        let mut loader = BatchLoader::new(&config(1, 2), sink);

        let err = loader.load(input.as_bytes()).await.expect_err("flush fails");

        assert!(matches!(err, LoadError::Database(_)));
        assert_eq!(loader.state(), LoaderState::Aborted);
        assert_eq!(loader.stats().batches, 1);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let input: &[u8] = b"caf\xe9 1.0\n";
        let mut loader = BatchLoader::new(&config(1, 10), RecordingSink::default());

        loader.load(input).await.expect("load succeeds");

        let sink = loader.into_sink();
        assert_eq!(sink.batches[0][0].key, "caf\u{FFFD}");
    }

    #[tokio::test]
    async fn last_line_without_newline_is_loaded() {
        let input = "a 1.0\nb 2.0";
        let mut loader = BatchLoader::new(&config(1, 10), RecordingSink::default());

        let stats = loader.load(input.as_bytes()).await.expect("load succeeds");

        assert_eq!(stats.inserted, 2);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "cat 1.0 2.0").expect("write");
        writeln!(file, "dog 3.0 4.0").expect("write");
        file.flush().expect("flush");

        let mut loader = BatchLoader::new(&config(2, 10), RecordingSink::default());
        let stats = loader.load_file(file.path()).await.expect("load succeeds");

        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.batches, 1);
    }

    #[tokio::test]
    async fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("absent.txt");
        let mut loader = BatchLoader::new(&config(2, 10), RecordingSink::default());

        let err = loader.load_file(&path).await.expect_err("missing file");

        assert!(matches!(err, LoadError::Open { .. }));
    }
}
