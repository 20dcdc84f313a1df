//! Deduplicating, multi-sink line writer.
//!
//! All writes go through one writer-wide lock: the duplicate check, the
//! insert and the writes to every sink happen together, so concurrent
//! producers never interleave partial lines.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::UncoverError;
use crate::orchestrator::dedup::{DedupCache, Fingerprint, DEFAULT_CAPACITY};
use crate::types::SearchResult;

struct Sink {
    name: String,
    writer: Box<dyn Write + Send>,
    /// Owns an OS file handle that [`OutputWriter::close`] releases.
    owns_handle: bool,
}

struct WriterState {
    seen: DedupCache,
    sinks: Vec<Sink>,
}

/// Writes each distinct line once to every configured sink.
pub struct OutputWriter {
    state: Mutex<WriterState>,
}

impl OutputWriter {
    /// Writer with no sinks and the default dedup capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Writer remembering up to `capacity` fingerprints.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: Mutex::new(WriterState {
                seen: DedupCache::new(capacity),
                sinks: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a named sink. It stays open across [`close`](Self::close).
    pub fn add_sink(&self, name: impl Into<String>, writer: impl Write + Send + 'static) {
        self.lock().sinks.push(Sink {
            name: name.into(),
            writer: Box::new(writer),
            owns_handle: false,
        });
    }

    /// Add standard output as the sink named `stdout`.
    pub fn add_stdout(&self) {
        self.add_sink("stdout", io::stdout());
    }

    /// Create (truncating) `path` and add it as a sink named after the path.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::Io`] if the file cannot be created.
    pub fn add_file(&self, path: impl AsRef<Path>) -> Result<(), UncoverError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.lock().sinks.push(Sink {
            name: path.display().to_string(),
            writer: Box::new(BufWriter::new(file)),
            owns_handle: true,
        });
        tracing::debug!(path = %path.display(), "file sink opened");
        Ok(())
    }

    /// Names of the sinks currently attached.
    pub fn sink_names(&self) -> Vec<String> {
        self.lock().sinks.iter().map(|sink| sink.name.clone()).collect()
    }

    /// Write `line` to every sink unless this exact line was seen recently.
    ///
    /// Returns whether the line was written.
    pub fn write_string(&self, line: &str) -> bool {
        self.write_deduplicated(DedupCache::line_fingerprint(line), line, None)
    }

    /// Write `result` as a JSON line unless its `ip:port` was seen recently.
    ///
    /// Results with `error` set are never written or remembered.
    pub fn write_json(&self, result: &SearchResult) -> bool {
        if result.is_error() {
            return false;
        }
        let fingerprint = DedupCache::result_fingerprint(result);
        self.write_deduplicated(fingerprint, &result.to_json(), None)
    }

    /// Write `line` only to the sink called `sink_name` unless that sink
    /// already received it through this method.
    ///
    /// Routed lines are remembered per sink, apart from broadcast writes.
    pub fn write_string_to(&self, sink_name: &str, line: &str) -> bool {
        let fingerprint = DedupCache::routed_fingerprint(sink_name, line);
        self.write_deduplicated(fingerprint, line, Some(sink_name))
    }

    fn write_deduplicated(
        &self,
        fingerprint: Fingerprint,
        line: &str,
        only: Option<&str>,
    ) -> bool {
        let mut state = self.lock();
        if let Some(name) = only {
            if !state.sinks.iter().any(|sink| sink.name == name) {
                tracing::debug!(sink = name, "no such sink");
                return false;
            }
        }
        if !state.seen.insert_new(fingerprint) {
            return false;
        }
        for sink in state.sinks.iter_mut() {
            if only.is_some_and(|name| sink.name != name) {
                continue;
            }
            if let Err(e) = write_line(sink.writer.as_mut(), line) {
                tracing::warn!(sink = %sink.name, error = %e, "failed to write output line");
            }
        }
        true
    }

    /// Flush every sink and release those that own a file handle.
    ///
    /// # Errors
    ///
    /// Returns the first flush failure; every sink is still processed.
    pub fn close(&self) -> Result<(), UncoverError> {
        let mut state = self.lock();
        let mut first_error = None;
        for sink in state.sinks.iter_mut() {
            if let Err(e) = sink.writer.flush() {
                tracing::warn!(sink = %sink.name, error = %e, "failed to flush sink");
                first_error.get_or_insert(e);
            }
        }
        state.sinks.retain(|sink| !sink.owns_handle);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

fn write_line(writer: &mut dyn Write, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")
}

/// In-memory sink whose contents stay readable after it is handed to an
/// [`OutputWriter`].
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, as text.
    pub fn contents(&self) -> String {
        let buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Written lines, without terminators.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
