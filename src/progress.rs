//! Ingestion progress reporting.
//!
//! Long-running ingestion phases (embedding, uploading) report counts so
//! users can see how much is left. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// Phase of the ingestion pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestPhase {
    Embedding,
    Uploading,
}

impl IngestPhase {
    fn label(&self) -> &'static str {
        match self {
            IngestPhase::Embedding => "embedding",
            IngestPhase::Uploading => "uploading",
        }
    }
}

/// Reports ingestion progress. Implementations write to stderr (human or
/// JSON).
pub trait IngestProgress: Send + Sync {
    /// Emit a progress event: `n` items processed out of `total`.
    fn report(&self, phase: IngestPhase, n: u64, total: u64);
}

/// Human-friendly progress on stderr: "ingest  embedding  1,234 / 5,000".
pub struct StderrProgress;

impl IngestProgress for StderrProgress {
    fn report(&self, phase: IngestPhase, n: u64, total: u64) {
        let line = format!(
            "ingest  {}  {} / {}\n",
            phase.label(),
            format_number(n),
            format_number(total)
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgress for JsonProgress {
    fn report(&self, phase: IngestPhase, n: u64, total: u64) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": phase.label(),
            "n": n,
            "total": total
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgress for NoProgress {
    fn report(&self, _phase: IngestPhase, _n: u64, _total: u64) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
