//! Optimizer trace files.
//!
//! One whitespace-separated row per generation:
//!
//! ```text
//! iteration evaluations sigma best_loss w_1 … w_G
//! ```

use super::cmaes::Progress;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends optimizer progress rows to a writer.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    out: W,
    rows: usize,
}

impl TraceWriter<BufWriter<File>> {
    /// Create (or truncate) a trace file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, rows: 0 }
    }

    /// Write one row.
    pub fn record(&mut self, progress: &Progress<'_>) -> Result<()> {
        write!(
            self.out,
            "{} {} {} {}",
            progress.iteration, progress.evaluations, progress.sigma, progress.best_f
        )?;
        for w in progress.best_x.iter() {
            write!(self.out, " {w}")?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rows_are_whitespace_separated() {
        let x = array![0.25, 0.5];
        let mut trace = TraceWriter::new(Vec::new());
        trace
            .record(&Progress {
                iteration: 1,
                evaluations: 6,
                sigma: 0.3,
                best_f: 0.125,
                best_x: x.view(),
            })
            .unwrap();
        assert_eq!(trace.rows(), 1);
        let text = String::from_utf8(trace.finish().unwrap()).unwrap();
        assert_eq!(text, "1 6 0.3 0.125 0.25 0.5\n");
    }

    #[test]
    fn creates_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_cmaes_trace_0.dat");
        let x = array![1.0];
        let mut trace = TraceWriter::create(&path).unwrap();
        for i in 1..=3 {
            trace
                .record(&Progress {
                    iteration: i,
                    evaluations: 4 * i,
                    sigma: 0.1,
                    best_f: 2.0,
                    best_x: x.view(),
                })
                .unwrap();
        }
        trace.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("1 4 0.1 2 1"));
    }
}
