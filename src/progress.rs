//! Progress bars and log routing
//!
//! Long ingestion batches show an indicatif bar; tracing output is routed
//! through the shared `MultiProgress` so log lines print above the bar
//! instead of tearing it.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

/// A labeled bar for a batch of known size
pub fn batch_bar(len: u64, label: &str) -> ProgressBar {
    let bar = multi_progress().add(ProgressBar::new(len));
    bar.set_style(
        ProgressStyle::with_template("{msg:20} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(label.to_string());
    bar
}

/// A spinner for a stage of unknown length (model loads, analysis)
pub fn stage_spinner(label: &str) -> ProgressBar {
    let spinner = multi_progress().add(ProgressBar::new_spinner());
    spinner.set_message(label.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner
}

/// `MakeWriter` that prints whole lines through the progress area
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    pending: Vec<u8>,
}

impl LogWriter {
    /// Print and discard the first `count` buffered bytes as one line
    fn emit(&mut self, count: usize) {
        let line = String::from_utf8_lossy(&self.pending[..count])
            .trim_end_matches(['\r', '\n'])
            .to_string();
        let _ = multi_progress().println(line);
        self.pending.drain(..count);
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            self.emit(idx + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let len = self.pending.len();
            self.emit(len);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { pending: Vec::new() }
    }
}
