//! Line-by-line delivery of command output

use tokio::sync::mpsc;

/// Receives stdout lines of a streamed command as they are produced
pub type LineSender = mpsc::UnboundedSender<String>;

/// Splits output chunks into lines without their terminators
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Buffer `data` and send every line it completes
    pub(crate) fn feed(&mut self, data: &[u8], lines: &LineSender) {
        self.pending.extend_from_slice(data);
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            send(&line, lines);
        }
    }

    /// Send a trailing line that had no newline
    pub(crate) fn finish(self, lines: &LineSender) {
        if !self.pending.is_empty() {
            send(&self.pending, lines);
        }
    }
}

fn send(line: &[u8], lines: &LineSender) {
    let text = String::from_utf8_lossy(line);
    // A dropped receiver only means nobody is following anymore
    let _ = lines.send(text.trim_end_matches(['\n', '\r']).to_string());
}
