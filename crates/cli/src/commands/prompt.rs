use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use sigprop_core::session::Prompter;

/// Line-oriented prompter over a reader/writer pair (stdin/stdout in the CLI).
///
/// End of input behaves like cancelling the dialog; a blank path answer means
/// no selection.
pub struct StdinPrompter<R, W> {
    reader: R,
    writer: W,
}

impl StdinPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdinPrompter<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        // Write failures only lose the prompt text; the answer is still read.
        let _ = write!(self.writer, "{prompt} ");
        let _ = self.writer.flush();
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn ask_path(&mut self, prompt: &str) -> Option<PathBuf> {
        self.ask(prompt).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).map(PathBuf::from)
    }
}

impl<R: BufRead, W: Write> Prompter for StdinPrompter<R, W> {
    fn text(&mut self, title: &str, prompt: &str) -> Option<String> {
        self.ask(&format!("[{title}] {prompt}"))
    }

    fn open_path(&mut self, prompt: &str) -> Option<PathBuf> {
        self.ask_path(&format!("{prompt} (path, blank to finish):"))
    }

    fn save_path(&mut self, prompt: &str) -> Option<PathBuf> {
        self.ask_path(&format!("{prompt} (path, blank to skip):"))
    }

    fn notify(&mut self, message: &str) {
        let _ = writeln!(self.writer, "{message}");
    }
}
