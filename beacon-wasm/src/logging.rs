//! Routes `tracing` output to the browser console

use std::io::{self, Write};

use tracing_subscriber::EnvFilter;

/// Buffers one formatted event and logs it on drop
#[derive(Debug, Default)]
pub struct ConsoleWriter {
    buffer: Vec<u8>,
}

impl ConsoleWriter {
    fn line(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buffer);
        let text = text.trim_end();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        if let Some(line) = self.line() {
            web_sys::console::log_1(&line.into());
        }
    }
}

/// Install the console subscriber with an `EnvFilter` directive such as
/// `"beacon_tracker=debug"`. Returns `false` when a subscriber was already set.
pub fn init(directives: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .without_time()
        .with_ansi(false)
        .with_writer(ConsoleWriter::default)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_collects_one_trimmed_line() {
        let mut writer = ConsoleWriter::default();
        writeln!(writer, "DEBUG beacon_tracker: page loaded").unwrap();
        assert_eq!(writer.line().as_deref(), Some("DEBUG beacon_tracker: page loaded"));
        writer.buffer.clear();
        assert_eq!(writer.line(), None);
    }
}
