//! Append-only output log shown next to the editor.

/// Text log of session status and surfaced errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputLog {
    text: String,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message`, terminating it with a newline if it lacks one.
    pub fn append(&mut self, message: &str) {
        self.text.push_str(message);
        if !message.ends_with('\n') {
            self.text.push('\n');
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn contents(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_terminates_lines() {
        let mut log = OutputLog::new();
        log.append("loading");
        log.append("done\n");
        assert_eq!(log.contents(), "loading\ndone\n");
        assert_eq!(log.lines().collect::<Vec<_>>(), ["loading", "done"]);
    }

    #[test]
    fn test_multiline_message_kept_whole() {
        let mut log = OutputLog::new();
        log.append("KeyError: 3\nTraceback");
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn test_clear() {
        let mut log = OutputLog::new();
        log.append("x");
        log.clear();
        assert!(log.is_empty());
    }
}
