use std::sync::Mutex;

/// Line-oriented sink for run events (`"<label>: <output>"`,
/// `"[ERROR]<label>: <message>"`, `"[System: Done]"`, ...).
pub trait Console: Send + Sync {
    fn append(&self, line: &str);

    fn info(&self, label: &str, output: &str) {
        self.append(&format!("{label}: {output}"));
    }

    fn error(&self, label: &str, message: &str) {
        self.append(&format!("[ERROR]{label}: {message}"));
    }

    fn system(&self, message: &str) {
        self.append(&format!("[System: {message}]"));
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<String>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|l| l == line)
    }
}

impl Console for MemoryConsole {
    fn append(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn append(&self, line: &str) {
        println!("{line}");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsole;

impl Console for NullConsole {
    fn append(&self, _line: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_formats() {
        let console = MemoryConsole::new();
        console.info("Prompt", "Hello");
        console.error("Fetch", "timed out");
        console.system("Done");
        assert_eq!(
            console.lines(),
            vec!["Prompt: Hello", "[ERROR]Fetch: timed out", "[System: Done]"]
        );
    }
}
