use crate::error::Result;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Direction of a traced frame.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    fn arrow(self) -> &'static str {
        match self {
            Direction::Outgoing => "->",
            Direction::Incoming => "<-",
        }
    }
}

/// Simple file-based tracer of DAP traffic.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<std::fs::File>>,
}

impl FileTracer {
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn line(&self, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "{now} {text}");
        }
    }

    pub fn frame(&self, direction: Direction, frame: &Value) {
        if let Ok(line) = serde_json::to_string(frame) {
            self.line(&format!("{} {line}", direction.arrow()));
        }
    }
}
