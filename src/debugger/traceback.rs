use itertools::Itertools;
use serde_json::Value;

/// Error reported by the execution engine in a reply document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl EngineError {
    /// Extract the error from an engine reply, `None` if the status is `ok`.
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let status = reply.get("status").and_then(Value::as_str).unwrap_or("error");
        if status == "ok" {
            return None;
        }

        let text = |key: &str| {
            reply
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let traceback = reply
            .get("traceback")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| l.as_str().map(ToString::to_string).unwrap_or_else(|| l.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            ename: match text("ename") {
                name if name.is_empty() => "Error".to_string(),
                name => name,
            },
            evalue: text("evalue"),
            traceback,
        })
    }

    /// Lines written to the diagnostic stream: traceback first, then `ename - evalue`.
    pub fn report_lines(&self) -> Vec<String> {
        self.traceback
            .iter()
            .cloned()
            .chain(std::iter::once(format!("{} - {}", self.ename, self.evalue)))
            .collect()
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.report_lines().iter().join("\n"))
    }
}
