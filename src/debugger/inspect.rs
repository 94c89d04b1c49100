use crate::dap::protocol::DapResponse;
use crate::kernel::{Binding, EngineValue};
use crate::weak_error;
use serde::Serialize;
use serde_json::{json, Value};

const UNREPRESENTABLE: &str = "<unrepresentable value>";

/// Entry of an `inspectVariables` reply. Nested expansion is not supported,
/// so `variablesReference` is always zero.
#[derive(Debug, Serialize, PartialEq)]
pub struct InspectedVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "variablesReference")]
    pub variables_reference: i64,
}

fn render(value: &dyn EngineValue) -> String {
    let text = match weak_error!(value.to_json(), "variable serialization failed:") {
        Some(Value::String(s)) => s,
        Some(json) => json.to_string(),
        None => value.repr(),
    };
    if text.is_empty() {
        UNREPRESENTABLE.to_string()
    } else {
        text
    }
}

/// Render every binding. Never fails, a value that can't be serialized
/// falls back to its textual representation.
pub fn inspect_bindings(bindings: &[Binding]) -> Vec<InspectedVariable> {
    bindings
        .iter()
        .map(|binding| InspectedVariable {
            name: binding.name.clone(),
            value: render(binding.value.as_ref()),
            variables_reference: 0,
        })
        .collect()
}

/// Build the reply to an `inspectVariables` request from the engine globals.
pub fn inspect_variables_reply(request: &Value, bindings: &[Binding]) -> Value {
    let variables = inspect_bindings(bindings);
    DapResponse::success(request, json!({ "variables": variables })).into_value()
}
