//! Best-effort recovery of tool calls that a model wrote into its text reply
//! instead of using the structured tool-call channel.
//!
//! The scanner walks the reply looking for balanced `[...]` / `{...}`
//! fragments (string- and escape-aware), parses each one as JSON and keeps
//! those shaped like `{"name": ..., "arguments": {...}}`, either bare or in
//! an array.  Everything else is left in the surrounding text.  Fragments
//! that look like tool calls but cannot be used are reported with a reason
//! so the caller can log them; they never abort the turn.

use serde_json::{Map, Value};

use super::ToolCall;

/// Why a tool-call-looking fragment was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Looked like a tool call but was not valid JSON.
    InvalidJson(String),
    /// The named tool is not in the registry.
    UnknownTool(String),
    /// `arguments` was neither an object nor a JSON string holding one.
    BadArguments(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::InvalidJson(e) => write!(f, "invalid JSON: {e}"),
            RejectReason::UnknownTool(name) => write!(f, "unknown tool '{name}'"),
            RejectReason::BadArguments(name) => write!(f, "unusable arguments for '{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedFragment {
    pub fragment: String,
    pub reason: RejectReason,
}

/// Result of scanning one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedScan {
    /// Recognized calls, in textual order.
    pub calls: Vec<ToolCall>,
    pub rejected: Vec<RejectedFragment>,
    /// The reply with every tool-call fragment removed, trimmed.
    pub remaining: String,
}

/// Scan `text` for embedded tool calls.  `is_known` decides which tool
/// names are accepted.
pub fn scan_embedded_tool_calls(text: &str, is_known: impl Fn(&str) -> bool) -> EmbeddedScan {
    let mut scan = EmbeddedScan::default();
    let mut kept = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut copied_to = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'[' && b != b'{' {
            i += 1;
            continue;
        }
        let Some(end) = balanced_end(bytes, i) else {
            i += 1;
            continue;
        };
        let fragment = &text[i..=end];

        match serde_json::from_str::<Value>(fragment) {
            Ok(value) => {
                let candidates = tool_shaped(&value);
                if candidates.is_empty() {
                    // Not a call itself; a call may still be nested inside.
                    i += 1;
                    continue;
                }
                for obj in candidates {
                    match to_call(obj, &is_known) {
                        Ok(call) => scan.calls.push(call),
                        Err(reason) => scan.rejected.push(RejectedFragment {
                            fragment: fragment.to_string(),
                            reason,
                        }),
                    }
                }
                kept.push_str(&text[copied_to..i]);
                copied_to = end + 1;
                i = end + 1;
            }
            Err(e) => {
                if looks_like_call(fragment) {
                    scan.rejected.push(RejectedFragment {
                        fragment: fragment.to_string(),
                        reason: RejectReason::InvalidJson(e.to_string()),
                    });
                }
                i += 1;
            }
        }
    }
    kept.push_str(&text[copied_to..]);
    scan.remaining = strip_empty_fences(&kept);
    scan
}

/// Index of the bracket closing the one at `start`, honouring JSON strings.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Objects in `value` that carry a tool-call shape.
fn tool_shaped(value: &Value) -> Vec<&Map<String, Value>> {
    match value {
        Value::Object(obj) if is_call_object(obj) => vec![obj],
        Value::Array(items) => {
            let objs: Vec<&Map<String, Value>> = items
                .iter()
                .filter_map(Value::as_object)
                .filter(|o| is_call_object(o))
                .collect();
            objs
        }
        _ => Vec::new(),
    }
}

fn is_call_object(obj: &Map<String, Value>) -> bool {
    if let Some(Value::Object(inner)) = obj.get("function") {
        return is_call_object(inner);
    }
    obj.get("name").is_some_and(Value::is_string)
        && (obj.contains_key("arguments") || obj.contains_key("args"))
}

fn to_call(
    obj: &Map<String, Value>,
    is_known: &impl Fn(&str) -> bool,
) -> Result<ToolCall, RejectReason> {
    if let Some(Value::Object(inner)) = obj.get("function") {
        return to_call(inner, is_known);
    }
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if !is_known(&name) {
        return Err(RejectReason::UnknownTool(name));
    }
    let raw_args = obj.get("arguments").or_else(|| obj.get("args"));
    let arguments = match raw_args {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => return Err(RejectReason::BadArguments(name)),
        },
        Some(_) => return Err(RejectReason::BadArguments(name)),
    };
    Ok(ToolCall { name, arguments })
}

fn looks_like_call(fragment: &str) -> bool {
    fragment.contains("\"name\"")
        && (fragment.contains("\"arguments\"") || fragment.contains("\"args\""))
}

/// Drop code fences left empty once their tool-call body was removed.
fn strip_empty_fences(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.starts_with("```") {
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            if j < lines.len() && lines[j].trim() == "```" {
                i = j + 1;
                continue;
            }
        }
        out.push(lines[i]);
        i += 1;
    }
    out.join("\n").trim().to_string()
}
