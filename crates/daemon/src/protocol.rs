//! Request/reply envelopes of the scripting socket.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One client request: a command plus an optional chunk of Lua.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// `run`, `run_coop` or `recreate`.
    #[serde(rename = "VostCmd")]
    pub command: String,
    /// The chunk to execute; empty for `recreate`.
    #[serde(rename = "LuaCode", default)]
    pub code: String,
}

/// Execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The chunk ran to completion (or to its first suspension).
    Ok,
    /// The request was malformed or the interpreter raised an error.
    Error,
}

/// One reply. `results` mirrors the script's global `results` table at the
/// end of execution; a missing or non-table global yields an empty object.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    /// Execution outcome.
    pub status: Status,
    /// Interpreter message when `status` is `error`, empty otherwise.
    pub errormsg: String,
    /// String-keyed snapshot of the `results` global.
    pub results: Map<String, Value>,
}

impl Reply {
    /// Successful reply carrying a results snapshot.
    pub fn ok(results: Map<String, Value>) -> Self {
        Self {
            status: Status::Ok,
            errormsg: String::new(),
            results,
        }
    }

    /// Failed reply with the interpreter's message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            errormsg: message.into(),
            results: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_field_names_are_wire_exact() {
        let req: Request =
            serde_json::from_str(r#"{"VostCmd":"run","LuaCode":"results={}"}"#).unwrap();
        assert_eq!(req.command, "run");
        assert_eq!(req.code, "results={}");
    }

    #[test]
    fn missing_chunk_defaults_to_empty() {
        let req: Request = serde_json::from_str(r#"{"VostCmd":"recreate"}"#).unwrap();
        assert_eq!(req.code, "");
    }

    #[test]
    fn ok_reply_serializes_with_empty_errormsg() {
        let mut results = Map::new();
        results.insert("a".into(), Value::String("1".into()));
        let json = serde_json::to_string(&Reply::ok(results)).unwrap();
        assert_eq!(
            json,
            r#"{"status":"ok","errormsg":"","results":{"a":"1"}}"#
        );
    }

    #[test]
    fn error_reply_serializes_with_empty_results() {
        let json = serde_json::to_string(&Reply::error("boom")).unwrap();
        assert_eq!(json, r#"{"status":"error","errormsg":"boom","results":{}}"#);
    }
}
