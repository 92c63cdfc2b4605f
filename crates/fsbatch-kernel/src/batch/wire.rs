//! JSON form of a batch.
//!
//! A batch is a JSON array of objects, each with a `cmd` name, an optional
//! `force` flag and the command's own fields:
//!
//! ```json
//! [
//!   {"cmd": "mkdir", "name": "Foo"},
//!   {"cmd": "chdir", "name": "Foo"},
//!   {"cmd": "open", "name": "foo.txt", "create": true},
//!   {"cmd": "write", "data": "hello"},
//!   {"cmd": "write", "data": {"base64": "AAEC"}},
//!   {"cmd": "read", "type": "string", "result": "greeting"},
//!   {"cmd": "fetch", "name": "a.img", "url": "https://example.com/a.img", "force": true}
//! ]
//! ```
//!
//! An unrecognised `cmd` parses into [`Command::Unknown`] and fails when it
//! runs. A recognised `cmd` with missing or mistyped fields rejects the whole
//! batch here.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use thiserror::Error;

use super::descriptor::{Batch, Command, Descriptor};
use crate::session::{ReadData, ReadResult, ReadType, ResultSink, WriteData};

/// Errors parsing a batch document.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid batch document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("step {index} ({cmd}): {source}")]
    Step {
        index: usize,
        cmd: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("step {index}: invalid base64 payload: {source}")]
    Base64 {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("duplicate result label: {0}")]
    DuplicateLabel(String),
}

/// A parsed batch plus the sinks its reads fill, keyed by label.
#[derive(Debug)]
pub struct ParsedBatch {
    pub batch: Batch,
    pub results: Vec<(String, ResultSink)>,
}

#[derive(Deserialize)]
struct WireStep {
    cmd: String,
    #[serde(default)]
    force: bool,
    #[serde(flatten)]
    args: Map<String, Value>,
}

#[derive(Deserialize)]
struct OpenArgs {
    name: String,
    #[serde(default)]
    create: bool,
    #[serde(default)]
    exclusive: bool,
}

#[derive(Deserialize)]
struct ReadArgs {
    #[serde(rename = "type")]
    kind: ReadType,
    result: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Text(String),
    Base64 { base64: String },
}

#[derive(Deserialize)]
struct WriteArgs {
    data: Payload,
}

#[derive(Deserialize)]
struct TruncateArgs {
    size: u64,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
struct FetchArgs {
    name: String,
    url: String,
    #[serde(default)]
    overwrite: bool,
}

/// Parse a JSON batch document.
///
/// Reads without a `result` label are labelled `read<index>`.
pub fn parse_batch(json: &str) -> Result<ParsedBatch, WireError> {
    let steps: Vec<WireStep> = serde_json::from_str(json)?;
    let mut batch = Batch::new();
    let mut results = Vec::new();
    let mut labels = HashSet::new();

    for (index, step) in steps.into_iter().enumerate() {
        let args = Value::Object(step.args);
        let fields = |source| WireError::Step {
            index,
            cmd: step.cmd.clone(),
            source,
        };

        let command = match step.cmd.as_str() {
            "open" => {
                let a: OpenArgs = serde_json::from_value(args).map_err(fields)?;
                Command::Open {
                    name: a.name,
                    create: a.create,
                    exclusive: a.exclusive,
                }
            }
            "read" => {
                let a: ReadArgs = serde_json::from_value(args).map_err(fields)?;
                let label = a.result.unwrap_or_else(|| format!("read{index}"));
                if !labels.insert(label.clone()) {
                    return Err(WireError::DuplicateLabel(label));
                }
                let sink = ResultSink::new();
                results.push((label, sink.clone()));
                Command::Read { kind: a.kind, sink }
            }
            "write" => {
                let a: WriteArgs = serde_json::from_value(args).map_err(fields)?;
                let data = match a.data {
                    Payload::Text(text) => WriteData::Text(text),
                    Payload::Base64 { base64 } => WriteData::Binary(
                        BASE64
                            .decode(base64)
                            .map_err(|source| WireError::Base64 { index, source })?,
                    ),
                };
                Command::Write { data }
            }
            "truncate" => {
                let a: TruncateArgs = serde_json::from_value(args).map_err(fields)?;
                Command::Truncate { size: a.size }
            }
            "mkdir" => {
                let a: NameArgs = serde_json::from_value(args).map_err(fields)?;
                Command::Mkdir { name: a.name }
            }
            "chdir" => {
                let a: NameArgs = serde_json::from_value(args).map_err(fields)?;
                Command::Chdir { name: a.name }
            }
            "fetch" => {
                let a: FetchArgs = serde_json::from_value(args).map_err(fields)?;
                Command::Fetch {
                    name: a.name,
                    url: a.url,
                    overwrite: a.overwrite,
                }
            }
            other => Command::Unknown(other.to_string()),
        };

        batch.push(Descriptor::new(command).with_force(step.force));
    }

    Ok(ParsedBatch { batch, results })
}

/// JSON view of a read result.
///
/// Text stays a string; binary and blob data are base64 encoded.
pub fn result_to_json(result: &ReadResult) -> Value {
    let data = match &result.data {
        None => Value::Null,
        Some(ReadData::Text(text)) => Value::String(text.clone()),
        Some(ReadData::Binary(bytes)) => json!({ "base64": BASE64.encode(bytes) }),
        Some(ReadData::Blob(blob)) => json!({
            "name": blob.name(),
            "size": blob.len(),
            "base64": BASE64.encode(blob.bytes()),
        }),
    };
    json!({
        "type": result.kind.map(|k| k.as_str()),
        "success": result.success,
        "data": data,
    })
}
