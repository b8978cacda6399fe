use std::path::Path;

use safe_relocate::Error;

const CLI_ERROR_CODE_JSON: &str = "json";

#[derive(Debug)]
pub(crate) enum CliError {
    Tool(Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Tool(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Tool(err) => Some(err),
            CliError::Json(err) => Some(err),
        }
    }
}

impl From<Error> for CliError {
    fn from(err: Error) -> Self {
        Self::Tool(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl CliError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            CliError::Tool(err) => err.code(),
            CliError::Json(_) => CLI_ERROR_CODE_JSON,
        }
    }
}

/// Machine-readable output never carries more of a path than its final component.
pub(crate) fn leaf(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<redacted>".to_string())
}

fn details_map(kind: &'static str) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    out.insert(
        "kind".to_string(),
        serde_json::Value::String(kind.to_string()),
    );
    out
}

fn insert_io_fields(out: &mut serde_json::Map<String, serde_json::Value>, err: &std::io::Error) {
    out.insert(
        "io_kind".to_string(),
        serde_json::Value::String(format!("{:?}", err.kind())),
    );
    if let Some(raw_os_error) = err.raw_os_error() {
        out.insert("raw_os_error".to_string(), serde_json::json!(raw_os_error));
    }
}

#[derive(Debug)]
pub(crate) struct ToolErrorRender {
    pub(crate) details: serde_json::Value,
    pub(crate) public_message: String,
}

pub(crate) fn render_tool_error(tool: &Error) -> ToolErrorRender {
    let mut out = details_map(tool.code());
    let public_message = match tool {
        Error::Io(err) => {
            insert_io_fields(&mut out, err);
            "io error".to_string()
        }
        Error::IoPath { op, path, source } => {
            let rendered = leaf(path);
            insert_io_fields(&mut out, source);
            out.insert("op".to_string(), serde_json::Value::String(op.to_string()));
            out.insert(
                "path".to_string(),
                serde_json::Value::String(rendered.clone()),
            );
            format!("io error during {op} ({rendered})")
        }
        Error::InvalidUtf8(path) => {
            let rendered = leaf(path);
            out.insert(
                "path".to_string(),
                serde_json::Value::String(rendered.clone()),
            );
            format!("invalid utf-8 in file: {rendered}")
        }
        Error::InputTooLarge {
            size_bytes,
            max_bytes,
        } => {
            out.insert("size_bytes".to_string(), serde_json::json!(size_bytes));
            out.insert("max_bytes".to_string(), serde_json::json!(max_bytes));
            tool.to_string()
        }
        Error::PathRejected(reason) => {
            out.insert("reason".to_string(), serde_json::json!(reason));
            tool.to_string()
        }
        Error::ValidationFailed(reason) => {
            out.insert("reason".to_string(), serde_json::json!(reason));
            tool.to_string()
        }
        Error::GrantDenied(reason) => {
            out.insert("reason".to_string(), serde_json::json!(reason));
            tool.to_string()
        }
        Error::Relocation(failure) => {
            out.insert("reason".to_string(), serde_json::json!(failure));
            tool.to_string()
        }
        Error::InvalidPolicy(_) => "invalid policy".to_string(),
        Error::Json(_) | Error::Store(_) | Error::Timeout(_) => tool.to_string(),
    };
    ToolErrorRender {
        details: serde_json::Value::Object(out),
        public_message,
    }
}

/// `{"error":{"code","message","details"}}`, paths reduced to their leaf.
pub(crate) fn render_json(err: &CliError) -> String {
    let mut error = serde_json::Map::new();
    error.insert(
        "code".to_string(),
        serde_json::Value::String(err.code().to_string()),
    );
    match err {
        CliError::Tool(tool) => {
            let render = render_tool_error(tool);
            error.insert(
                "message".to_string(),
                serde_json::Value::String(render.public_message),
            );
            error.insert("details".to_string(), render.details);
        }
        CliError::Json(json) => {
            error.insert(
                "message".to_string(),
                serde_json::Value::String(format!("json error: {json}")),
            );
        }
    }
    let out = serde_json::json!({ "error": error });
    serde_json::to_string(&out).unwrap_or_else(|_| err.code().to_string())
}
