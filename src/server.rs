// Line-delimited JSON transport: one request object per stdin line, one
// response object per stdout line. Invocations are handled serially; the
// structured logs go to stderr so stdout stays machine-readable.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::tools;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Serve requests until stdin closes.
pub async fn serve(engine: Engine) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!(session = %engine.session_id, "serving tool requests on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, &line).await;
        let mut serialized = serde_json::to_string(&response)?;
        serialized.push('\n');
        stdout.write_all(serialized.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("stdin closed; shutting down");
    Ok(())
}

async fn handle_line(engine: &Engine, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "unparseable request line");
            return json!({
                "id": null,
                "isError": true,
                "result": {
                    "success": false,
                    "error": format!("malformed request: {e}"),
                    "code": "INTERNAL_ERROR",
                },
            });
        }
    };

    if request.tool == "list_tools" {
        return json!({
            "id": request.id,
            "isError": false,
            "result": {
                "success": true,
                "tools": tools::registry(),
            },
        });
    }

    let args = request.arguments.unwrap_or_else(|| json!({}));
    let result = tools::dispatch(engine, &request.tool, args).await;
    let (envelope, is_error) = tools::render_envelope(&result);
    json!({
        "id": request.id,
        "isError": is_error,
        "result": envelope,
    })
}
