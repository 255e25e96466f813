//! Local webhook receiver for trying the gateway without an external
//! service. Point `webhook.base_url` at `/localCallbackExample` to log every
//! event to `message_log.txt` under the sessions directory.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Log file name below the sessions directory.
const MESSAGE_LOG: &str = "message_log.txt";

/// `POST /localCallbackExample`
pub(super) async fn local_callback_example(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if body["dataType"] == "qr" {
        info!(
            session_id = body["sessionId"].as_str().unwrap_or_default(),
            qr = %body["data"]["qr"],
            "qr code received"
        );
    }

    let path = state.config.sessions.path.join(MESSAGE_LOG);
    let line = format!("{body}\r\n");
    let write = async {
        tokio::fs::create_dir_all(&state.config.sessions.path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    };
    write.await.map_err(|e| {
        error!(path = %path.display(), error = %e, "failed to append callback");
        ApiError::internal(e.to_string())
    })?;

    Ok(Json(json!({ "success": true })))
}
