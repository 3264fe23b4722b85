//! Runtime configuration endpoints: inspect the active configuration and
//! apply partial updates (validated before they take effect).

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "storage": {
                "upload_root": config.storage.upload_root,
                "tmp_root": config.storage.tmp_root
            },
            "encoder": {
                "program": config.encoder.program,
                "audio_codec": config.encoder.audio_codec,
                "audio_bitrate": config.encoder.audio_bitrate,
                "sample_rate": config.encoder.sample_rate,
                "channels": config.encoder.channels,
                "extension": config.encoder.extension
            },
            "upload": {
                "stable_window_ms": config.upload.stable_window_ms,
                "stability_timeout_ms": config.upload.stability_timeout_ms,
                "cleanup_delay_secs": config.upload.cleanup_delay_secs
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())
        .map_err(|err| AppError::InvalidArgument(format!("invalid JSON body: {}", err)))?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|err| AppError::InvalidArgument(err.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::InvalidArgument)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "encoder": {
                "audio_bitrate": current_config.encoder.audio_bitrate,
                "sample_rate": current_config.encoder.sample_rate,
                "channels": current_config.encoder.channels
            },
            "upload": {
                "stable_window_ms": current_config.upload.stable_window_ms,
                "stability_timeout_ms": current_config.upload.stability_timeout_ms,
                "cleanup_delay_secs": current_config.upload.cleanup_delay_secs
            }
        }
    })))
}
