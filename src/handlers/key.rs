use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::error;

/// `GET /api/key`: hand the upstream credential to the browser client.
pub async fn get_api_key(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    match state.config().upstream.api_key.as_deref() {
        Some(key) => Ok(HttpResponse::Ok().json(json!({ "apiKey": key }))),
        None => {
            error!("API key requested but {} is not set", crate::config::API_KEY_ENV);
            Err(AppError::ConfigError(
                "OpenAI API key not found in environment variables".to_string(),
            ))
        }
    }
}
