use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_files::NamedFile;
use actix_web::web;
use std::path::Path;

/// Name of the entry document inside the static directory.
pub const INDEX_FILE: &str = "index.html";

/// `GET /`: serve the entry HTML document.
pub async fn index(state: web::Data<AppState>) -> AppResult<NamedFile> {
    let path = Path::new(&state.config().server.static_dir).join(INDEX_FILE);
    NamedFile::open_async(&path)
        .await
        .map_err(|e| AppError::Internal(format!("cannot open {}: {}", path.display(), e)))
}

/// Everything else under the static directory.
pub fn static_files(static_dir: &str) -> actix_files::Files {
    actix_files::Files::new("/", static_dir).index_file(INDEX_FILE)
}
