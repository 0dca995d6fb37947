use std::path::Path;

use tower_http::services::{ServeDir, ServeFile};
use tracing::warn;

/// Static files from `web_dir`, with `index.html` for any path that is not a file.
pub fn static_files(web_dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(web_dir).fallback(ServeFile::new(web_dir.join("index.html")))
}

/// Warn at startup when the page is missing; the API still works without it.
pub fn check_web_dir(web_dir: &Path) -> bool {
    let index = web_dir.join("index.html");
    let present = index.is_file();
    if !present {
        warn!("{} not found, only the API will be usable", index.display());
    }
    present
}
