use crate::services::dispatcher::EventDispatcher;
use std::path::PathBuf;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: EventDispatcher,
    /// Where page rasters are written; checked by `/readyz`.
    pub scratch_dir: PathBuf,
}
