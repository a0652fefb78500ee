// gateway/src/state.rs

use std::env;
use std::path::PathBuf;

/// Estado compartido de los handlers.
#[derive(Clone)]
pub struct AppState {
    /// Raíz de almacenamiento de las imágenes generadas.
    pub output_dir: PathBuf,
}

impl AppState {
    /// Lee COMFY_OUTPUT_DIR o usa ./comfy/output como default.
    pub fn from_env() -> Self {
        let output_dir = env::var("COMFY_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("comfy").join("output"));

        Self { output_dir }
    }
}
