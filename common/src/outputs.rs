//! Catálogo de imágenes ya generadas en el directorio de salida.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pngmeta::extract_prompt;

/// Una imagen generada, con su metadato de procedencia si se pudo recuperar.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEntry {
    pub name: String,
    /// Ruta con la que se sirve vía /outputs/ en el gateway.
    pub path: String,
    pub created: DateTime<Utc>,
    pub size: u64,
    pub prompt: Option<String>,
}

/// Recorre el directorio de salida y arma el catálogo de PNGs, más nuevos
/// primero. Los archivos ilegibles se saltan: el catálogo es mejor esfuerzo.
pub fn scan_outputs(dir: &Path) -> Result<Vec<OutputEntry>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("no se pudo leer el directorio de salida {}", dir.display()))?;

    let mut outputs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let is_png = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if !path.is_file() || !is_png {
            continue;
        }

        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(bytes) = fs::read(&path) else {
            continue;
        };

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let name = entry.file_name().to_string_lossy().into_owned();

        outputs.push(OutputEntry {
            path: format!("/outputs/{name}"),
            prompt: extract_prompt(&bytes).text().map(str::to_string),
            created,
            size: metadata.len(),
            name,
        });
    }

    // Más recientes primero.
    outputs.sort_by(|a, b| b.created.cmp(&a.created));
    Ok(outputs)
}
