use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use common::{encode_artifacts, scan_outputs, Artifact, ComfyError, OutputEntry, Workflow, WorkflowInput};
use engine::ComfyClient;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/generations", post(create_generation))
        .route("/api/v1/outputs", get(list_outputs))
        .route("/outputs/*path", get(serve_output))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

/// Cuerpo de POST /api/v1/generations.
#[derive(Debug, Deserialize)]
pub struct GenerationRequest {
    pub workflow: Workflow,
    #[serde(default)]
    pub inputs: Vec<WorkflowInput>,
    /// Pisa COMFYUI_API_URL sólo para esta generación.
    pub endpoint: Option<String>,
}

/// Error con el formato JSON que consumen los clientes del gateway.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    pub error_msg: String,
    pub error_details: String,
    pub error_type: String,
}

fn error_response(error: &ComfyError) -> ResponseError {
    let (error_type, error_details) = match error {
        ComfyError::Connection { endpoint } => ("ConnectionError", endpoint.clone()),
        ComfyError::WorkflowExecution => ("WorkflowExecutionError", String::new()),
        ComfyError::Transport => ("TransportError", String::new()),
        ComfyError::PromptInFlight => ("RequestError", String::new()),
        ComfyError::InvalidInput(detail) => ("RequestError", detail.clone()),
        ComfyError::Timeout { .. } => ("TimeoutError", String::new()),
        ComfyError::ArtifactNotFound { filename } => ("ArtifactNotFound", filename.clone()),
        ComfyError::Engine { body } => ("EngineError", body.clone()),
        ComfyError::MalformedStream(_) => ("EngineError", String::new()),
    };

    ResponseError {
        error_msg: error.to_string(),
        error_details,
        error_type: error_type.to_string(),
    }
}

// Ejecuta el workflow contra ComfyUI y devuelve todos los artefactos en un
// solo cuerpo octet-stream con el framing por separador.
async fn create_generation(Json(request): Json<GenerationRequest>) -> Response {
    match run_generation(request).await {
        Ok(body) => Response::builder()
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"generated_images.bin\"",
            )
            .body(Body::from(body))
            .unwrap(),
        Err(error) => {
            warn!("generación fallida: {}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_response(&error)),
            )
                .into_response()
        }
    }
}

async fn run_generation(request: GenerationRequest) -> Result<Vec<u8>, ComfyError> {
    // Conexión nueva por generación: el canal de eventos queda atado a un
    // clientId fresco y no se mezcla con generaciones de otros usuarios.
    let client = ComfyClient::connect(request.endpoint).await?;
    let outcome = client.run_workflow(request.workflow, &request.inputs).await?;

    info!(
        "prompt {} produjo {} archivo(s)",
        outcome.prompt_id,
        outcome.files.len()
    );

    let mut artifacts: Vec<Artifact> = Vec::new();
    for file in &outcome.files {
        artifacts.push(client.fetch_output(file).await?);
    }

    Ok(encode_artifacts(&artifacts))
}

#[derive(Debug, Serialize)]
pub struct OutputsResponse {
    pub outputs: Vec<OutputEntry>,
}

/// Catálogo de imágenes generadas con su prompt recuperado.
async fn list_outputs(State(state): State<AppState>) -> Result<Json<OutputsResponse>, StatusCode> {
    if !state.output_dir.exists() {
        warn!("no existe el directorio de salida {}", state.output_dir.display());
        return Err(StatusCode::NOT_FOUND);
    }

    match scan_outputs(&state.output_dir) {
        Ok(outputs) => Ok(Json(OutputsResponse { outputs })),
        Err(error) => {
            warn!("no se pudo armar el catálogo: {:?}", error);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Sirve un archivo ya generado por ruta relativa bajo la raíz de salida.
/// 403 si la ruta resuelta se escapa de la raíz, 404 si no existe.
async fn serve_output(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Response {
    let requested = state.output_dir.join(&path);
    let normalized = normalize_path(&requested);
    let root = normalize_path(&state.output_dir);

    // Única defensa contra path traversal: la ruta normalizada tiene que
    // seguir colgando de la raíz normalizada.
    if !normalized.starts_with(&root) {
        warn!("intento de path traversal: {}", path);
        return (StatusCode::FORBIDDEN, "Access denied").into_response();
    }

    if !normalized.exists() {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    }

    if !normalized.is_file() {
        return (StatusCode::BAD_REQUEST, "Not a file").into_response();
    }

    let bytes = match std::fs::read(&normalized) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!("no se pudo leer {}: {}", normalized.display(), error);
            return (StatusCode::INTERNAL_SERVER_ERROR, "read error").into_response();
        }
    };

    let content_type = mime_guess::from_path(&normalized)
        .first_or_octet_stream()
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=31536000")
        .body(Body::from(bytes))
        .unwrap()
}

/// Normalización léxica: resuelve "." y ".." sin tocar el filesystem, para
/// que el chequeo de traversal no dependa de si el archivo existe.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::fs;
    use std::path::PathBuf;
    use tower::ServiceExt;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("gateway_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn app_with_root(output_dir: PathBuf) -> Router {
        build_router(AppState { output_dir })
    }

    const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn traversal_fuera_de_la_raiz_da_403() {
        let root = temp_dir("traversal");
        let app = app_with_root(root);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/outputs/../../../etc/passwd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn archivo_inexistente_dentro_de_la_raiz_da_404() {
        let root = temp_dir("ausente");
        let app = app_with_root(root);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/outputs/no_existe.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sirve_un_archivo_existente_con_su_content_type() {
        let root = temp_dir("sirve");
        fs::write(root.join("gato.png"), PNG_SIGNATURE).unwrap();
        let app = app_with_root(root);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/outputs/gato.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE.as_str()],
            "image/png"
        );
    }

    #[tokio::test]
    async fn el_catalogo_lista_los_png_del_directorio() {
        let root = temp_dir("catalogo");
        fs::write(root.join("a.png"), PNG_SIGNATURE).unwrap();
        fs::write(root.join("notas.txt"), b"no es imagen").unwrap();
        let app = app_with_root(root);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/outputs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let outputs = parsed["outputs"].as_array().unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0]["name"], "a.png");
        assert_eq!(outputs[0]["path"], "/outputs/a.png");
        assert!(outputs[0]["prompt"].is_null());
    }

    #[tokio::test]
    async fn catalogo_sin_directorio_da_404() {
        let root = temp_dir("raiz").join("no_existe");
        let app = app_with_root(root);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/outputs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
