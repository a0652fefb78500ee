//! Cliente de ComfyUI: una instancia por sesión, un prompt en vuelo a la vez.
//!
//! El envío (request/response), la terminación (canal de eventos) y la
//! descarga (request aparte) son tres dominios de fallo independientes del
//! engine remoto; cada uno reporta su propio error.

use std::env;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::info;
use uuid::Uuid;

use common::{
    apply_inputs, Artifact, ComfyError, EventKind, OutputFile, PromptOutcome, PromptRequest,
    PromptResponse, Workflow, WorkflowInput,
};

use crate::channel::EventChannel;

/// Host:puerto del engine.
/// - En Docker: COMFYUI_API_URL=comfyui:8188
/// - Local: default 127.0.0.1:8188
fn comfy_base_url() -> String {
    env::var("COMFYUI_API_URL").unwrap_or_else(|_| "127.0.0.1:8188".to_string())
}

/// true si hay que hablar https/wss.
fn comfy_secure() -> bool {
    env::var("COMFYUI_SECURE").map(|v| v == "true").unwrap_or(false)
}

/// Tiempo máximo de espera del resultado de un prompt, en segundos.
/// El protocolo no trae timeout propio; este límite es nuestro.
/// Se puede sobreescribir con la env var COMFYUI_SUBMIT_TIMEOUT_SECS.
fn submit_timeout_secs() -> u64 {
    env::var("COMFYUI_SUBMIT_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(600)
}

/// Intervalo del loop de espera. La salida es cooperativa: este intervalo
/// acota la latencia máxima para notar un terminal o un canal caído.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ComfyClient {
    http: reqwest::Client,
    base_url: String,
    secure: bool,
    client_id: String,
    channel: EventChannel,
}

impl std::fmt::Debug for ComfyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComfyClient")
            .field("base_url", &self.base_url)
            .field("secure", &self.secure)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl ComfyClient {
    /// Crea el cliente y abre el canal de eventos con un clientId nuevo.
    /// `endpoint` pisa COMFYUI_API_URL sólo para esta instancia.
    pub async fn connect(endpoint: Option<String>) -> Result<Self, ComfyError> {
        let base_url = endpoint.unwrap_or_else(comfy_base_url);
        let secure = comfy_secure();
        let client_id = Uuid::new_v4().to_string();

        let ws_url = format!(
            "{}://{}/ws?clientId={}",
            if secure { "wss" } else { "ws" },
            base_url,
            client_id
        );
        let channel = EventChannel::connect(&ws_url).await?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            secure,
            client_id,
            channel,
        })
    }

    fn http_url(&self, path: &str) -> String {
        format!(
            "{}://{}{}",
            if self.secure { "https" } else { "http" },
            self.base_url,
            path
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Envía el workflow (con los inputs ya aplicados encima) y espera el
    /// evento terminal por el canal. Devuelve el prompt_id asignado por el
    /// engine y los archivos acumulados de todos los pasos con salida.
    pub async fn run_workflow(
        &self,
        mut workflow: Workflow,
        inputs: &[WorkflowInput],
    ) -> Result<PromptOutcome, ComfyError> {
        // Un solo prompt en vuelo por cliente; pedir otro es error del caller.
        if self.channel.is_tracking() {
            return Err(ComfyError::PromptInFlight);
        }

        apply_inputs(&mut workflow, inputs)?;

        let request = PromptRequest {
            prompt: workflow,
            client_id: self.client_id.clone(),
        };

        let url = self.http_url("/prompt");
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| connection_or_engine(e, &url))?;

        if !response.status().is_success() {
            // El rechazo puede venir como {error: {message}, node_errors}
            // o como texto plano; el cuerpo va tal cual.
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyError::Engine { body });
        }

        let PromptResponse { prompt_id } = response
            .json()
            .await
            .map_err(|e| ComfyError::Engine { body: e.to_string() })?;

        info!("prompt {} aceptado; esperando eventos", prompt_id);
        self.channel.begin_tracking(prompt_id.clone());

        // Pase lo que pase en la espera, el cliente vuelve a idle.
        let result = self.wait_for_outcome(&prompt_id).await;
        self.channel.stop_tracking();
        result
    }

    /// Loop de espera cooperativo: mira el tracker y la conexión a intervalo
    /// fijo, desacoplado de la llegada de eventos.
    async fn wait_for_outcome(&self, prompt_id: &str) -> Result<PromptOutcome, ComfyError> {
        let timeout_secs = submit_timeout_secs();
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        loop {
            let (finished, outputs) = self.channel.progress();

            match finished {
                Some(EventKind::ExecutionSuccess) => {
                    info!("prompt {} terminó con {} archivo(s)", prompt_id, outputs.len());
                    return Ok(PromptOutcome {
                        prompt_id: prompt_id.to_string(),
                        files: outputs,
                    });
                }
                Some(EventKind::ExecutionError) => {
                    return Err(ComfyError::WorkflowExecution);
                }
                _ => {}
            }

            // Canal caído sin evento terminal: fallo duro, no un final
            // silencioso.
            if !self.channel.is_open() {
                return Err(ComfyError::Transport);
            }

            if Instant::now() >= deadline {
                return Err(ComfyError::Timeout { secs: timeout_secs });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Descarga un archivo de salida por su tripla {filename, subfolder, type}.
    pub async fn fetch_output(&self, file: &OutputFile) -> Result<Artifact, ComfyError> {
        let url = self.http_url("/view");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", file.kind.as_str()),
            ])
            .send()
            .await
            .map_err(|e| connection_or_engine(e, &url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ComfyError::ArtifactNotFound {
                filename: file.filename.clone(),
            });
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyError::Engine { body });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = response
            .bytes()
            .await
            .map_err(|e| ComfyError::Engine { body: e.to_string() })?
            .to_vec();

        Ok(Artifact { content_type, data })
    }
}

/// Un error de conexión (refused, DNS, timeout de red) se reporta con el
/// endpoint para que el mensaje sea accionable; el resto pasa como respuesta
/// inesperada.
fn connection_or_engine(error: reqwest::Error, endpoint: &str) -> ComfyError {
    if error.is_connect() || error.is_timeout() {
        ComfyError::Connection {
            endpoint: endpoint.to_string(),
        }
    } else {
        ComfyError::Engine {
            body: error.to_string(),
        }
    }
}
