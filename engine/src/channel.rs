//! Canal de eventos WebSocket y estado de seguimiento de un prompt.
//!
//! La conexión se abre una vez por sesión de cliente (con su clientId) y se
//! reutiliza entre prompts. Un task en segundo plano lee mensajes y sólo
//! actualiza el estado compartido; nunca hace I/O propio. El que espera el
//! resultado mira ese estado a intervalo fijo.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use common::{event_matches_prompt, ComfyError, EngineEvent, EventKind, OutputFile, PromptId};

/// Estado compartido entre el lector del WebSocket y el loop de espera.
#[derive(Debug, Default)]
pub struct Tracker {
    /// Prompt en seguimiento. None = sin prompt en vuelo (fase pending).
    pub tracked: Option<PromptId>,
    /// Último tipo de evento visto para el prompt rastreado.
    pub last_kind: Option<EventKind>,
    /// Archivos acumulados de todos los eventos "executed" del prompt.
    /// Un job puede emitir salida en más de un paso.
    pub outputs: Vec<OutputFile>,
    /// Evento terminal observado (execution_error o execution_success).
    pub finished: Option<EventKind>,
    /// false cuando el WebSocket se cerró o falló.
    pub open: bool,
}

impl Tracker {
    /// Aplica un evento entrante. Los eventos de otro prompt se descartan
    /// enteros; los de progreso sin prompt_id se aceptan para el actual.
    pub fn apply(&mut self, event: &EngineEvent) {
        let Some(tracked) = self.tracked.clone() else {
            // Sin prompt en vuelo no hay nada que correlacionar.
            return;
        };

        if !event_matches_prompt(event, &tracked) {
            debug!(
                "descartando evento {:?} del prompt ajeno {:?}",
                event.kind,
                event.prompt_id()
            );
            return;
        }

        if event.kind == EventKind::Executed {
            if event.prompt_id().is_some() {
                self.outputs.extend(event.output_files());
            } else {
                warn!("evento executed sin prompt_id; no se acumulan archivos");
            }
        }

        self.last_kind = Some(event.kind);
        if event.kind.is_terminal() {
            self.finished = Some(event.kind);
        }
    }

    /// Arranca el seguimiento de un prompt nuevo, limpiando lo anterior.
    fn start(&mut self, prompt_id: PromptId) {
        self.tracked = Some(prompt_id);
        self.last_kind = None;
        self.outputs.clear();
        self.finished = None;
    }

    /// Suelta el prompt rastreado (vuelta a pending).
    fn clear(&mut self) {
        self.tracked = None;
    }
}

/// Conexión persistente contra /ws?clientId=... con su lector en segundo
/// plano.
pub struct EventChannel {
    state: Arc<Mutex<Tracker>>,
    reader: JoinHandle<()>,
}

impl EventChannel {
    /// Conecta y deja un task leyendo mensajes hasta que el peer cierre.
    pub async fn connect(ws_url: &str) -> Result<Self, ComfyError> {
        let (stream, _response) =
            connect_async(ws_url)
                .await
                .map_err(|_| ComfyError::Connection {
                    endpoint: ws_url.to_string(),
                })?;
        info!("canal de eventos conectado a {}", ws_url);

        let state = Arc::new(Mutex::new(Tracker {
            open: true,
            ..Tracker::default()
        }));

        let reader_state = Arc::clone(&state);
        let reader = tokio::spawn(async move {
            let (_write, mut read) = stream.split();
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        // Mensajes que no parsean se ignoran, igual que los
                        // tipos de evento desconocidos.
                        if let Ok(event) = serde_json::from_str::<EngineEvent>(&text) {
                            reader_state.lock().unwrap().apply(&event);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    // Frames binarios (previews) y pings no nos interesan.
                    Ok(_) => {}
                }
            }
            warn!("canal de eventos cerrado");
            reader_state.lock().unwrap().open = false;
        });

        Ok(Self { state, reader })
    }

    /// Fija el prompt a seguir; a partir de acá los eventos de otros prompts
    /// se filtran por id.
    pub fn begin_tracking(&self, prompt_id: PromptId) {
        self.state.lock().unwrap().start(prompt_id);
    }

    /// Suelta el prompt rastreado. Se llama en todos los caminos de salida.
    pub fn stop_tracking(&self) {
        self.state.lock().unwrap().clear();
    }

    /// true mientras haya un prompt en vuelo (invariante de uno a la vez).
    pub fn is_tracking(&self) -> bool {
        self.state.lock().unwrap().tracked.is_some()
    }

    /// true mientras la conexión siga viva.
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    /// Foto del estado actual: terminal observado + archivos acumulados.
    pub fn progress(&self) -> (Option<EventKind>, Vec<OutputFile>) {
        let tracker = self.state.lock().unwrap();
        (tracker.finished, tracker.outputs.clone())
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: serde_json::Value) -> EngineEvent {
        serde_json::from_value(value).unwrap()
    }

    fn tracker_siguiendo(prompt_id: &str) -> Tracker {
        let mut tracker = Tracker {
            open: true,
            ..Tracker::default()
        };
        tracker.start(prompt_id.to_string());
        tracker
    }

    #[test]
    fn ignora_eventos_de_otro_prompt() {
        let mut tracker = tracker_siguiendo("mio");

        tracker.apply(&event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "ajeno",
                "output": { "images": [ { "filename": "x.png" } ] }
            }
        })));
        tracker.apply(&event(json!({
            "type": "execution_success",
            "data": { "prompt_id": "ajeno" }
        })));

        assert!(tracker.outputs.is_empty());
        assert_eq!(tracker.finished, None);
        assert_eq!(tracker.last_kind, None);
    }

    #[test]
    fn acepta_progreso_sin_prompt_id() {
        let mut tracker = tracker_siguiendo("mio");

        tracker.apply(&event(json!({
            "type": "progress",
            "data": { "value": 5, "max": 20 }
        })));

        assert_eq!(tracker.last_kind, Some(EventKind::Progress));
        assert_eq!(tracker.finished, None);
    }

    #[test]
    fn acumula_salidas_de_varios_executed() {
        let mut tracker = tracker_siguiendo("mio");

        tracker.apply(&event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "mio",
                "output": { "images": [ { "filename": "a.png" } ] }
            }
        })));
        tracker.apply(&event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "mio",
                "output": { "9": { "images": [ { "filename": "b.png" } ] } }
            }
        })));

        let filenames: Vec<&str> = tracker.outputs.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(filenames, vec!["a.png", "b.png"]);
    }

    #[test]
    fn executed_sin_prompt_id_no_acumula_pero_actualiza_estado() {
        let mut tracker = tracker_siguiendo("mio");

        tracker.apply(&event(json!({
            "type": "executed",
            "data": { "output": { "images": [ { "filename": "x.png" } ] } }
        })));

        assert!(tracker.outputs.is_empty());
        assert_eq!(tracker.last_kind, Some(EventKind::Executed));
    }

    #[test]
    fn el_terminal_queda_registrado() {
        let mut tracker = tracker_siguiendo("mio");

        tracker.apply(&event(json!({
            "type": "execution_error",
            "data": { "prompt_id": "mio" }
        })));

        assert_eq!(tracker.finished, Some(EventKind::ExecutionError));
    }

    #[test]
    fn start_limpia_lo_acumulado_por_el_prompt_anterior() {
        let mut tracker = tracker_siguiendo("uno");
        tracker.apply(&event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "uno",
                "output": { "images": [ { "filename": "a.png" } ] }
            }
        })));
        tracker.apply(&event(json!({
            "type": "execution_success",
            "data": { "prompt_id": "uno" }
        })));

        tracker.start("dos".to_string());

        assert!(tracker.outputs.is_empty());
        assert_eq!(tracker.finished, None);
        assert_eq!(tracker.tracked.as_deref(), Some("dos"));
    }
}
