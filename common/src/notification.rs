use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::OutputFile;

/// Tipos de evento que manda ComfyUI por el canal WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Executing,
    ExecutionCached,
    Progress,
    Executed,
    ExecutionError,
    ExecutionSuccess,
    /// Cualquier tipo que no conocemos; se acepta y se ignora.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Los únicos dos tipos que terminan la espera de un prompt. El resto
    /// (queued, executing, progress, etc.) es observacional.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::ExecutionError | EventKind::ExecutionSuccess)
    }
}

/// Un mensaje del canal de eventos: tipo + payload libre.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
}

impl EngineEvent {
    /// prompt_id embebido en el payload, si el evento lo trae.
    pub fn prompt_id(&self) -> Option<&str> {
        self.data.get("prompt_id").and_then(Value::as_str)
    }

    /// Archivos de salida de un evento "executed". Acepta los dos formatos
    /// que usa el engine: data.output.images y data.output.<node_id>.images.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let Some(output) = self.data.get("output") else {
            return Vec::new();
        };

        let mut files = Vec::new();

        if let Some(images) = output.get("images").and_then(Value::as_array) {
            collect_files(images, &mut files);
        } else if let Some(nodes) = output.as_object() {
            for node_output in nodes.values() {
                if let Some(images) = node_output.get("images").and_then(Value::as_array) {
                    collect_files(images, &mut files);
                }
            }
        }

        files
    }
}

fn collect_files(images: &[Value], files: &mut Vec<OutputFile>) {
    for image in images {
        // Entradas sin filename se descartan; subfolder y type se completan
        // con los defaults del tipo.
        if let Ok(file) = serde_json::from_value::<OutputFile>(image.clone()) {
            files.push(file);
        }
    }
}

/// Filtro de correlación entre el canal de eventos y el prompt rastreado:
/// un evento con prompt_id distinto se descarta entero (por el canal puede
/// venir tráfico de otro cliente); los eventos sin prompt_id (status,
/// progress) se aceptan para el prompt actual.
pub fn event_matches_prompt(event: &EngineEvent, tracked: &str) -> bool {
    match event.prompt_id() {
        Some(id) => id == tracked,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> EngineEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn evento_de_otro_prompt_no_matchea() {
        let e = event(json!({ "type": "executed", "data": { "prompt_id": "otro" } }));
        assert!(!event_matches_prompt(&e, "mio"));
    }

    #[test]
    fn evento_sin_prompt_id_se_acepta_para_el_actual() {
        let e = event(json!({ "type": "progress", "data": { "value": 3, "max": 20 } }));
        assert!(event_matches_prompt(&e, "mio"));
    }

    #[test]
    fn executed_con_images_directo() {
        let e = event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "p-1",
                "output": { "images": [
                    { "filename": "a.png", "subfolder": "", "type": "output" },
                    { "filename": "b.png" }
                ] }
            }
        }));

        let files = e.output_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a.png");
        assert_eq!(files[1].kind, "output");
    }

    #[test]
    fn executed_con_images_por_nodo() {
        let e = event(json!({
            "type": "executed",
            "data": {
                "prompt_id": "p-1",
                "output": {
                    "9": { "images": [ { "filename": "a.png" } ] },
                    "12": { "images": [ { "filename": "b.png" } ] }
                }
            }
        }));

        assert_eq!(e.output_files().len(), 2);
    }

    #[test]
    fn solo_error_y_success_son_terminales() {
        assert!(EventKind::ExecutionError.is_terminal());
        assert!(EventKind::ExecutionSuccess.is_terminal());
        assert!(!EventKind::Executed.is_terminal());
        assert!(!EventKind::Progress.is_terminal());
    }

    #[test]
    fn tipo_desconocido_parsea_como_unknown() {
        let e = event(json!({ "type": "algo_nuevo", "data": {} }));
        assert_eq!(e.kind, EventKind::Unknown);
    }
}
