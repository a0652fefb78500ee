use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ComfyError;

pub type PromptId = String;
pub type ClientId = String;

/// Workflow en formato "API" de ComfyUI: un objeto JSON con un nodo por
/// clave, donde cada nodo declara "class_type" e "inputs".
/// Usamos JSON crudo porque el grafo es opaco para nosotros.
pub type Workflow = Value;

/* --------- Envío de prompts --------- */

/// Cuerpo que espera POST /prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: Workflow,
    pub client_id: ClientId,
}

/// Respuesta de POST /prompt cuando el workflow fue aceptado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub prompt_id: PromptId,
}

/// Valor de entrada que se aplica sobre el workflow antes de enviarlo.
/// La clave tiene forma "node_id/campo", ej: "6/text".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub key: String,
    pub value: Value,
}

/// Aplica los inputs sobre el workflow: "node_id/campo" escribe en
/// workflow[node_id]["inputs"][campo]. Referenciar un nodo que el workflow
/// no tiene es un error; no se crean nodos de la nada.
pub fn apply_inputs(workflow: &mut Workflow, inputs: &[WorkflowInput]) -> Result<(), ComfyError> {
    for input in inputs {
        let (node_id, field) = input
            .key
            .split_once('/')
            .ok_or_else(|| ComfyError::InvalidInput(format!("clave mal formada: {}", input.key)))?;

        let node = workflow
            .get_mut(node_id)
            .ok_or_else(|| ComfyError::InvalidInput(format!("el workflow no tiene el nodo {node_id}")))?;

        if !node.is_object() {
            return Err(ComfyError::InvalidInput(format!(
                "el nodo {node_id} no es un objeto"
            )));
        }
        if !node["inputs"].is_object() && !node["inputs"].is_null() {
            return Err(ComfyError::InvalidInput(format!(
                "el nodo {node_id} no tiene un mapa de inputs"
            )));
        }

        node["inputs"][field] = input.value.clone();
    }

    Ok(())
}

/* --------- Archivos de salida --------- */

fn default_output_kind() -> String {
    "output".to_string()
}

/// Referencia a un archivo producido por un job, tal como lo reporta el
/// evento "executed": {filename, subfolder, type}.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Almacenamiento dentro de ComfyUI: "output", "temp" o "input".
    #[serde(rename = "type", default = "default_output_kind")]
    pub kind: String,
}

/// Resultado de una ejecución completa: id asignado por el engine más los
/// archivos acumulados de todos los pasos que emitieron salida.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOutcome {
    pub prompt_id: PromptId,
    pub files: Vec<OutputFile>,
}
