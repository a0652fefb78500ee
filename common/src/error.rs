use thiserror::Error;

/// Errores al hablar con ComfyUI. Cada variante corresponde a un dominio de
/// fallo distinto: no poder conectar, que el engine rechace o falle el
/// workflow, que el canal de eventos se caiga, o que falte un artefacto.
#[derive(Debug, Error)]
pub enum ComfyError {
    /// El endpoint no contesta (connection refused, DNS, timeout de red).
    #[error("no se pudo conectar con ComfyUI en {endpoint}")]
    Connection { endpoint: String },

    /// El engine reportó execution_error para el prompt rastreado.
    /// El canal no trae detalle estructurado en este camino.
    #[error("ComfyUI reportó un error ejecutando el workflow")]
    WorkflowExecution,

    /// El canal de eventos se cerró antes de un evento terminal.
    #[error("el canal de eventos se cerró durante la ejecución")]
    Transport,

    /// Ya hay un prompt en vuelo para este cliente; es un error del caller,
    /// no del engine.
    #[error("ya hay un prompt en ejecución para este cliente")]
    PromptInFlight,

    /// La lista de inputs referencia un nodo o campo que el workflow no tiene.
    #[error("input inválido para el workflow: {0}")]
    InvalidInput(String),

    /// Se superó el tiempo máximo de espera sin evento terminal.
    #[error("se agotó el tiempo de espera ({secs}s) sin evento terminal")]
    Timeout { secs: u64 },

    /// El archivo pedido no existe en el almacenamiento del engine.
    #[error("el archivo {filename} no existe en el directorio de salida de ComfyUI")]
    ArtifactNotFound { filename: String },

    /// Cualquier otra respuesta no exitosa; el cuerpo va tal cual para
    /// diagnóstico.
    #[error("respuesta inesperada de ComfyUI: {body}")]
    Engine { body: String },

    /// Stream multi-artefacto que terminó sin el separador final.
    #[error("stream de artefactos mal formado: quedaron {0} bytes sin separador final")]
    MalformedStream(usize),
}
