//! Lectura de metadatos tEXt embebidos en archivos PNG.
//!
//! ComfyUI guarda la descripción del job como JSON dentro de un chunk tEXt
//! con keyword "prompt". Acá recorremos la estructura de chunks a mano para
//! no depender de una librería de decodificación de imágenes completa.

use serde_json::Value;

/// Firma de 8 bytes de todo archivo PNG.
const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Devuelve el texto del primer chunk tEXt cuyo keyword coincida, o None si
/// el buffer no es un PNG, viene truncado, o no trae ese keyword.
/// Nunca falla: la ausencia de metadatos no es un error.
pub fn find_text_chunk(bytes: &[u8], keyword: &str) -> Option<String> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return None;
    }

    // Cada chunk: length (4, big-endian) + type (4) + data (length) + crc (4).
    // El CRC no se verifica: confiamos en el framing, no en la integridad.
    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= bytes.len() {
        let length = u32::from_be_bytes(bytes[offset..offset + 4].try_into().ok()?) as usize;
        let chunk_type = &bytes[offset + 4..offset + 8];
        let data_start = offset + 8;
        let data_end = data_start.checked_add(length)?;

        // Un length que declara más bytes de los que hay corta el recorrido:
        // un archivo truncado no puede provocar una lectura fuera de rango.
        if data_end + 4 > bytes.len() {
            return None;
        }

        if chunk_type == b"tEXt" {
            let data = &bytes[data_start..data_end];
            // keyword\0texto; el keyword es Latin-1 según el estándar pero el
            // texto se extrae como UTF-8 (es JSON generado por el engine).
            if let Some(null_index) = data.iter().position(|&b| b == 0) {
                let (kw, rest) = data.split_at(null_index);
                if kw == keyword.as_bytes() {
                    return Some(String::from_utf8_lossy(&rest[1..]).into_owned());
                }
            }
        }

        offset = data_end + 4;
    }

    None
}

/// Resultado de intentar recuperar el prompt embebido en una imagen.
/// Distingue un prompt recuperado con confianza de un mejor esfuerzo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptText {
    /// Texto extraído del nodo de codificación de texto del workflow.
    Found(String),
    /// El JSON embebido no parseó pero el texto crudo era corto; se usa tal
    /// cual como mejor esfuerzo.
    RawFallback(String),
    /// Sin keyword "prompt", o con una estructura que no trae texto.
    NotFound,
}

impl PromptText {
    /// El texto recuperado, venga con la confianza que venga.
    pub fn text(&self) -> Option<&str> {
        match self {
            PromptText::Found(text) | PromptText::RawFallback(text) => Some(text),
            PromptText::NotFound => None,
        }
    }
}

/// Límite para usar el texto crudo como fallback cuando el JSON no parsea.
const RAW_FALLBACK_MAX_LEN: usize = 500;

/// Busca el JSON embebido bajo el keyword "prompt" y extrae el texto del
/// primer nodo cuyo class_type incluya "CLIPTextEncode". No recuperar nada
/// es un resultado válido, no un error: la procedencia es mejor esfuerzo.
pub fn extract_prompt(bytes: &[u8]) -> PromptText {
    let Some(raw) = find_text_chunk(bytes, "prompt") else {
        return PromptText::NotFound;
    };

    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => {
            if raw.len() < RAW_FALLBACK_MAX_LEN {
                return PromptText::RawFallback(raw);
            }
            return PromptText::NotFound;
        }
    };

    let Some(nodes) = parsed.as_object() else {
        return PromptText::NotFound;
    };

    for node in nodes.values() {
        let class_type = node.get("class_type").and_then(Value::as_str).unwrap_or("");
        if !class_type.contains("CLIPTextEncode") {
            continue;
        }
        if let Some(text) = node.pointer("/inputs/text").and_then(Value::as_str) {
            return PromptText::Found(text.to_string());
        }
    }

    PromptText::NotFound
}
