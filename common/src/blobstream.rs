//! Framing de múltiples artefactos binarios en un solo stream.
//!
//! Formato: por cada artefacto va `Content-Type: <mime>\r\n\r\n<bytes>`
//! seguido del separador literal, incluido después del último artefacto.
//! El separador se matchea como subsecuencia de bytes, no como estructura:
//! no puede aparecer dentro de un header ni de un cuerpo.

use crate::error::ComfyError;

/// Separador literal entre artefactos.
pub const BLOB_SEPARATOR: &[u8] = b"--BLOB_SEPARATOR--";

/// Separador entre el header y el cuerpo de cada frame.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Un artefacto binario: bytes crudos + content-type declarado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Escribe un artefacto con el framing documentado arriba.
pub fn encode_artifact(out: &mut Vec<u8>, artifact: &Artifact) {
    out.extend_from_slice(b"Content-Type: ");
    out.extend_from_slice(artifact.content_type.as_bytes());
    out.extend_from_slice(HEADER_END);
    out.extend_from_slice(&artifact.data);
    out.extend_from_slice(BLOB_SEPARATOR);
}

/// Codifica la lista completa, ej: el cuerpo de una respuesta octet-stream.
pub fn encode_artifacts(artifacts: &[Artifact]) -> Vec<u8> {
    let mut out = Vec::new();
    for artifact in artifacts {
        encode_artifact(&mut out, artifact);
    }
    out
}

/// Decodificador incremental: se alimenta con los chunks según llegan y va
/// emitiendo los artefactos completos que se pudieron cortar del frente del
/// buffer. Lo consumido se descarta, así el buffer no crece sin límite
/// mientras haya separadores.
#[derive(Debug, Default)]
pub struct BlobStreamDecoder {
    buffer: Vec<u8>,
}

impl BlobStreamDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Agrega bytes y devuelve los artefactos completos encontrados.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Artifact> {
        self.buffer.extend_from_slice(chunk);

        let mut artifacts = Vec::new();
        while let Some(sep_index) = find_subslice(&self.buffer, BLOB_SEPARATOR) {
            let consumed: Vec<u8> = self
                .buffer
                .drain(..sep_index + BLOB_SEPARATOR.len())
                .collect();
            let frame = &consumed[..sep_index];

            // Frames sin delimitador header/cuerpo se saltan.
            if let Some(artifact) = decode_frame(frame) {
                artifacts.push(artifact);
            }
        }

        artifacts
    }

    /// Cierra el stream. El protocolo exige separador también después del
    /// último artefacto: si quedan bytes sin consumir el stream vino
    /// truncado, y eso se reporta en vez de tirarlo en silencio.
    pub fn finish(self) -> Result<(), ComfyError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(ComfyError::MalformedStream(self.buffer.len()))
        }
    }
}

/// Corta un frame en header y cuerpo; el content-type sale de partir el
/// header en el primer ": ".
fn decode_frame(frame: &[u8]) -> Option<Artifact> {
    let header_end = find_subslice(frame, HEADER_END)?;
    let header = String::from_utf8_lossy(&frame[..header_end]);
    let (_, content_type) = header.split_once(": ")?;

    Some(Artifact {
        content_type: content_type.to_string(),
        data: frame[header_end + HEADER_END.len()..].to_vec(),
    })
}

/// Búsqueda ingenua de subsecuencia byte a byte.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(content_type: &str, data: &[u8]) -> Artifact {
        Artifact {
            content_type: content_type.to_string(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn decodifica_dos_artefactos_en_orden() {
        let mut stream = Vec::new();
        stream.extend_from_slice(b"Content-Type: image/png\r\n\r\ncuerpo1");
        stream.extend_from_slice(BLOB_SEPARATOR);
        stream.extend_from_slice(b"Content-Type: video/mp4\r\n\r\ncuerpo2");
        stream.extend_from_slice(BLOB_SEPARATOR);

        let mut decoder = BlobStreamDecoder::new();
        let artifacts = decoder.feed(&stream);
        decoder.finish().unwrap();

        assert_eq!(
            artifacts,
            vec![
                artifact("image/png", b"cuerpo1"),
                artifact("video/mp4", b"cuerpo2"),
            ]
        );
    }

    #[test]
    fn roundtrip_con_0_1_y_5_artefactos() {
        for n in [0usize, 1, 5] {
            let originals: Vec<Artifact> = (0..n)
                .map(|i| artifact("image/png", format!("imagen-{i}").as_bytes()))
                .collect();

            let encoded = encode_artifacts(&originals);

            let mut decoder = BlobStreamDecoder::new();
            let decoded = decoder.feed(&encoded);
            decoder.finish().unwrap();

            assert_eq!(decoded, originals, "roundtrip con n={n}");
        }
    }

    #[test]
    fn tolera_chunks_cortados_en_medio_del_separador() {
        let encoded = encode_artifacts(&[artifact("text/plain", b"hola")]);
        // Cortamos justo adentro del separador final.
        let cut = encoded.len() - 5;

        let mut decoder = BlobStreamDecoder::new();
        assert!(decoder.feed(&encoded[..cut]).is_empty());
        let decoded = decoder.feed(&encoded[cut..]);

        assert_eq!(decoded, vec![artifact("text/plain", b"hola")]);
        decoder.finish().unwrap();
    }

    #[test]
    fn bytes_sin_separador_final_son_stream_mal_formado() {
        let mut decoder = BlobStreamDecoder::new();
        decoder.feed(b"Content-Type: image/png\r\n\r\ntruncado");

        let err = decoder.finish().unwrap_err();
        assert!(matches!(err, ComfyError::MalformedStream(_)));
    }

    #[test]
    fn frame_sin_delimitador_de_header_se_salta() {
        let mut stream = b"sin header aca".to_vec();
        stream.extend_from_slice(BLOB_SEPARATOR);
        stream.extend_from_slice(b"Content-Type: image/png\r\n\r\nok");
        stream.extend_from_slice(BLOB_SEPARATOR);

        let mut decoder = BlobStreamDecoder::new();
        let artifacts = decoder.feed(&stream);

        assert_eq!(artifacts, vec![artifact("image/png", b"ok")]);
    }
}
