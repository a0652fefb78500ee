use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{extract_prompt, scan_outputs, BlobStreamDecoder, PromptText, Workflow, WorkflowInput};
use engine::ComfyClient;

/// URL base del gateway.
/// - En Docker: GATEWAY_URL=http://gateway:8080
/// - Local: default http://localhost:8080
fn gateway_base_url() -> String {
    std::env::var("GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

/// Directorio local donde quedan las imágenes generadas.
/// Igual que en el gateway: COMFY_OUTPUT_DIR o ./comfy/output.
fn default_output_dir() -> PathBuf {
    std::env::var("COMFY_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("comfy").join("output"))
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con ComfyUI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un workflow y descarga los artefactos generados
    Submit {
        /// Ruta al workflow en formato API (JSON)
        #[arg(value_name = "WORKFLOW_JSON")]
        workflow: PathBuf,

        /// Input a aplicar, formato "node_id/campo=valor", ej: "6/text=un gato"
        #[arg(long = "set", value_name = "CLAVE=VALOR")]
        sets: Vec<String>,

        /// Directorio donde guardar los artefactos descargados
        #[arg(long, default_value = "./descargas")]
        output_dir: PathBuf,

        /// Host:puerto de ComfyUI (pisa COMFYUI_API_URL)
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Genera vía el gateway y decodifica el stream de artefactos
    Generate {
        /// Ruta al workflow en formato API (JSON)
        #[arg(value_name = "WORKFLOW_JSON")]
        workflow: PathBuf,

        /// Input a aplicar, formato "node_id/campo=valor"
        #[arg(long = "set", value_name = "CLAVE=VALOR")]
        sets: Vec<String>,

        /// Directorio donde guardar los artefactos decodificados
        #[arg(long, default_value = "./descargas")]
        output_dir: PathBuf,
    },
    /// Lista las imágenes generadas con su prompt recuperado
    Outputs {
        /// Directorio de salida a escanear
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Muestra el prompt embebido en una imagen PNG
    Prompt {
        #[arg(value_name = "IMAGEN_PNG")]
        file: PathBuf,
    },
}

/// Parsea "node_id/campo=valor" a un input. El valor se intenta como JSON
/// (números, booleanos) y si no parsea queda como string.
fn parse_set(raw: &str) -> Result<WorkflowInput> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("input inválido (se espera clave=valor): {raw}");
    };

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    Ok(WorkflowInput {
        key: key.to_string(),
        value,
    })
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            workflow,
            sets,
            output_dir,
            endpoint,
        } => {
            let raw = fs::read_to_string(&workflow)
                .with_context(|| format!("no se pudo leer {}", workflow.display()))?;
            let workflow: Workflow =
                serde_json::from_str(&raw).context("el workflow no es JSON válido")?;

            let inputs = sets
                .iter()
                .map(|s| parse_set(s))
                .collect::<Result<Vec<_>>>()?;

            let client = ComfyClient::connect(endpoint).await?;
            println!(
                "Conectado a {} (client_id {})",
                client.base_url(),
                client.client_id()
            );

            let outcome = client.run_workflow(workflow, &inputs).await?;
            println!("Prompt {} terminado:", outcome.prompt_id);
            println!("  archivos: {}", outcome.files.len());

            fs::create_dir_all(&output_dir)?;
            for file in &outcome.files {
                let artifact = client.fetch_output(file).await?;
                let destination = output_dir.join(&file.filename);
                fs::write(&destination, &artifact.data)?;
                println!(
                    "  - {} ({}, {} bytes)",
                    destination.display(),
                    artifact.content_type,
                    artifact.data.len()
                );
            }
        }

        Commands::Generate {
            workflow,
            sets,
            output_dir,
        } => {
            let raw = fs::read_to_string(&workflow)
                .with_context(|| format!("no se pudo leer {}", workflow.display()))?;
            let workflow: Workflow =
                serde_json::from_str(&raw).context("el workflow no es JSON válido")?;

            let inputs = sets
                .iter()
                .map(|s| parse_set(s))
                .collect::<Result<Vec<_>>>()?;

            let url = format!("{}/api/v1/generations", gateway_base_url());
            let client = reqwest::Client::new();
            let mut response = client
                .post(&url)
                .json(&serde_json::json!({ "workflow": workflow, "inputs": inputs }))
                .send()
                .await?;

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("el gateway devolvió error: {body}");
            }

            // El cuerpo viene como stream multi-artefacto; se decodifica
            // según van llegando los chunks.
            let mut decoder = BlobStreamDecoder::new();
            let mut artifacts = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                artifacts.extend(decoder.feed(&chunk));
            }
            decoder.finish()?;

            fs::create_dir_all(&output_dir)?;
            println!("Generación terminada: {} artefacto(s)", artifacts.len());
            for (i, artifact) in artifacts.iter().enumerate() {
                let extension = artifact
                    .content_type
                    .split('/')
                    .next_back()
                    .unwrap_or("bin");
                let destination = output_dir.join(format!("artefacto-{i}.{extension}"));
                fs::write(&destination, &artifact.data)?;
                println!(
                    "  - {} ({}, {} bytes)",
                    destination.display(),
                    artifact.content_type,
                    artifact.data.len()
                );
            }
        }

        Commands::Outputs { dir } => {
            let dir = dir.unwrap_or_else(default_output_dir);
            let outputs = scan_outputs(&dir)?;

            if outputs.is_empty() {
                println!("No hay imágenes en {}", dir.display());
            } else {
                for output in outputs {
                    println!("{}", output.name);
                    println!("  creado : {}", output.created);
                    println!("  tamaño : {} bytes", output.size);
                    match output.prompt {
                        Some(prompt) => println!("  prompt : {}", prompt),
                        None => println!("  prompt : (no recuperado)"),
                    }
                }
            }
        }

        Commands::Prompt { file } => {
            let bytes = fs::read(&file)
                .with_context(|| format!("no se pudo leer {}", file.display()))?;

            match extract_prompt(&bytes) {
                PromptText::Found(text) => println!("{text}"),
                PromptText::RawFallback(text) => {
                    println!("(texto crudo, el JSON embebido no parseó)");
                    println!("{text}");
                }
                PromptText::NotFound => println!("La imagen no trae prompt embebido."),
            }
        }
    }

    Ok(())
}
