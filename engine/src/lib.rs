//! Cliente del engine ComfyUI: envío de workflows, seguimiento del resultado
//! por el canal de eventos WebSocket y descarga de artefactos.

pub mod channel;
pub mod client;

pub use channel::EventChannel;
pub use client::ComfyClient;
