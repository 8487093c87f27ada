// src/services/mod.rs
pub mod ingestion;
pub mod publication;

pub use ingestion::PdfIngestor;
pub use publication::WebhookPublisher;
