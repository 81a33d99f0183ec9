//! Papersort: normalize, number, cluster and classify a folder of academic PDFs.

pub mod logging;
pub mod error;
pub mod utils;
pub mod settings;
pub mod cache;
pub mod pdf_text;
pub mod ai_client;
pub mod enrichment;
pub mod normalizer;
pub mod sequencer;
pub mod clustering;
pub mod classification;
pub mod mover;
pub mod pipeline;
