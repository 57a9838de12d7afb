//! Core engine: the scan → detect → size → execute cycle.

pub mod accountant;
pub mod adaptive;
pub mod executor;
pub mod orchestrator;
pub mod scanner;
pub mod signals;
