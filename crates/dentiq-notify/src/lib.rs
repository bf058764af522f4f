//! Appointment-driven notification orchestration: channel selection,
//! message templating, and job creation on top of the durable store.

pub mod orchestrator;
pub mod templates;

pub use orchestrator::Orchestrator;
pub use templates::{Template, TemplateCatalog};
