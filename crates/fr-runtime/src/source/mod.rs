//! File-backed collaborators for running the engine standalone: telemetry
//! replay files, an ontology snapshot and rule definitions.

mod ontology;
mod rules;
mod telemetry;

pub use ontology::FileOntology;
pub use rules::load_rule_files;
pub use telemetry::{FileTelemetry, read_arrow_ipc, read_jsonl, read_telemetry_file};
