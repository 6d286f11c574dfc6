pub mod arrow_ipc;
pub mod jsonl;
