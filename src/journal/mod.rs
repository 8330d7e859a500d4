//! Run journal — plan fingerprints and the append-only JSONL event log.

pub mod eventlog;
pub mod hasher;
