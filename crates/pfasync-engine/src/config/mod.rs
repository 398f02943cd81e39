//! Ingest configuration: YAML types, parsing with env substitution, validation.

pub mod parser;
pub mod types;
pub mod validator;
