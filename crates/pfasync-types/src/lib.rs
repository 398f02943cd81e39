//! Shared data model for the pfasync ingestion pipeline.
//!
//! Pure data types used by the state backend and the engine. Kept in their
//! own crate so both sides share them without circular dependencies.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod batch;
pub mod dead_letter;
pub mod error;
pub mod ids;
pub mod lineage;
pub mod mapping;
pub mod record;
pub mod run;
