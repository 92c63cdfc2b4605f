//! Ordered batches of session primitives.
//!
//! Build a [`Batch`] from [`Descriptor`]s in code, or parse one from JSON
//! with [`parse_batch`], then run it with a [`BatchExecutor`].

mod descriptor;
mod executor;
mod wire;

pub use descriptor::{Batch, Command, Descriptor, StepCallback};
pub use executor::{BatchExecutor, BatchReport, StepRecord};
pub use wire::{ParsedBatch, WireError, parse_batch, result_to_json};
