//! Batch transfer pipeline.
//!
//! A run enumerates the items of a [`Source`], fetches each one, expands it
//! into units and publishes every unit to the destination store under a key
//! derived from the run date. All of it runs concurrently on a
//! [`TaskGroup`], and [`run`] returns only after the last unit has finished.
//!
//! Two sources are provided: [`ArchiveSource`] republishes the entries of zip
//! archives already in the store, and [`TreeSource`] mirrors the files of a
//! remote tree.

pub mod error;
mod group;
mod key;
mod policy;
mod publish;
mod run;
mod source;

pub use crate::group::{Completion, TaskGroup};
pub use crate::key::{ArchiveKeys, DATE_PLACEHOLDER, MirrorKeys, RunDate};
pub use crate::policy::{Policies, Policy, Stage};
pub use crate::publish::Publisher;
pub use crate::run::{RunOptions, RunSummary, Tally, run};
pub use crate::source::{ArchiveSource, ItemStream, Source, SourceItem, TreeSource, Unit};
