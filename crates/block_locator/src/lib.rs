//! Timestamp-to-block resolution for append-only numbered timelines.
//!
//! This crate exposes:
//! - The record model and fetch capability: [`Record`], [`RecordSource`]
//! - The locator: [`BlockLocator::ensure_boundaries`], [`BlockLocator::resolve`],
//!   [`BlockLocator::resolve_all`], plus the RFC 3339 helpers
//!   [`BlockLocator::resolve_date`] and [`BlockLocator::block_date`]
//! - Tie-break policies: [`TieBreak`]
//!
//! The locator seeds a guess from the mean spacing over the whole range, then
//! refines it with secant steps taken from the two most recent probes. Every
//! probe tightens a bracket around the target so the search always terminates,
//! and every record is fetched at most once per locator.
pub mod error;
pub mod locator;
pub mod record;

pub use error::{LocatorError, SourceError};
pub use locator::{
    BlockLocator, Boundaries, DEFAULT_MAX_PROBES, LocatorConfig, Resolution, TieBreak,
};
pub use record::{Record, RecordSource};
