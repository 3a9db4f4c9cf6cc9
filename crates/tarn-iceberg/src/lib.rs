//! # tarn-iceberg
//!
//! The Iceberg side of the catalog: table and view metadata structures,
//! the commit-time update state machine, and the JSON codec.
//!
//! This crate is the **codec boundary**: the versioned storage engine never
//! depends on it, and the catalog pipeline only talks to it through
//! [`codec::IcebergCodec`] and the update state machines. Additional table
//! formats plug in beside it without touching the engine.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod codec;
pub mod metadata;
pub mod state;
pub mod update;

pub use codec::{IcebergCodec, JsonIcebergCodec};
pub use metadata::{
    PartitionField, PartitionSpec, Schema, SchemaField, Snapshot, SnapshotLogEntry, SortField,
    SortOrder, TableMetadata, ViewMetadata, ViewRepresentation, ViewVersion,
};
pub use state::{TableUpdateState, ViewUpdateState};
pub use update::{MetadataUpdate, UpdateRequirement};
