//! deltagraph-graph: Dgraph client for the chain mirror.
//!
//! This crate is the single mutation point for the graph store. Every schema
//! change, read and write flows through `GraphClient`, and every multi-statement
//! write is applied inside one Dgraph transaction.

pub mod client;
pub mod mutations;
pub mod queries;

pub use client::{AlterOp, DropScope, GraphClient, GraphConfig, GraphError};
pub use mutations::{check_predicate, Mutation, MutationResponse, Uid};
pub use queries::{SchemaField, SchemaType, SchemaTypes};
