#![doc = "collection-core: core logic library for collection-assembler."]

//! This crate contains the data models and pipelines that turn a collection manifest into
//! an assembled document collection: manifest loading and resolution, the document
//! registry, collection serialization, and cross-document reference rewriting.
//!
//! # Usage
//! Open a manifest with [`collection::CollectionAssembler::open`], then serialize or render
//! it, or borrow a [`xref::CrossReferenceResolver`] to finalize individual documents.

pub mod bibdata;
pub mod collection;
pub mod contract;
pub mod disambig;
pub mod error;
pub mod flavor;
pub mod load_manifest;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod xml;
pub mod xref;

pub use collection::{CollectionAssembler, RenderReport};
pub use contract::Hooks;
pub use error::{BuildWarning, CollectionError};
pub use manifest::{CollectionConfig, ManifestEntry};
