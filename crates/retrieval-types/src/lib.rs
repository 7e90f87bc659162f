//! # retrieval-types
//!
//! Shared domain types for the descriptor retrieval system.
//!
//! This crate defines the core data structures used throughout the system:
//! - Descriptors: Identifier-keyed feature vectors
//! - Classifications: Per-label confidence scores for one descriptor
//! - Settings: Layered configuration for pipelines and indexes
//! - Errors: The shared failure taxonomy
//!
//! ## Usage
//!
//! ```rust
//! use retrieval_types::{Descriptor, DescriptorId};
//!
//! let d = Descriptor::new("a", vec![1.0, 2.0]);
//! assert_eq!(d.id, DescriptorId::from("a"));
//! ```

pub mod classification;
pub mod config;
pub mod descriptor;
pub mod error;

pub use classification::Classification;
pub use config::{IndexSettings, ParallelSettings, ProgressSettings, Settings};
pub use descriptor::{Descriptor, DescriptorId};
pub use error::RetrievalError;
