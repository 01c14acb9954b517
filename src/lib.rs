//! # mpckmeans
//!
//! Semi-supervised k-means with pairwise constraints and metric learning.
//!
//! Instances are grouped into `k` clusters while must-link / cannot-link
//! pairs pull instances together or push them apart, and the distortion
//! measure itself is learned from the data and the constraints.
//!
//! ```ignore
//! use mpckmeans::builder::MpckMeansBuilder;
//! use mpckmeans::core::Dataset;
//! use mpck_core::constraints::LinkType;
//!
//! let data = Dataset::from_rows(rows)?;
//! let mut run = MpckMeansBuilder::new()
//!     .with_num_clusters(3)
//!     .with_constraint(0, 7, LinkType::MustLink)
//!     .with_constraint(2, 9, LinkType::CannotLink)
//!     .build(data)?;
//! let termination = run.run()?;
//! let labels = run.cluster_labels();
//! ```

pub mod assigner;
pub mod builder;
pub mod clustering;
pub mod core;
pub mod error;
pub mod initializer;
pub mod learner;
pub mod lp;

pub use mpck_core::constraints::LinkType;
pub use mpck_core::metric::MetricFamily;

#[cfg(test)]
mod tests;
