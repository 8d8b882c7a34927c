//! Aggregation-operator support for `factum`.
//!
//! `CounterDefinition` attributes each name one of five operators — `$sum`,
//! `$avg`, `$min`, `$max`, `$addToSet` — applied to a field read off every
//! relevant fact. This crate defines that operator set, the accumulator
//! state each one needs ([`PartialAggregate`]), and the merge step that lets
//! a counter evaluated in several time-bounded parts be recombined into the
//! single counter its definition describes.

#![warn(missing_docs)]

mod operator;
mod registry;

pub use operator::{AggregationOperator, AttributeSources, PartialAggregate};
pub use registry::AggregationRegistry;
