//! Lookup and recombination facade used by `CounterProducer`/`PipelineBuilder`.

use crate::operator::{AggregationOperator, PartialAggregate};
use anyhow::{Result, bail};
use factum_types::FactValue;

/// Resolves operator keys from counter-attribute config and runs the
/// accumulate/merge/finalize steps against them.
///
/// The operator set is fixed (`$sum`, `$avg`, `$min`, `$max`, `$addToSet`),
/// so unlike the teacher's dynamically registered calculator plugins this
/// holds no state of its own — it exists so callers depend on one name
/// (`AggregationRegistry`) rather than reaching into `AggregationOperator`
/// directly, and so a config-time typo in an operator key produces one
/// consistent error message.
#[derive(Debug, Default, Clone, Copy)]
pub struct AggregationRegistry;

impl AggregationRegistry {
    /// Construct a registry. Exists for symmetry with call sites that hold
    /// it as a field; carries no state.
    pub fn new() -> Self {
        Self
    }

    /// Resolve a config-facing operator key, e.g. `"$sum"`.
    pub fn resolve(&self, op_key: &str) -> Result<AggregationOperator> {
        AggregationOperator::from_key(op_key)
            .ok_or_else(|| anyhow::anyhow!("unknown aggregation operator '{op_key}'"))
    }

    /// Fold a sequence of values into a fresh accumulator for `op_key`.
    pub fn accumulate_all<'a>(
        &self,
        op_key: &str,
        values: impl IntoIterator<Item = &'a FactValue>,
    ) -> Result<PartialAggregate> {
        let op = self.resolve(op_key)?;
        let mut state = op.empty();
        for value in values {
            op.accumulate(&mut state, value);
        }
        Ok(state)
    }

    /// Recombine the partial aggregates computed per split-counter part.
    pub fn merge(&self, op_key: &str, parts: &[PartialAggregate]) -> Result<PartialAggregate> {
        let op = self.resolve(op_key)?;
        if parts.is_empty() {
            bail!("cannot merge zero parts for operator '{op_key}'");
        }
        Ok(op.merge(parts))
    }

    /// Produce the externally visible value for an accumulator.
    pub fn finalize(&self, op_key: &str, state: &PartialAggregate) -> Result<FactValue> {
        self.resolve(op_key)?;
        Ok(state.finalize())
    }
}
