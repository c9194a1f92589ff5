//! Prepared attributes: frozen univariate partitions together with their
//! precomputed conditional log-probability tables.

use crate::error::{Error, Result};
use crate::grid_stats::DataGridStats;
use crate::symbol::Symbol;
use ndarray::Array2;

/// Description of the training target.
#[derive(Clone, Debug)]
pub enum TargetDescription {
    /// Symbolic target with one known frequency per value. `grouped` selects
    /// the generalized classifier, whose univariate estimators may group the
    /// target values.
    Classes {
        /// Target values, in target-index order.
        values: Vec<Symbol>,
        /// Frequency of each target value in the training data.
        frequencies: Vec<u64>,
        /// Whether the univariate target partitions group the values.
        grouped: bool,
    },
    /// Continuous target encoded by ranks: the target index of an instance
    /// is its rank in the training data.
    Ranks {
        /// Number of training instances.
        instance_count: u64,
    },
}

impl TargetDescription {
    /// Number of training instances implied by the target description.
    #[must_use]
    pub fn instance_count(&self) -> u64 {
        match self {
            Self::Classes { frequencies, .. } => frequencies.iter().sum(),
            Self::Ranks { instance_count } => *instance_count,
        }
    }

    /// Number of target values, or the instance count for a rank target.
    #[must_use]
    pub fn value_count(&self) -> usize {
        match self {
            Self::Classes { values, .. } => values.len(),
            Self::Ranks { instance_count } => *instance_count as usize,
        }
    }
}

/// A prepared attribute: a bivariate (source x target) frozen grid plus the
/// table of log P(source part | target part).
#[derive(Clone, Debug)]
pub struct PreparedAttribute {
    name: String,
    grid_stats: DataGridStats,
    ln_cond_probs: Array2<f64>,
    sort_value: f64,
    construction_cost: f64,
    null_construction_cost: f64,
    preparation_cost: f64,
}

impl PreparedAttribute {
    /// Builds a prepared attribute from its bivariate frozen grid.
    ///
    /// The conditional probabilities are smoothed with an epsilon of `1/N`,
    /// which protects empty cells while barely disturbing the estimates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] unless `grid_stats` holds
    /// exactly one source and one target attribute with positive frequency.
    pub fn new(grid_stats: DataGridStats) -> Result<Self> {
        grid_stats.check()?;
        if grid_stats.attribute_count() != 2 || grid_stats.target_attribute_count() != 1 {
            return Err(Error::InvariantViolation(
                "a prepared attribute needs one source and one target attribute".into(),
            ));
        }
        let grid_frequency = grid_stats.compute_grid_frequency();
        if grid_frequency == 0 {
            return Err(Error::InvariantViolation(
                "a prepared attribute needs a positive grid frequency".into(),
            ));
        }

        let source_part_count = grid_stats.attribute_at(0).partition.part_count();
        let target_part_count = grid_stats.attribute_at(1).partition.part_count();
        let target_frequencies = grid_stats.export_attribute_part_frequencies(1);

        let epsilon = 1.0 / grid_frequency as f64;
        let mut ln_cond_probs = Array2::zeros((source_part_count, target_part_count));
        for source in 0..source_part_count {
            for target in 0..target_part_count {
                let joint = grid_stats.cell_frequency_at(&[source, target]) as f64;
                let marginal = target_frequencies[target] as f64;
                ln_cond_probs[[source, target]] =
                    ((joint + epsilon) / epsilon.mul_add(source_part_count as f64, marginal)).ln();
            }
        }

        Ok(Self {
            name: grid_stats.attribute_at(0).name.clone(),
            grid_stats,
            ln_cond_probs,
            sort_value: 0.0,
            construction_cost: 0.0,
            null_construction_cost: 0.0,
            preparation_cost: 0.0,
        })
    }

    /// Name of the underlying source attribute.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bivariate frozen grid the attribute was prepared from.
    #[must_use]
    pub const fn grid_stats(&self) -> &DataGridStats {
        &self.grid_stats
    }

    /// Number of source parts, i.e. of distinct recoding indices.
    #[must_use]
    pub fn source_part_count(&self) -> usize {
        self.grid_stats.attribute_at(0).partition.part_count()
    }

    /// Number of target parts of the univariate estimator.
    #[must_use]
    pub fn target_part_count(&self) -> usize {
        self.grid_stats.attribute_at(1).partition.part_count()
    }

    /// log P(source part = `source` | target part = `target`).
    #[must_use]
    pub fn ln_source_conditional_prob(&self, source: usize, target: usize) -> f64 {
        self.ln_cond_probs[[source, target]]
    }

    /// Per-part frequencies of the univariate target partition.
    #[must_use]
    pub fn target_part_frequencies(&self) -> Vec<u64> {
        self.grid_stats.export_attribute_part_frequencies(1)
    }

    /// Maps each target value to the index of its group in this attribute's
    /// univariate target partition.
    ///
    /// # Panics
    ///
    /// Panics if a target value belongs to no group and the partition has no
    /// star group to fall back to.
    #[must_use]
    pub fn target_group_matching(&self, target_values: &[Symbol]) -> Vec<usize> {
        let partition = &self.grid_stats.attribute_at(1).partition;
        target_values
            .iter()
            .map(|value| {
                partition
                    .symbol_part_index(value)
                    .expect("target value missing from the univariate target partition")
            })
            .collect()
    }

    /// Univariate importance used to order attributes.
    #[must_use]
    pub const fn sort_value(&self) -> f64 {
        self.sort_value
    }

    /// Replaces the univariate importance.
    pub fn set_sort_value(&mut self, sort_value: f64) {
        self.sort_value = sort_value;
    }

    /// Cost of constructing the attribute, in nats.
    #[must_use]
    pub const fn construction_cost(&self) -> f64 {
        self.construction_cost
    }

    /// Construction cost of the null model for this attribute, in nats.
    #[must_use]
    pub const fn null_construction_cost(&self) -> f64 {
        self.null_construction_cost
    }

    /// Replaces the construction costs.
    pub fn set_construction_costs(&mut self, construction_cost: f64, null_construction_cost: f64) {
        self.construction_cost = construction_cost;
        self.null_construction_cost = null_construction_cost;
    }

    /// Cost of the univariate preparation model, in nats.
    #[must_use]
    pub const fn preparation_cost(&self) -> f64 {
        self.preparation_cost
    }

    /// Replaces the preparation cost.
    pub fn set_preparation_cost(&mut self, preparation_cost: f64) {
        self.preparation_cost = preparation_cost;
    }
}

/// The set of prepared attributes available to the selection, together with
/// the target description.
#[derive(Clone, Debug)]
pub struct DataPreparationClass {
    attributes: Vec<PreparedAttribute>,
    target: TargetDescription,
    instance_count: u64,
    null_preparation_cost: f64,
}

impl DataPreparationClass {
    /// Constructs an empty preparation class for the given target.
    #[must_use]
    pub fn new(target: TargetDescription) -> Self {
        let instance_count = target.instance_count();
        Self {
            attributes: Vec::new(),
            target,
            instance_count,
            null_preparation_cost: 0.0,
        }
    }

    /// Adds a prepared attribute and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] on a duplicate name or when the
    /// attribute was prepared over a different instance count.
    pub fn add_attribute(&mut self, attribute: PreparedAttribute) -> Result<usize> {
        if self
            .attributes
            .iter()
            .any(|existing| existing.name() == attribute.name())
        {
            return Err(Error::InvariantViolation(format!(
                "duplicate prepared attribute '{}'",
                attribute.name()
            )));
        }
        if attribute.grid_stats().compute_grid_frequency() != self.instance_count {
            return Err(Error::InvariantViolation(format!(
                "attribute '{}' was prepared over a different instance count",
                attribute.name()
            )));
        }
        self.attributes.push(attribute);
        Ok(self.attributes.len() - 1)
    }

    /// Number of prepared attributes.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Prepared attribute at `index`.
    #[must_use]
    pub fn attribute_at(&self, index: usize) -> &PreparedAttribute {
        &self.attributes[index]
    }

    /// Prepared attributes in order.
    pub fn attributes(&self) -> impl Iterator<Item = &PreparedAttribute> {
        self.attributes.iter()
    }

    /// Target description.
    #[must_use]
    pub const fn target(&self) -> &TargetDescription {
        &self.target
    }

    /// Number of training instances.
    #[must_use]
    pub const fn instance_count(&self) -> u64 {
        self.instance_count
    }

    /// Preparation cost of the null model, in nats.
    #[must_use]
    pub const fn null_preparation_cost(&self) -> f64 {
        self.null_preparation_cost
    }

    /// Replaces the null-model preparation cost.
    pub fn set_null_preparation_cost(&mut self, cost: f64) {
        self.null_preparation_cost = cost;
    }

    /// Indices of the attributes worth evaluating: more than one source part
    /// and strictly positive importance, sorted by decreasing importance and
    /// truncated to `max_evaluated` when positive.
    #[must_use]
    pub fn compute_usable_attributes(&self, max_evaluated: usize) -> Vec<usize> {
        let mut usable: Vec<usize> = (0..self.attributes.len())
            .filter(|&index| {
                let attribute = &self.attributes[index];
                attribute.source_part_count() > 1 && attribute.sort_value() > 0.0
            })
            .collect();
        usable.sort_by(|&left, &right| {
            self.attributes[right]
                .sort_value()
                .partial_cmp(&self.attributes[left].sort_value())
                .expect("sort values are never NaN")
                .then(left.cmp(&right))
        });
        if max_evaluated > 0 {
            usable.truncate(max_evaluated);
        }
        usable
    }
}
