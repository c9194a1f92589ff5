//! Frozen, compact representation of a partitioned contingency table.
//!
//! [`DataGridStats`] is the exchange format between the univariate
//! preparation stage and the in-memory [`DataGrid`](crate::grid::DataGrid):
//! an immutable set of univariate partitions plus a flat, row-major vector of
//! cell frequencies.

use crate::error::{Error, Result};
use crate::symbol::Symbol;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Univariate partition of a single attribute.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum AttributePartition {
    /// Intervals described by their `part_count - 1` interior bounds, sorted
    /// increasingly. The first part is `]-inf, bounds[0]]`, the last
    /// `]bounds[n-2], +inf]`.
    Discretization {
        /// Interior interval bounds.
        bounds: Vec<f64>,
    },
    /// Singleton parts, one per observed value, sorted increasingly. Interval
    /// bounds are synthesized as midpoints of successive values on import.
    ContinuousValues {
        /// Observed values.
        values: Vec<f64>,
    },
    /// Groups of symbols. `groups[g]` is the `[first, last]` index range of
    /// group `g` into `values`. The star value, if present, marks the
    /// catch-all group.
    Grouping {
        /// Value array the group ranges index into.
        values: Vec<Symbol>,
        /// Per-group `[first, last]` value index ranges.
        groups: Vec<[usize; 2]>,
        /// Index of the distinguished garbage group, if any.
        garbage_group: Option<usize>,
    },
    /// Singleton groups, one per distinct symbol, star value excluded. A
    /// star singleton is appended to the last part on import as the default
    /// part.
    SymbolValues {
        /// Distinct symbols.
        values: Vec<Symbol>,
    },
}

impl AttributePartition {
    /// Number of parts of the partition.
    #[must_use]
    pub fn part_count(&self) -> usize {
        match self {
            Self::Discretization { bounds } => bounds.len() + 1,
            Self::ContinuousValues { values } => values.len(),
            Self::Grouping { groups, .. } => groups.len(),
            Self::SymbolValues { values } => values.len(),
        }
    }

    /// Returns `true` if every part holds a single value.
    #[must_use]
    pub const fn are_parts_singletons(&self) -> bool {
        matches!(
            self,
            Self::ContinuousValues { .. } | Self::SymbolValues { .. }
        )
    }

    /// Returns `true` for the continuous partition kinds.
    #[must_use]
    pub const fn is_continuous(&self) -> bool {
        matches!(
            self,
            Self::Discretization { .. } | Self::ContinuousValues { .. }
        )
    }

    /// Index of the part containing `value` for a symbolic partition.
    ///
    /// Unknown values fall back to the star group of a [`Self::Grouping`];
    /// for [`Self::SymbolValues`] an unknown value has no part and `None` is
    /// returned.
    #[must_use]
    pub fn symbol_part_index(&self, value: &Symbol) -> Option<usize> {
        match self {
            Self::Grouping { values, groups, .. } => {
                let mut star_group = None;
                for (group_index, range) in groups.iter().enumerate() {
                    for symbol in &values[range[0]..=range[1]] {
                        if symbol == value {
                            return Some(group_index);
                        }
                        if symbol.is_star() {
                            star_group = Some(group_index);
                        }
                    }
                }
                star_group
            }
            Self::SymbolValues { values } => values.iter().position(|symbol| symbol == value),
            Self::Discretization { .. } | Self::ContinuousValues { .. } => None,
        }
    }

    fn check(&self) -> Result<()> {
        match self {
            Self::Discretization { bounds } => {
                if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
                    return Err(Error::InvariantViolation(
                        "discretization bounds must be strictly increasing".into(),
                    ));
                }
            }
            Self::ContinuousValues { values } => {
                if values.is_empty() {
                    return Err(Error::InvariantViolation(
                        "continuous value partition must hold at least one value".into(),
                    ));
                }
                if values.windows(2).any(|pair| pair[0] >= pair[1]) {
                    return Err(Error::InvariantViolation(
                        "continuous values must be strictly increasing".into(),
                    ));
                }
            }
            Self::Grouping { values, groups, garbage_group } => {
                if groups.is_empty() {
                    return Err(Error::InvariantViolation(
                        "grouping must hold at least one group".into(),
                    ));
                }
                let mut expected_first = 0;
                for (group_index, range) in groups.iter().enumerate() {
                    if range[0] != expected_first || range[1] < range[0] || range[1] >= values.len()
                    {
                        return Err(Error::InvariantViolation(format!(
                            "group {group_index} has an invalid value range"
                        )));
                    }
                    expected_first = range[1] + 1;
                }
                if expected_first != values.len() {
                    return Err(Error::InvariantViolation(
                        "groups must cover the whole value array".into(),
                    ));
                }
                if values.iter().filter(|value| value.is_star()).count() > 1 {
                    return Err(Error::InvariantViolation(
                        "the star value must appear in at most one group".into(),
                    ));
                }
                if garbage_group.is_some_and(|group| group >= groups.len()) {
                    return Err(Error::InvariantViolation(
                        "garbage group index out of range".into(),
                    ));
                }
            }
            Self::SymbolValues { values } => {
                if values.is_empty() {
                    return Err(Error::InvariantViolation(
                        "symbol value partition must hold at least one value".into(),
                    ));
                }
                if values.iter().any(Symbol::is_star) {
                    return Err(Error::InvariantViolation(
                        "the star value is implicit in a singleton partition".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One attribute of a frozen grid: its name, partition and value counts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AttributeStats {
    /// Attribute name, unique within the grid.
    pub name: String,
    /// Univariate partition of the attribute.
    pub partition: AttributePartition,
    /// Number of distinct values before granularization.
    pub initial_value_count: u64,
    /// Number of distinct values kept by granularization.
    pub granularized_value_count: u64,
}

impl AttributeStats {
    /// Constructs an attribute description with value counts defaulted to the
    /// partition size.
    #[must_use]
    pub fn new(name: impl Into<String>, partition: AttributePartition) -> Self {
        let part_count = partition.part_count() as u64;
        Self {
            name: name.into(),
            partition,
            initial_value_count: part_count,
            granularized_value_count: part_count,
        }
    }
}

/// Compact, immutable representation of a partitioned multidimensional
/// contingency table.
///
/// Attributes are ordered source-first: the first `source_attribute_count`
/// attributes are sources, the optional single remaining attribute is the
/// target. Cell frequencies are stored row-major over the per-attribute part
/// counts (last attribute fastest).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DataGridStats {
    attributes: Vec<AttributeStats>,
    target_attribute_count: usize,
    granularity: usize,
    cell_frequencies: Vec<u64>,
}

impl DataGridStats {
    /// Constructs an empty-frequency grid over `attributes`. When
    /// `target_attribute_count` is 1, the last attribute is the target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if a partition is malformed or
    /// `target_attribute_count` exceeds 1, and [`Error::Configuration`] if
    /// the dense cell array would be too large.
    pub fn new(
        attributes: Vec<AttributeStats>,
        target_attribute_count: usize,
        granularity: usize,
    ) -> Result<Self> {
        if target_attribute_count > 1 || target_attribute_count > attributes.len() {
            return Err(Error::InvariantViolation(
                "at most one target attribute is allowed".into(),
            ));
        }
        for attribute in &attributes {
            attribute.partition.check()?;
        }
        let mut total_size = 1usize;
        for attribute in &attributes {
            total_size = total_size
                .checked_mul(attribute.partition.part_count())
                .filter(|&size| size <= MAX_DENSE_CELLS)
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "dense cell array over {} parts is too large",
                        attributes.len()
                    ))
                })?;
        }
        Ok(Self {
            attributes,
            target_attribute_count,
            granularity,
            cell_frequencies: vec![0; total_size],
        })
    }

    /// Number of attributes, target included.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Number of source attributes.
    #[must_use]
    pub fn source_attribute_count(&self) -> usize {
        self.attributes.len() - self.target_attribute_count
    }

    /// Number of target attributes, 0 or 1.
    #[must_use]
    pub const fn target_attribute_count(&self) -> usize {
        self.target_attribute_count
    }

    /// Index of the target attribute.
    ///
    /// Meaningful only when [`Self::target_attribute_count`] is 1.
    #[must_use]
    pub fn first_target_attribute_index(&self) -> usize {
        self.source_attribute_count()
    }

    /// Granularity the partitions were computed at, 0 when unused.
    #[must_use]
    pub const fn granularity(&self) -> usize {
        self.granularity
    }

    /// Attribute description at `index`.
    #[must_use]
    pub fn attribute_at(&self, index: usize) -> &AttributeStats {
        &self.attributes[index]
    }

    /// Total number of cells of the dense grid.
    #[must_use]
    pub fn total_grid_size(&self) -> usize {
        self.cell_frequencies.len()
    }

    /// Product of the source attributes' part counts.
    #[must_use]
    pub fn source_grid_size(&self) -> usize {
        self.attributes[..self.source_attribute_count()]
            .iter()
            .map(|attribute| attribute.partition.part_count())
            .product()
    }

    /// Product of the target attributes' part counts.
    #[must_use]
    pub fn target_grid_size(&self) -> usize {
        self.attributes[self.source_attribute_count()..]
            .iter()
            .map(|attribute| attribute.partition.part_count())
            .product()
    }

    /// Sets the frequency of the cell addressed by `part_indexes`.
    pub fn set_cell_frequency(&mut self, part_indexes: &[usize], frequency: u64) {
        let cell = self.ravel(part_indexes);
        self.cell_frequencies[cell] = frequency;
    }

    /// Frequency of the cell addressed by `part_indexes`.
    #[must_use]
    pub fn cell_frequency_at(&self, part_indexes: &[usize]) -> u64 {
        self.cell_frequencies[self.ravel(part_indexes)]
    }

    /// Converts a flat cell index into per-attribute part indexes.
    pub fn compute_part_indexes(&self, mut cell_index: usize, part_indexes: &mut Vec<usize>) {
        assert!(cell_index < self.total_grid_size());
        part_indexes.clear();
        part_indexes.resize(self.attributes.len(), 0);
        for (slot, attribute) in part_indexes.iter_mut().zip(&self.attributes).rev() {
            let part_count = attribute.partition.part_count();
            *slot = cell_index % part_count;
            cell_index /= part_count;
        }
    }

    /// Sum of all cell frequencies.
    #[must_use]
    pub fn compute_grid_frequency(&self) -> u64 {
        self.cell_frequencies.iter().sum()
    }

    /// Per-part frequencies of the attribute at `attribute_index`, by summing
    /// cells over the other dimensions.
    #[must_use]
    pub fn export_attribute_part_frequencies(&self, attribute_index: usize) -> Vec<u64> {
        let mut frequencies = vec![0; self.attributes[attribute_index].partition.part_count()];
        let mut part_indexes = Vec::new();
        for cell_index in 0..self.total_grid_size() {
            let frequency = self.cell_frequencies[cell_index];
            if frequency > 0 {
                self.compute_part_indexes(cell_index, &mut part_indexes);
                frequencies[part_indexes[attribute_index]] += frequency;
            }
        }
        frequencies
    }

    /// Validates the internal consistency of the frozen grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] naming the offending attribute.
    pub fn check(&self) -> Result<()> {
        for attribute in &self.attributes {
            attribute.partition.check().map_err(|error| {
                Error::InvariantViolation(format!("attribute '{}': {error}", attribute.name))
            })?;
        }
        if let Some(name) = self
            .attributes
            .iter()
            .map(|attribute| attribute.name.as_str())
            .duplicates()
            .next()
        {
            return Err(Error::InvariantViolation(format!(
                "duplicate attribute name '{name}'"
            )));
        }
        let expected_size: usize = self
            .attributes
            .iter()
            .map(|attribute| attribute.partition.part_count())
            .product();
        if expected_size != self.cell_frequencies.len() {
            return Err(Error::InvariantViolation(
                "cell frequency array does not match the partition product".into(),
            ));
        }
        Ok(())
    }

    /// Deserializes a frozen grid from `reader`.
    ///
    /// # Errors
    ///
    /// If reading from the stream or decoding fails an error is returned.
    pub fn read(reader: impl Read) -> anyhow::Result<Self> {
        let stats: Self = bincode::deserialize_from(reader)?;
        stats.check()?;
        Ok(stats)
    }

    /// Serializes `self` into `writer`. Writing is not buffered.
    ///
    /// # Errors
    ///
    /// If writing fails an error is returned.
    pub fn write(&self, writer: impl Write) -> anyhow::Result<()> {
        Ok(bincode::serialize_into(writer, self)?)
    }

    fn ravel(&self, part_indexes: &[usize]) -> usize {
        assert_eq!(part_indexes.len(), self.attributes.len());
        part_indexes
            .iter()
            .zip(&self.attributes)
            .fold(0, |flat_index, (&part, attribute)| {
                let part_count = attribute.partition.part_count();
                assert!(part < part_count);
                flat_index * part_count + part
            })
    }
}

// dense cell arrays are only used for prepared (low-dimensional) grids
const MAX_DENSE_CELLS: usize = 1 << 28;

/// Interval bound synthesized between two successive observed values.
#[must_use]
pub(crate) fn bound_between(lower_value: f64, upper_value: f64) -> f64 {
    debug_assert!(lower_value < upper_value);
    0.5 * (lower_value + upper_value)
}
