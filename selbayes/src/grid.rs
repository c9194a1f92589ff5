//! The data grid: a sparse multidimensional contingency structure.
//!
//! A [`DataGrid`] holds one [`Attribute`] per dimension and a set of
//! [`Cell`]s, each referencing one part per attribute and carrying joint
//! frequencies. Cells are threaded through one grid-level doubly-linked list
//! and one list per part of every attribute; all links are slab indices and
//! the per-part links are stored on the cells so a cell can unlink itself
//! from every list in constant time.
//!
//! Cells may only be created or deleted in *cell-update mode*, during which a
//! sorted index keyed by the part tuple enforces tuple uniqueness. Leaving
//! cell-update mode recomputes the cached per-part and per-grid statistics.

use crate::attribute::{Attribute, AttributeType, Interval, Part, Value};
use crate::error::{Error, Result};
use crate::grid_stats::{bound_between, AttributePartition, AttributeStats, DataGridStats};
use crate::symbol::Symbol;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt;

// entropy results below this are numerical noise
const ENTROPY_EPSILON: f64 = 1e-10;

const TARGET_NAME_PREFIX: &str = "Target";

/// One non-empty cell of the grid: a tuple of parts with its frequencies.
#[derive(Clone, Debug)]
pub struct Cell {
    parts: Vec<usize>,
    frequency: u64,
    target_frequencies: Vec<u64>,
    prev: Option<usize>,
    next: Option<usize>,
    part_prev: Vec<Option<usize>>,
    part_next: Vec<Option<usize>>,
}

impl Cell {
    fn new(parts: Vec<usize>, target_value_count: usize) -> Self {
        let attribute_count = parts.len();
        Self {
            parts,
            frequency: 0,
            target_frequencies: vec![0; target_value_count],
            prev: None,
            next: None,
            part_prev: vec![None; attribute_count],
            part_next: vec![None; attribute_count],
        }
    }

    /// Part index of the cell for `attribute`.
    #[must_use]
    pub fn part_at(&self, attribute: usize) -> usize {
        self.parts[attribute]
    }

    /// Part tuple of the cell.
    #[must_use]
    pub fn parts(&self) -> &[usize] {
        &self.parts
    }

    /// Total frequency of the cell.
    #[must_use]
    pub const fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Sets the total frequency. Only meaningful without target values.
    pub fn set_frequency(&mut self, frequency: u64) {
        debug_assert!(self.target_frequencies.is_empty());
        self.frequency = frequency;
    }

    /// Frequency of the cell for the target value at `target`.
    #[must_use]
    pub fn target_frequency_at(&self, target: usize) -> u64 {
        self.target_frequencies[target]
    }

    /// Adds `delta` to the frequency of target value `target` and to the
    /// total frequency.
    pub fn upgrade_target_frequency_at(&mut self, target: usize, delta: u64) {
        self.target_frequencies[target] += delta;
        self.frequency += delta;
    }

    /// Per-target-value frequencies, empty when the grid has no implicit
    /// target values.
    #[must_use]
    pub fn target_frequencies(&self) -> &[u64] {
        &self.target_frequencies
    }
}

/// A k-dimensional sparse contingency structure over partitioned attributes.
#[derive(Debug, Default)]
pub struct DataGrid {
    attributes: Vec<Attribute>,
    target_values: Vec<Symbol>,
    target_values_attribute_name: Option<String>,
    granularity: usize,
    cells: Vec<Option<Cell>>,
    free_cells: Vec<usize>,
    head_cell: Option<usize>,
    tail_cell: Option<usize>,
    cell_count: usize,
    cell_index: Option<BTreeMap<Vec<usize>, usize>>,
    grid_frequency: u64,
    ln_grid_size: f64,
    informative_attribute_count: usize,
    total_part_count: usize,
    sort_value: i64,
}

impl DataGrid {
    /// Constructs an empty grid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the grid to `attribute_count` empty attributes and
    /// `target_value_count` implicit target values.
    ///
    /// A strictly positive target value count corresponds to supervised
    /// classification without target value grouping; it is 0 otherwise,
    /// including when an explicit target attribute is used.
    pub fn initialize(&mut self, attribute_count: usize, target_value_count: usize) {
        *self = Self::default();
        self.attributes = (0..attribute_count)
            .map(|index| Attribute::new(format!("Var{}", index + 1), AttributeType::Symbol))
            .collect();
        self.target_values = vec![Symbol::default(); target_value_count];
    }

    /// Returns `true` if the grid is in its initial, empty state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.target_values.is_empty() && self.cell_count == 0
    }

    /// Number of attributes.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Number of implicit target values.
    #[must_use]
    pub fn target_value_count(&self) -> usize {
        self.target_values.len()
    }

    /// Sets the implicit target value at `target`.
    pub fn set_target_value_at(&mut self, target: usize, value: Symbol) {
        self.target_values[target] = value;
    }

    /// Implicit target value at `target`.
    #[must_use]
    pub fn target_value_at(&self, target: usize) -> &Symbol {
        &self.target_values[target]
    }

    /// Appends an attribute to a grid holding no cell and returns its index.
    pub fn add_attribute(&mut self) -> usize {
        assert_eq!(self.cell_count, 0, "attributes are fixed once cells exist");
        let index = self.attributes.len();
        self.attributes
            .push(Attribute::new(format!("Var{}", index + 1), AttributeType::Symbol));
        index
    }

    /// Attribute at `index`.
    #[must_use]
    pub fn attribute_at(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    /// Mutable attribute at `index`.
    pub fn attribute_at_mut(&mut self, index: usize) -> &mut Attribute {
        &mut self.attributes[index]
    }

    /// Index of the attribute named `name`, by exhaustive scan.
    #[must_use]
    pub fn search_attribute(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.name() == name)
    }

    /// Marks the attribute at `index` as the target. It must be the last
    /// attribute, and the grid must carry no implicit target values.
    pub fn set_target_attribute(&mut self, index: usize) {
        assert_eq!(index + 1, self.attributes.len(), "target must be last");
        assert!(
            self.target_values.is_empty(),
            "explicit target excludes implicit target values"
        );
        for attribute in &mut self.attributes {
            attribute.is_target = false;
        }
        self.attributes[index].is_target = true;
    }

    /// Index of the explicit target attribute, if any.
    #[must_use]
    pub fn target_attribute(&self) -> Option<usize> {
        self.attributes.iter().position(Attribute::is_target)
    }

    /// Index of the var-part attribute, if any.
    #[must_use]
    pub fn var_part_attribute(&self) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.attribute_type() == AttributeType::VarPart)
    }

    /// Returns `true` if one of the attributes is of var-part type.
    #[must_use]
    pub fn is_var_part_grid(&self) -> bool {
        self.var_part_attribute().is_some()
    }

    /// Granularity the grid was built at, 0 when unused.
    #[must_use]
    pub const fn granularity(&self) -> usize {
        self.granularity
    }

    /// Replaces the granularity.
    pub fn set_granularity(&mut self, granularity: usize) {
        self.granularity = granularity;
    }

    /// User sort value, used to order grids in reports.
    #[must_use]
    pub const fn sort_value(&self) -> i64 {
        self.sort_value
    }

    /// Replaces the sort value.
    pub fn set_sort_value(&mut self, sort_value: i64) {
        self.sort_value = sort_value;
    }

    /// Builds the per-attribute lookup structures.
    pub fn build_indexing_structure(&mut self) {
        for attribute in &mut self.attributes {
            attribute.build_indexing_structure();
        }
    }

    /// Drops the per-attribute lookup structures.
    pub fn delete_indexing_structure(&mut self) {
        for attribute in &mut self.attributes {
            attribute.delete_indexing_structure();
        }
    }

    /// Returns `true` while cells may be added or deleted.
    #[must_use]
    pub const fn cell_update_mode(&self) -> bool {
        self.cell_index.is_some()
    }

    /// Enters or leaves cell-update mode.
    ///
    /// Entering builds the sorted cell index from the current cell chain;
    /// leaving drops it and recomputes every cached statistic. Part
    /// structures must not change while the mode is active.
    pub fn set_cell_update_mode(&mut self, cell_update_mode: bool) {
        if cell_update_mode && self.cell_index.is_none() {
            let mut index = BTreeMap::new();
            let mut cell = self.head_cell;
            while let Some(cell_id) = cell {
                let current = self.cell(cell_id);
                index.insert(current.parts.clone(), cell_id);
                cell = current.next;
            }
            self.cell_index = Some(index);
        } else if !cell_update_mode && self.cell_index.is_some() {
            self.cell_index = None;
            self.update_all_statistics();
        }
    }

    /// Number of non-empty cells.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Cell at `cell_id`.
    ///
    /// # Panics
    ///
    /// Panics if `cell_id` does not reference a live cell.
    #[must_use]
    pub fn cell(&self, cell_id: usize) -> &Cell {
        self.cells[cell_id].as_ref().expect("dangling cell id")
    }

    /// Mutable cell at `cell_id`.
    ///
    /// # Panics
    ///
    /// Panics if `cell_id` does not reference a live cell.
    pub fn cell_mut(&mut self, cell_id: usize) -> &mut Cell {
        self.cells[cell_id].as_mut().expect("dangling cell id")
    }

    /// First cell of the grid chain.
    #[must_use]
    pub const fn head_cell(&self) -> Option<usize> {
        self.head_cell
    }

    /// Successor of `cell_id` in the grid chain.
    #[must_use]
    pub fn next_cell(&self, cell_id: usize) -> Option<usize> {
        self.cell(cell_id).next
    }

    /// Iterates over `(cell_id, cell)` pairs in chain order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        CellIter {
            grid: self,
            cursor: self.head_cell,
        }
    }

    /// First cell of the part's chain for (`attribute`, `part`).
    #[must_use]
    pub fn part_head_cell(&self, attribute: usize, part: usize) -> Option<usize> {
        self.attributes[attribute].part_at(part).head_cell
    }

    /// Successor of `cell_id` in the part chain of `attribute`.
    #[must_use]
    pub fn part_next_cell(&self, attribute: usize, cell_id: usize) -> Option<usize> {
        self.cell(cell_id).part_next[attribute]
    }

    /// Creates a cell for the part tuple `parts` and threads it at the tail
    /// of the grid chain and of each part chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] outside cell-update mode, on an
    /// invalid part tuple, or when a cell with the same tuple exists.
    pub fn add_cell(&mut self, parts: &[usize]) -> Result<usize> {
        if self.cell_index.is_none() {
            return Err(Error::InvariantViolation(
                "add_cell requires cell-update mode".into(),
            ));
        }
        self.check_cell_parts(parts)?;
        if self.lookup_cell(parts).is_some() {
            return Err(Error::InvariantViolation(format!(
                "a cell already exists for part tuple {parts:?}"
            )));
        }

        let mut cell = Cell::new(parts.to_vec(), self.target_values.len());

        // tail of the grid chain
        let cell_id = self.free_cells.pop().unwrap_or_else(|| {
            self.cells.push(None);
            self.cells.len() - 1
        });
        cell.prev = self.tail_cell;
        self.cell_count += 1;

        // tail of each part chain
        for (attribute_index, &part_index) in parts.iter().enumerate() {
            let part = self.attributes[attribute_index].part_at_mut_internal(part_index);
            cell.part_prev[attribute_index] = part.tail_cell;
            part.cell_count += 1;
            if part.head_cell.is_none() {
                part.head_cell = Some(cell_id);
            }
            if let Some(tail_id) = part.tail_cell {
                self.cells[tail_id]
                    .as_mut()
                    .expect("part tail is live")
                    .part_next[attribute_index] = Some(cell_id);
            }
            let part = self.attributes[attribute_index].part_at_mut_internal(part_index);
            part.tail_cell = Some(cell_id);
        }

        if let Some(tail_id) = self.tail_cell {
            self.cells[tail_id].as_mut().expect("tail is live").next = Some(cell_id);
        }
        self.cells[cell_id] = Some(cell);
        if self.head_cell.is_none() {
            self.head_cell = Some(cell_id);
        }
        self.tail_cell = Some(cell_id);

        self.cell_index
            .as_mut()
            .expect("checked above")
            .insert(parts.to_vec(), cell_id);
        Ok(cell_id)
    }

    /// Finds the cell for the part tuple `parts` through the sorted index.
    ///
    /// # Panics
    ///
    /// Panics outside cell-update mode.
    #[must_use]
    pub fn lookup_cell(&self, parts: &[usize]) -> Option<usize> {
        self.cell_index
            .as_ref()
            .expect("lookup_cell requires cell-update mode")
            .get(parts)
            .copied()
    }

    /// Deletes a cell, unlinking it from the grid chain and from each part
    /// chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] outside cell-update mode or for
    /// a dead cell id.
    pub fn delete_cell(&mut self, cell_id: usize) -> Result<()> {
        if self.cell_index.is_none() {
            return Err(Error::InvariantViolation(
                "delete_cell requires cell-update mode".into(),
            ));
        }
        let cell = self.cells[cell_id]
            .take()
            .ok_or_else(|| Error::InvariantViolation(format!("cell {cell_id} is not live")))?;
        self.cell_count -= 1;

        // grid chain
        if let Some(prev_id) = cell.prev {
            self.cells[prev_id].as_mut().expect("prev is live").next = cell.next;
        }
        if let Some(next_id) = cell.next {
            self.cells[next_id].as_mut().expect("next is live").prev = cell.prev;
        }
        if self.head_cell == Some(cell_id) {
            self.head_cell = cell.next;
        }
        if self.tail_cell == Some(cell_id) {
            self.tail_cell = cell.prev;
        }

        // part chains
        for (attribute_index, &part_index) in cell.parts.iter().enumerate() {
            let prev_id = cell.part_prev[attribute_index];
            let next_id = cell.part_next[attribute_index];
            if let Some(prev_id) = prev_id {
                self.cells[prev_id]
                    .as_mut()
                    .expect("part prev is live")
                    .part_next[attribute_index] = next_id;
            }
            if let Some(next_id) = next_id {
                self.cells[next_id]
                    .as_mut()
                    .expect("part next is live")
                    .part_prev[attribute_index] = prev_id;
            }
            let part = self.attributes[attribute_index].part_at_mut_internal(part_index);
            part.cell_count -= 1;
            if part.head_cell == Some(cell_id) {
                part.head_cell = next_id;
            }
            if part.tail_cell == Some(cell_id) {
                part.tail_cell = prev_id;
            }
        }

        self.cell_index
            .as_mut()
            .expect("checked above")
            .remove(&cell.parts);
        self.free_cells.push(cell_id);
        Ok(())
    }

    /// Destroys every cell while keeping the attribute and part structure.
    pub fn delete_all_cells(&mut self) {
        self.cell_index = None;
        self.cells.clear();
        self.free_cells.clear();
        self.head_cell = None;
        self.tail_cell = None;
        self.cell_count = 0;
        self.grid_frequency = 0;
        for attribute in &mut self.attributes {
            for part_index in 0..attribute.part_count() {
                let part = attribute.part_at_mut_internal(part_index);
                part.head_cell = None;
                part.tail_cell = None;
                part.cell_count = 0;
                part.set_frequency(0);
            }
        }
    }

    /// Resets the grid to its empty state.
    pub fn delete_all(&mut self) {
        *self = Self::default();
    }

    /// Destroys attributes reduced to a single part and reindexes the
    /// survivors. Only allowed before any cell exists.
    pub fn delete_non_informative_attributes(&mut self) {
        assert_eq!(self.cell_count, 0, "cells must not exist yet");
        self.attributes.retain(Attribute::is_informative);
    }

    /// Recomputes the per-part frequencies and the cached grid statistics
    /// from the cells.
    pub fn update_all_statistics(&mut self) {
        for attribute_index in 0..self.attributes.len() {
            for part_index in 0..self.attributes[attribute_index].part_count() {
                let mut frequency = 0;
                let mut cell = self.attributes[attribute_index].part_at(part_index).head_cell;
                while let Some(cell_id) = cell {
                    let current = self.cell(cell_id);
                    frequency += current.frequency;
                    cell = current.part_next[attribute_index];
                }
                self.attributes[attribute_index]
                    .part_at_mut_internal(part_index)
                    .set_frequency(frequency);
            }
        }
        self.grid_frequency = self.cells().map(|(_, cell)| cell.frequency).sum();
        self.ln_grid_size = self
            .attributes
            .iter()
            .map(|attribute| (attribute.part_count().max(1) as f64).ln())
            .sum();
        self.informative_attribute_count = self
            .attributes
            .iter()
            .filter(|attribute| attribute.is_informative())
            .count();
        self.total_part_count = self.attributes.iter().map(Attribute::part_count).sum();
    }

    /// Total frequency of the grid.
    #[must_use]
    pub const fn grid_frequency(&self) -> u64 {
        self.grid_frequency
    }

    /// Natural logarithm of the Cartesian size of the grid.
    #[must_use]
    pub const fn ln_grid_size(&self) -> f64 {
        self.ln_grid_size
    }

    /// Number of attributes with more than one part.
    #[must_use]
    pub const fn informative_attribute_count(&self) -> usize {
        self.informative_attribute_count
    }

    /// Total part count over all attributes.
    #[must_use]
    pub const fn total_part_count(&self) -> usize {
        self.total_part_count
    }

    /// Largest part count over the attributes.
    #[must_use]
    pub fn compute_max_part_number(&self) -> usize {
        self.attributes
            .iter()
            .map(Attribute::part_count)
            .max()
            .unwrap_or(0)
    }

    /// Entropy of the cell distribution, in bits.
    #[must_use]
    pub fn compute_source_entropy(&self) -> f64 {
        let grid_frequency = self.grid_frequency as f64;
        let mut entropy = 0.0;
        if grid_frequency > 0.0 {
            for (_, cell) in self.cells() {
                let probability = cell.frequency as f64 / grid_frequency;
                if probability > 0.0 {
                    entropy += probability * probability.ln();
                }
            }
        }
        clamp_entropy(entropy / -std::f64::consts::LN_2)
    }

    /// Entropy of the target value distribution, in bits.
    #[must_use]
    pub fn compute_target_entropy(&self) -> f64 {
        let grid_frequency = self.grid_frequency as f64;
        let mut entropy = 0.0;
        if grid_frequency > 0.0 && !self.target_values.is_empty() {
            let frequencies = self.compute_target_value_frequencies();
            for frequency in frequencies {
                let probability = frequency as f64 / grid_frequency;
                if probability > 0.0 {
                    entropy += probability * probability.ln();
                }
            }
        }
        clamp_entropy(entropy / -std::f64::consts::LN_2)
    }

    /// Mutual information between cells and target values, in bits.
    #[must_use]
    pub fn compute_mutual_entropy(&self) -> f64 {
        let grid_frequency = self.grid_frequency as f64;
        let mut entropy = 0.0;
        if grid_frequency > 0.0 && !self.target_values.is_empty() {
            let frequencies = self.compute_target_value_frequencies();
            for (_, cell) in self.cells() {
                for (target, &target_frequency) in frequencies.iter().enumerate() {
                    let joint = cell.target_frequency_at(target) as f64 / grid_frequency;
                    if joint > 0.0 {
                        let marginal_cell = cell.frequency as f64 / grid_frequency;
                        let marginal_target = target_frequency as f64 / grid_frequency;
                        entropy += joint * (joint / (marginal_cell * marginal_target)).ln();
                    }
                }
            }
        }
        clamp_entropy(entropy / std::f64::consts::LN_2)
    }

    /// Sorts every attribute's parts for reporting and remaps the cells'
    /// part tuples accordingly. Not allowed in cell-update mode.
    pub fn sort_attribute_parts(&mut self) {
        assert!(!self.cell_update_mode(), "no sorting in cell-update mode");
        for attribute_index in 0..self.attributes.len() {
            let old_to_new = self.attributes[attribute_index].sort_parts();
            for slot in &mut self.cells {
                if let Some(cell) = slot {
                    cell.parts[attribute_index] = old_to_new[cell.parts[attribute_index]];
                }
            }
        }
    }

    /// Validates every structural invariant of the grid. Expensive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] naming the first offending
    /// entity.
    pub fn check(&self) -> Result<()> {
        // attribute-level invariants
        if let Some(name) = self.attributes.iter().map(Attribute::name).duplicates().next() {
            return Err(Error::InvariantViolation(format!(
                "duplicate attribute name '{name}'"
            )));
        }
        for attribute in &self.attributes {
            attribute.check()?;
        }
        let target_count = self.attributes.iter().filter(|a| a.is_target()).count();
        if target_count > 1 {
            return Err(Error::InvariantViolation(
                "at most one target attribute".into(),
            ));
        }
        if target_count == 1 {
            if self.target_attribute() != Some(self.attributes.len() - 1) {
                return Err(Error::InvariantViolation(
                    "the target attribute must be last".into(),
                ));
            }
            if !self.target_values.is_empty() {
                return Err(Error::InvariantViolation(
                    "explicit target excludes implicit target values".into(),
                ));
            }
        }
        let var_part_count = self
            .attributes
            .iter()
            .filter(|a| a.attribute_type() == AttributeType::VarPart)
            .count();
        if var_part_count > 1 {
            return Err(Error::InvariantViolation(
                "at most one var-part attribute".into(),
            ));
        }

        // cell-level invariants
        let mut seen_tuples = BTreeMap::new();
        let mut chained_cells = 0usize;
        let mut total_frequency = 0u64;
        let mut cell = self.head_cell;
        while let Some(cell_id) = cell {
            let current = self.cell(cell_id);
            chained_cells += 1;
            total_frequency += current.frequency;
            if current.parts.len() != self.attributes.len() {
                return Err(Error::InvariantViolation(format!(
                    "cell {cell_id} has a tuple of wrong arity"
                )));
            }
            self.check_cell_parts(&current.parts)?;
            if !self.target_values.is_empty()
                && current.frequency != current.target_frequencies.iter().sum::<u64>()
            {
                return Err(Error::InvariantViolation(format!(
                    "cell {cell_id} frequency differs from its target frequencies"
                )));
            }
            if seen_tuples.insert(current.parts.clone(), cell_id).is_some() {
                return Err(Error::InvariantViolation(format!(
                    "cell {cell_id} duplicates a part tuple"
                )));
            }
            cell = current.next;
        }
        if chained_cells != self.cell_count {
            return Err(Error::InvariantViolation(
                "grid chain length differs from the cell count".into(),
            ));
        }

        // statistics are only meaningful outside cell-update mode
        if !self.cell_update_mode() && self.cell_count > 0 {
            if total_frequency != self.grid_frequency {
                return Err(Error::InvariantViolation(
                    "grid frequency differs from the sum of cell frequencies".into(),
                ));
            }
            for (attribute_index, attribute) in self.attributes.iter().enumerate() {
                let mut attribute_frequency = 0u64;
                for part_index in 0..attribute.part_count() {
                    let part = attribute.part_at(part_index);
                    let mut part_frequency = 0u64;
                    let mut part_cells = 0usize;
                    let mut cell = part.head_cell;
                    while let Some(cell_id) = cell {
                        let current = self.cell(cell_id);
                        if current.parts[attribute_index] != part_index {
                            return Err(Error::InvariantViolation(format!(
                                "cell {cell_id} chained into a foreign part"
                            )));
                        }
                        part_frequency += current.frequency;
                        part_cells += 1;
                        cell = current.part_next[attribute_index];
                    }
                    if part_cells != part.cell_count() {
                        return Err(Error::InvariantViolation(format!(
                            "part {part_index} of attribute '{}' has a broken cell chain",
                            attribute.name()
                        )));
                    }
                    if part_frequency != part.frequency() {
                        return Err(Error::InvariantViolation(format!(
                            "part {part_index} of attribute '{}' frequency differs from its cells",
                            attribute.name()
                        )));
                    }
                    attribute_frequency += part_frequency;
                }
                if attribute_frequency != self.grid_frequency {
                    return Err(Error::InvariantViolation(format!(
                        "attribute '{}' parts do not sum to the grid frequency",
                        attribute.name()
                    )));
                }
            }
        }

        // granularity bound
        if self.granularity > 0 && self.grid_frequency > 0 {
            let bound = (self.grid_frequency as f64).log2().ceil() as usize;
            if self.granularity > bound {
                return Err(Error::InvariantViolation(format!(
                    "granularity {} exceeds the frequency bound {bound}",
                    self.granularity
                )));
            }
        }
        Ok(())
    }

    /// Builds a grid from a frozen representation.
    ///
    /// When the frozen grid is supervised and its target partition holds
    /// singleton symbol parts, the target dimension is collapsed into
    /// implicit target values and the cells accumulate per-target
    /// frequencies; a supervised grid with a grouped target keeps its target
    /// as an explicit last attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the grid is not empty or the
    /// frozen representation is inconsistent.
    pub fn import_data_grid_stats(&mut self, stats: &DataGridStats) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::InvariantViolation(
                "import requires an empty grid".into(),
            ));
        }
        stats.check()?;

        // implicit target values when the target partition is a symbol
        // singleton partition
        let mut attribute_count = stats.attribute_count();
        let mut target_values: Option<&[Symbol]> = None;
        if stats.target_attribute_count() == 1 {
            let target = stats.attribute_at(stats.first_target_attribute_index());
            if let AttributePartition::SymbolValues { values } = &target.partition {
                target_values = Some(values);
                attribute_count -= 1;
                self.target_values_attribute_name = Some(target.name.clone());
            }
        }

        self.initialize(attribute_count, target_values.map_or(0, <[Symbol]>::len));
        self.granularity = stats.granularity();
        if let Some(values) = target_values {
            for (target, value) in values.iter().enumerate() {
                self.set_target_value_at(target, value.clone());
            }
        }

        // attribute partitions
        for attribute_index in 0..attribute_count {
            let attribute_stats = stats.attribute_at(attribute_index);
            let attribute = &mut self.attributes[attribute_index];
            attribute.set_name(attribute_stats.name.clone());
            attribute.set_attribute_type(if attribute_stats.partition.is_continuous() {
                AttributeType::Continuous
            } else {
                AttributeType::Symbol
            });
            attribute.set_initial_value_count(attribute_stats.initial_value_count);
            attribute.set_granularized_value_count(attribute_stats.granularized_value_count);

            match &attribute_stats.partition {
                AttributePartition::Discretization { bounds } => {
                    import_interval_bounds(attribute, bounds);
                }
                AttributePartition::ContinuousValues { values } => {
                    let bounds: Vec<f64> = values
                        .windows(2)
                        .map(|pair| bound_between(pair[0], pair[1]))
                        .collect();
                    import_interval_bounds(attribute, &bounds);
                }
                AttributePartition::Grouping {
                    values,
                    groups,
                    garbage_group,
                } => {
                    for range in groups {
                        let part = attribute.add_part();
                        let value_set = attribute.part_at_mut(part).value_set_mut();
                        for value in &values[range[0]..=range[1]] {
                            value_set.add_symbol_value(value.clone());
                        }
                    }
                    attribute.set_garbage_part(*garbage_group);
                }
                AttributePartition::SymbolValues { values } => {
                    for value in values {
                        let part = attribute.add_part();
                        attribute
                            .part_at_mut(part)
                            .value_set_mut()
                            .add_symbol_value(value.clone());
                    }
                    // the last singleton also holds the star value and
                    // becomes the default part
                    let last = attribute.part_count() - 1;
                    attribute
                        .part_at_mut(last)
                        .value_set_mut()
                        .add_symbol_value(Symbol::star());
                }
            }

            // explicit target attribute for a supervised grid with a grouped
            // target
            if target_values.is_none()
                && stats.target_attribute_count() == 1
                && attribute_index == stats.first_target_attribute_index()
            {
                self.set_target_attribute(attribute_index);
            }
        }

        // cells
        self.set_cell_update_mode(true);
        let mut part_indexes = Vec::new();
        let mut parts = vec![0usize; attribute_count];
        for cell_index in 0..stats.total_grid_size() {
            stats.compute_part_indexes(cell_index, &mut part_indexes);
            let frequency = stats.cell_frequency_at(&part_indexes);
            if frequency == 0 {
                continue;
            }
            parts.copy_from_slice(&part_indexes[..attribute_count]);
            if target_values.is_none() {
                let cell_id = self.add_cell(&parts)?;
                self.cell_mut(cell_id).set_frequency(frequency);
            } else {
                let cell_id = match self.lookup_cell(&parts) {
                    Some(cell_id) => cell_id,
                    None => self.add_cell(&parts)?,
                };
                let target = part_indexes[attribute_count];
                self.cell_mut(cell_id)
                    .upgrade_target_frequency_at(target, frequency);
            }
        }
        self.set_cell_update_mode(false);

        debug_assert!(self.check().is_ok());
        Ok(())
    }

    /// Exports the grid back into its frozen representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the grid fails [`Self::check`]
    /// or holds a missing-value interval, which the frozen form cannot
    /// represent.
    pub fn export_data_grid_stats(&self) -> Result<DataGridStats> {
        self.check()?;

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        for attribute in &self.attributes {
            let partition = match attribute.attribute_type() {
                AttributeType::Continuous => {
                    let mut intervals: Vec<&Interval> =
                        attribute.parts().map(Part::interval).collect();
                    if intervals.iter().any(|interval| interval.is_missing()) {
                        return Err(Error::InvariantViolation(format!(
                            "attribute '{}': missing interval has no frozen form",
                            attribute.name()
                        )));
                    }
                    intervals.sort_by(|left, right| {
                        left.upper_bound()
                            .partial_cmp(&right.upper_bound())
                            .expect("interval bounds are never NaN")
                    });
                    let bounds = intervals
                        .iter()
                        .take(intervals.len().saturating_sub(1))
                        .map(|interval| interval.upper_bound())
                        .collect();
                    AttributePartition::Discretization { bounds }
                }
                AttributeType::Symbol | AttributeType::VarPart => {
                    let mut values = Vec::new();
                    let mut groups = Vec::with_capacity(attribute.part_count());
                    for part in attribute.parts() {
                        let first = values.len();
                        for item in part.value_set().values() {
                            values.push(export_value_symbol(item.value(), attribute));
                        }
                        groups.push([first, values.len() - 1]);
                    }
                    AttributePartition::Grouping {
                        values,
                        groups,
                        garbage_group: attribute.garbage_part(),
                    }
                }
            };
            let mut attribute_stats = AttributeStats::new(attribute.name(), partition);
            attribute_stats.initial_value_count = attribute.initial_value_count();
            attribute_stats.granularized_value_count = attribute.granularized_value_count();
            attributes.push(attribute_stats);
        }

        // implicit target values become an explicit singleton target
        let mut target_attribute_count = usize::from(self.target_attribute().is_some());
        if !self.target_values.is_empty() {
            let name = self.target_values_attribute_name.clone().unwrap_or_else(|| {
                let mut name = TARGET_NAME_PREFIX.to_string();
                let mut suffix = 0usize;
                while self.search_attribute(&name).is_some() {
                    suffix += 1;
                    name = format!("{TARGET_NAME_PREFIX}{suffix}");
                }
                name
            });
            attributes.push(AttributeStats::new(
                name,
                AttributePartition::SymbolValues {
                    values: self.target_values.clone(),
                },
            ));
            target_attribute_count = 1;
        }

        let mut stats = DataGridStats::new(attributes, target_attribute_count, self.granularity)?;
        let mut part_indexes = vec![0usize; stats.attribute_count()];
        for (_, cell) in self.cells() {
            part_indexes[..cell.parts.len()].copy_from_slice(&cell.parts);
            if self.target_values.is_empty() {
                stats.set_cell_frequency(&part_indexes, cell.frequency());
            } else {
                for target in 0..self.target_values.len() {
                    part_indexes[cell.parts.len()] = target;
                    stats.set_cell_frequency(&part_indexes, cell.target_frequency_at(target));
                }
            }
        }
        Ok(stats)
    }

    fn compute_target_value_frequencies(&self) -> Vec<u64> {
        let mut frequencies = vec![0u64; self.target_values.len()];
        for (_, cell) in self.cells() {
            for (target, frequency) in frequencies.iter_mut().enumerate() {
                *frequency += cell.target_frequency_at(target);
            }
        }
        frequencies
    }

    fn check_cell_parts(&self, parts: &[usize]) -> Result<()> {
        if parts.len() != self.attributes.len() {
            return Err(Error::InvariantViolation(format!(
                "part tuple arity {} differs from the attribute count {}",
                parts.len(),
                self.attributes.len()
            )));
        }
        for (attribute_index, &part_index) in parts.iter().enumerate() {
            if part_index >= self.attributes[attribute_index].part_count() {
                return Err(Error::InvariantViolation(format!(
                    "part {part_index} does not belong to attribute '{}'",
                    self.attributes[attribute_index].name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DataGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DataGrid\t{} attributes\t{} cells\tfrequency {}",
            self.attribute_count(),
            self.cell_count(),
            self.grid_frequency()
        )?;
        for (_, cell) in self.cells() {
            write!(f, "{:?}\t{}", cell.parts(), cell.frequency())?;
            for target in 0..self.target_value_count() {
                write!(f, "\t{}", cell.target_frequency_at(target))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

struct CellIter<'a> {
    grid: &'a DataGrid,
    cursor: Option<usize>,
}

impl<'a> Iterator for CellIter<'a> {
    type Item = (usize, &'a Cell);

    fn next(&mut self) -> Option<Self::Item> {
        let cell_id = self.cursor?;
        let cell = self.grid.cell(cell_id);
        self.cursor = cell.next;
        Some((cell_id, cell))
    }
}

fn import_interval_bounds(attribute: &mut Attribute, bounds: &[f64]) {
    let part_count = bounds.len() + 1;
    for part_index in 0..part_count {
        let part = attribute.add_part();
        let interval = attribute.part_at_mut(part).interval_mut();
        interval.set_lower_bound(if part_index == 0 {
            Interval::MIN_LOWER_BOUND
        } else {
            bounds[part_index - 1]
        });
        interval.set_upper_bound(if part_index == part_count - 1 {
            Interval::MAX_UPPER_BOUND
        } else {
            bounds[part_index]
        });
    }
}

fn export_value_symbol(value: &Value, attribute: &Attribute) -> Symbol {
    match value {
        Value::Symbol(symbol) => symbol.clone(),
        Value::VarPart(var_part) => {
            // var-part values are exported through the label of the inner
            // part they reference
            let inner = attribute
                .inner_attributes()
                .expect("var-part attribute has inner attributes");
            let inner_attribute = inner.attribute_at(var_part.attribute);
            Symbol::new(format!("{}#{}", inner_attribute.name(), var_part.part))
        }
    }
}

fn clamp_entropy(entropy: f64) -> f64 {
    debug_assert!(entropy > -ENTROPY_EPSILON);
    let entropy = entropy.abs();
    if entropy < ENTROPY_EPSILON {
        0.0
    } else {
        entropy
    }
}
