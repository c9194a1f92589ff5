//! Selection state: the currently selected attribute subset and its MAP
//! cost.
//!
//! The total cost of a selection is `modelCost(|S|) + sum of per-attribute
//! model costs + dataCost(S)`, the data cost coming from the target
//! partition. Model costs are maintained incrementally on add/remove; the
//! data cost is recomputed from the per-instance score vectors.

use crate::column_store::PreparedColumnStore;
use crate::cost::{ln_factorial, natural_numbers_universal_code_length};
use crate::target_partition::{TargetPartition, TargetPartitionEnum};
use rustc_hash::FxHashSet;
use std::f64::consts::LN_2;

/// Evaluates attribute selections: keeps the selected set, the target
/// partition and the incremental model cost in sync.
#[derive(Debug)]
pub struct SelectionScorer {
    partition: TargetPartitionEnum,
    selected: FxHashSet<usize>,
    selected_model_cost: f64,
    prior_weight: f64,
    use_construction_cost: bool,
    use_preparation_cost: bool,
}

impl SelectionScorer {
    /// Wraps a target partition with the cost-model switches.
    #[must_use]
    pub fn new(
        partition: TargetPartitionEnum,
        prior_weight: f64,
        use_construction_cost: bool,
        use_preparation_cost: bool,
    ) -> Self {
        Self {
            partition,
            selected: FxHashSet::default(),
            selected_model_cost: 0.0,
            prior_weight,
            use_construction_cost,
            use_preparation_cost,
        }
    }

    /// Resets to the empty, valid selection.
    pub fn initialize_working_data(&mut self, store: &PreparedColumnStore) {
        self.partition.initialize(store);
        self.selected.clear();
        self.selected_model_cost = 0.0;
    }

    /// Adds `attribute` to the selection: refines the target partition, then
    /// accumulates the attribute's conditionals.
    pub fn add_attribute(&mut self, store: &mut PreparedColumnStore, attribute: usize) {
        debug_assert!(!self.selected.contains(&attribute));
        self.partition.add_attribute(store, attribute);
        self.selected.insert(attribute);
        self.selected_model_cost += self.model_attribute_cost(store, attribute);
        self.partition.upgrade_conditional_probs(store, attribute, 1.0);
    }

    /// Removes `attribute` from the selection: subtracts the attribute's
    /// conditionals while the partition is still compatible, then coarsens.
    pub fn remove_attribute(&mut self, store: &mut PreparedColumnStore, attribute: usize) {
        debug_assert!(self.selected.contains(&attribute));
        self.partition.upgrade_conditional_probs(store, attribute, -1.0);
        self.selected_model_cost -= self.model_attribute_cost(store, attribute);
        self.selected.remove(&attribute);
        self.partition.remove_attribute(store, attribute);
    }

    /// Adds `attribute` with a fractional `weight` in `(0, 1]`; only the
    /// data cost keeps a meaning afterwards. Used to assemble the averaged
    /// predictor.
    pub fn add_weighted_attribute(
        &mut self,
        store: &mut PreparedColumnStore,
        attribute: usize,
        weight: f64,
    ) {
        debug_assert!(!self.selected.contains(&attribute));
        debug_assert!(weight > 0.0 && weight <= 1.0);
        self.partition.add_attribute(store, attribute);
        self.selected.insert(attribute);
        self.selected_model_cost += self.model_attribute_cost(store, attribute);
        self.partition
            .upgrade_conditional_probs(store, attribute, weight);
    }

    /// Returns `true` if `attribute` is currently selected.
    #[must_use]
    pub fn is_attribute_selected(&self, attribute: usize) -> bool {
        self.selected.contains(&attribute)
    }

    /// Number of selected attributes.
    #[must_use]
    pub fn selected_attribute_count(&self) -> usize {
        self.selected.len()
    }

    /// Selected attribute indices, sorted.
    #[must_use]
    pub fn selected_attributes(&self) -> Vec<usize> {
        let mut selected: Vec<usize> = self.selected.iter().copied().collect();
        selected.sort_unstable();
        selected
    }

    /// The selected set itself.
    #[must_use]
    pub const fn selected_set(&self) -> &FxHashSet<usize> {
        &self.selected
    }

    /// The wrapped target partition.
    #[must_use]
    pub const fn partition(&self) -> &TargetPartitionEnum {
        &self.partition
    }

    /// Prior cost of selecting `attribute_number` attributes.
    #[must_use]
    pub fn model_attribute_number_cost(
        &self,
        store: &PreparedColumnStore,
        attribute_number: usize,
    ) -> f64 {
        // one bit decides between the null and an informative model
        let mut model_cost = LN_2;
        if attribute_number == 0 {
            if self.use_preparation_cost {
                model_cost += store.preparation().null_preparation_cost();
            }
        } else {
            // code the selected count, minus the subset-order redundancy
            model_cost += natural_numbers_universal_code_length(attribute_number as u64);
            model_cost -= ln_factorial(attribute_number as u64);
        }
        model_cost * self.prior_weight
    }

    /// Prior cost of including `attribute` in the selection.
    #[must_use]
    pub fn model_attribute_cost(&self, store: &PreparedColumnStore, attribute: usize) -> f64 {
        let prepared = store.preparation().attribute_at(attribute);
        let mut cost = 0.0;
        if self.use_construction_cost {
            if prepared.construction_cost() > 0.0 {
                cost += prepared.construction_cost() - prepared.null_construction_cost();
            }
        } else {
            // fall back to a plain variable-selection cost
            cost += (store.preparation().attribute_count() as f64).ln();
        }
        if self.use_preparation_cost {
            cost += prepared.preparation_cost();
        }
        cost * self.prior_weight
    }

    /// Model part of the selection cost.
    #[must_use]
    pub fn compute_selection_model_cost(&self, store: &PreparedColumnStore) -> f64 {
        self.model_attribute_number_cost(store, self.selected.len()) + self.selected_model_cost
    }

    /// Data part of the selection cost.
    pub fn compute_selection_data_cost(&mut self, store: &PreparedColumnStore) -> f64 {
        self.partition.data_cost(store)
    }

    /// Total MAP cost of the selection.
    pub fn compute_selection_total_cost(&mut self, store: &PreparedColumnStore) -> f64 {
        self.compute_selection_model_cost(store) + self.compute_selection_data_cost(store)
    }

    /// Validates the target partition against the store.
    #[must_use]
    pub fn check(&self, store: &PreparedColumnStore) -> bool {
        self.partition.check(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_store::{ColumnStoreConfig, VecRecordSource};
    use crate::preparation::{DataPreparationClass, TargetDescription};
    use crate::progress::{CancelToken, NoProgress};
    use crate::symbol::Symbol;
    use crate::target_partition::create_target_partition;
    use float_cmp::assert_approx_eq;

    fn scorer_and_store() -> (SelectionScorer, PreparedColumnStore) {
        let instances: Vec<(usize, usize)> =
            vec![(0, 0), (0, 0), (0, 0), (1, 1), (1, 1), (0, 1)];
        let mut joint = [[0u64; 2]; 2];
        for &(source, target) in &instances {
            joint[source][target] += 1;
        }
        let target = TargetDescription::Classes {
            values: vec![Symbol::from("T1"), Symbol::from("T2")],
            frequencies: vec![3, 3],
            grouped: false,
        };
        let mut preparation = DataPreparationClass::new(target);
        for name in ["A1", "A2"] {
            let mut attribute =
                crate::preparation::tests::prepared_symbol_attribute(name, &joint, &["T1", "T2"]);
            attribute.set_sort_value(0.5);
            attribute.set_preparation_cost(1.5);
            preparation.add_attribute(attribute).unwrap();
        }

        let mut store = PreparedColumnStore::new(preparation, ColumnStoreConfig::default());
        store.set_used_attributes(vec![0, 1]).unwrap();
        let records: Vec<Vec<i32>> = instances
            .iter()
            .map(|&(source, target)| {
                vec![source as i32 + 1, source as i32 + 1, target as i32 + 1]
            })
            .collect();
        store
            .compute_prepared_data(
                &mut VecRecordSource::new(records),
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        let partition = create_target_partition(&store).unwrap();
        let mut scorer = SelectionScorer::new(partition, 0.25, false, true);
        scorer.initialize_working_data(&store);
        (scorer, store)
    }

    #[test]
    fn add_then_remove_restores_the_total_cost() {
        let (mut scorer, mut store) = scorer_and_store();
        let initial = scorer.compute_selection_total_cost(&mut store);

        scorer.add_attribute(&mut store, 0);
        assert!(scorer.is_attribute_selected(0));
        let with_attribute = scorer.compute_selection_total_cost(&mut store);
        assert_ne!(with_attribute, initial);

        scorer.remove_attribute(&mut store, 0);
        assert_eq!(scorer.selected_attribute_count(), 0);
        let restored = scorer.compute_selection_total_cost(&mut store);
        assert_approx_eq!(f64, restored, initial, epsilon = 1e-9);
    }

    #[test]
    fn model_cost_grows_with_the_selection() {
        let (mut scorer, mut store) = scorer_and_store();
        let empty_model_cost = scorer.compute_selection_model_cost(&store);

        scorer.add_attribute(&mut store, 0);
        let one_model_cost = scorer.compute_selection_model_cost(&store);
        assert!(one_model_cost > empty_model_cost);

        scorer.add_attribute(&mut store, 1);
        assert!(scorer.compute_selection_model_cost(&store) > one_model_cost);
        assert_eq!(scorer.selected_attributes(), vec![0, 1]);
    }

    #[test]
    fn informative_attribute_lowers_the_data_cost() {
        let (mut scorer, mut store) = scorer_and_store();
        let empty_data_cost = scorer.compute_selection_data_cost(&mut store);
        scorer.add_attribute(&mut store, 0);
        assert!(scorer.compute_selection_data_cost(&mut store) < empty_data_cost);
    }

    #[test]
    fn fractional_weight_interpolates_the_contribution() {
        let (mut scorer, mut store) = scorer_and_store();
        let empty_data_cost = scorer.compute_selection_data_cost(&mut store);

        scorer.add_attribute(&mut store, 0);
        let full_data_cost = scorer.compute_selection_data_cost(&mut store);
        scorer.remove_attribute(&mut store, 0);

        scorer.add_weighted_attribute(&mut store, 0, 0.5);
        let half_data_cost = scorer.compute_selection_data_cost(&mut store);
        assert!(half_data_cost < empty_data_cost);
        assert!(half_data_cost > full_data_cost);
    }
}
