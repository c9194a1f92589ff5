//! Greedy and exhaustive search over attribute subsets.
//!
//! All algorithms share the same evaluation loop: tentatively toggle an
//! attribute, recompute the selection cost through the scorer, keep the move
//! when it improves the cost beyond the tolerance. Forward moves require a
//! strict improvement; backward moves also accept ties, which biases the
//! search toward smaller models.

use crate::column_store::PreparedColumnStore;
use crate::progress::{CancelToken, TrainProgress};
use crate::selection::SelectionScorer;
use crate::weights::{EvaluationKind, WeightManager};
use rand::Rng;
use rustc_hash::FxHashSet;

// number of fast forward/backward rounds per greedy pass
const FAST_PASS_ROUNDS: usize = 2;

// exhaustive search is only tractable below this attribute count
const MAX_EXHAUSTIVE_ATTRIBUTES: usize = 25;

/// Search algorithm over attribute subsets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OptimizationAlgorithm {
    /// Forward: repeatedly add the best attribute.
    Fw,
    /// Forward-backward: best single add or remove per step.
    Fwbw,
    /// Fast forward: one pass committing every improving add.
    Ffw,
    /// Alternating fast forward and fast backward passes.
    Ffwbw,
    /// Multi-start fast forward-backward with shuffled restarts.
    #[default]
    MsFfwbw,
    /// Exhaustive search over all subsets, single-bit transitions.
    Opt,
}

/// Selection criterion: plain MAP or a model-averaging variant.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionCriterion {
    /// Keep the MAP selection only.
    #[default]
    Map,
    /// Model averaging weighted by predictor probability.
    Ma,
    /// Model averaging weighted by compression rate.
    Cma,
}

/// User-facing parameters of the selection search.
#[derive(Clone, Debug)]
pub struct SelectionParameters {
    /// Search algorithm.
    pub optimization_algorithm: OptimizationAlgorithm,
    /// MAP or model-averaging criterion.
    pub selection_criterion: SelectionCriterion,
    /// Multiplicative weight of the model-cost terms.
    pub prior_weight: f64,
    /// Include per-attribute construction costs.
    pub construction_cost: bool,
    /// Include per-attribute preparation costs.
    pub preparation_cost: bool,
    /// Number of multi-start rounds; 0 selects an automatic count.
    pub optimization_level: usize,
    /// Maximum number of reported attributes; 0 means unlimited.
    pub max_selected_attribute_number: usize,
    /// Maximum number of evaluated attributes; 0 means unlimited.
    pub max_evaluated_attribute_number: usize,
    /// Search trace level, 0 (silent) to 3 (every evaluation).
    pub trace_level: u8,
    /// Trace the selected attribute set along with each evaluation.
    pub trace_selected_attributes: bool,
}

impl Default for SelectionParameters {
    fn default() -> Self {
        Self {
            optimization_algorithm: OptimizationAlgorithm::default(),
            selection_criterion: SelectionCriterion::default(),
            prior_weight: 0.25,
            construction_cost: true,
            preparation_cost: true,
            optimization_level: 0,
            max_selected_attribute_number: 0,
            max_evaluated_attribute_number: 0,
            trace_level: 0,
            trace_selected_attributes: false,
        }
    }
}

/// Drives one search over the prepared attributes, keeping the scorer, the
/// weight log and the store in sync.
pub struct SelectionOptimizer<'a, R: Rng> {
    scorer: &'a mut SelectionScorer,
    store: &'a mut PreparedColumnStore,
    weights: &'a mut WeightManager,
    parameters: &'a SelectionParameters,
    rng: &'a mut R,
    token: &'a CancelToken,
    progress: &'a mut dyn TrainProgress,
    epsilon: f64,
}

impl<'a, R: Rng> SelectionOptimizer<'a, R> {
    /// Wires the search over its collaborators. `epsilon` is the cost
    /// tolerance derived from the initial cost.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scorer: &'a mut SelectionScorer,
        store: &'a mut PreparedColumnStore,
        weights: &'a mut WeightManager,
        parameters: &'a SelectionParameters,
        rng: &'a mut R,
        token: &'a CancelToken,
        progress: &'a mut dyn TrainProgress,
        epsilon: f64,
    ) -> Self {
        Self {
            scorer,
            store,
            weights,
            parameters,
            rng,
            token,
            progress,
            epsilon,
        }
    }

    /// Runs the configured algorithm from the current (empty) selection.
    /// `cost` holds the current selection cost on entry and the best cost
    /// found on return; the returned set is the best selection.
    pub fn optimize(&mut self, cost: &mut f64) -> FxHashSet<usize> {
        match self.parameters.optimization_algorithm {
            OptimizationAlgorithm::MsFfwbw => self.ms_optimize(cost),
            OptimizationAlgorithm::Opt => {
                if self.store.used_attributes().len() > MAX_EXHAUSTIVE_ATTRIBUTES {
                    log::warn!(
                        "no exhaustive search optimization for numbers of variables above {MAX_EXHAUSTIVE_ATTRIBUTES}"
                    );
                    self.ms_optimize(cost)
                } else {
                    self.opt_optimize(cost)
                }
            }
            OptimizationAlgorithm::Fw => {
                self.fw_optimize(cost);
                self.scorer.selected_set().clone()
            }
            OptimizationAlgorithm::Fwbw => {
                self.fwbw_optimize(cost);
                self.scorer.selected_set().clone()
            }
            OptimizationAlgorithm::Ffw => {
                self.ffw_optimize(cost);
                self.scorer.selected_set().clone()
            }
            OptimizationAlgorithm::Ffwbw => {
                self.ffwbw_optimize(cost);
                self.scorer.selected_set().clone()
            }
        }
    }

    fn stop_training(&self) -> bool {
        self.store.is_fill_error() || self.token.is_interruption_requested()
    }

    fn evaluate(&mut self) -> f64 {
        self.scorer.compute_selection_total_cost(self.store)
    }

    fn record(&mut self, kind: EvaluationKind, attribute: Option<usize>, total_cost: f64) {
        // unevaluated toggles carry no cost
        let (model_cost, data_cost) = if matches!(
            kind,
            EvaluationKind::UnevaluatedAdd | EvaluationKind::UnevaluatedRemove
        ) {
            (0.0, 0.0)
        } else {
            let model_cost = self.scorer.compute_selection_model_cost(self.store);
            (model_cost, total_cost - model_cost)
        };
        self.weights.record(kind, attribute, model_cost, data_cost);
    }

    // multi-start: a first greedy run in natural order, then shuffled restarts
    fn ms_optimize(&mut self, cost: &mut f64) -> FxHashSet<usize> {
        self.progress.label("Variable selection");
        let instance_count = self.store.instance_count() as f64;
        let attribute_count = self.store.preparation().attribute_count() as f64;
        let step_count = if self.parameters.optimization_level >= 1 {
            self.parameters.optimization_level - 1
        } else {
            ((instance_count + 1.0).log2() + (attribute_count + 1.0).log2()).ceil() as usize
        };

        self.progress.label("Variable selection: step 1");
        self.ffwbw_optimize(cost);
        self.record(EvaluationKind::GlobalOptimum, None, *cost);
        let mut best_selection = self.scorer.selected_set().clone();

        for step in 0..step_count {
            self.progress
                .label(&format!("Variable selection: step {}", step + 2));
            self.progress
                .progress((100.0 * (step as f64 + 1.0) / (step_count as f64 + 1.0)) as u32);
            if self.stop_training() {
                break;
            }

            // restart from the empty selection with a new attribute order
            self.scorer.initialize_working_data(self.store);
            let mut tested_cost = self.evaluate();
            self.record(EvaluationKind::ForcedRemoveAll, None, tested_cost);
            if self.stop_training() {
                break;
            }
            self.store.shuffle_used_attributes(self.rng);

            self.ffwbw_optimize(&mut tested_cost);
            self.record(EvaluationKind::LocalOptimum, None, tested_cost);

            if tested_cost < *cost - self.epsilon {
                *cost = tested_cost;
                best_selection = self.scorer.selected_set().clone();
                self.record(EvaluationKind::GlobalOptimum, None, *cost);
            }
        }

        self.store.restore_used_attributes();
        best_selection
    }

    // a bounded number of fast add/remove rounds with shuffles in between
    fn ffwbw_optimize(&mut self, cost: &mut f64) {
        let mut round = 0;
        let mut keep_going = true;
        while keep_going && round < FAST_PASS_ROUNDS {
            round += 1;

            self.ffw_optimize(cost);
            self.store.shuffle_used_attributes(self.rng);

            let previous_cost = *cost;
            self.fbw_optimize(cost);
            keep_going = *cost < previous_cost - self.epsilon;
            self.store.shuffle_used_attributes(self.rng);
        }
    }

    // single pass committing every improving addition
    fn ffw_optimize(&mut self, cost: &mut f64) {
        self.progress.main_label("Forward selection");
        let used = self.store.used_attributes().to_vec();
        for (position, &attribute) in used.iter().enumerate() {
            if self.scorer.is_attribute_selected(attribute) {
                continue;
            }
            self.progress
                .progress((100.0 * position as f64 / used.len() as f64) as u32);
            if self.stop_training() {
                break;
            }

            self.scorer.add_attribute(self.store, attribute);
            let new_cost = self.evaluate();
            self.record(EvaluationKind::Add, Some(attribute), new_cost);

            if new_cost < *cost - self.epsilon {
                *cost = new_cost;
                self.record(EvaluationKind::BestAdd, Some(attribute), *cost);
                self.progress.label(&format!(
                    "{} (Add {})",
                    self.scorer.selected_attribute_count(),
                    self.store.preparation().attribute_at(attribute).name()
                ));
            } else {
                self.scorer.remove_attribute(self.store, attribute);
            }
        }
    }

    // single reverse pass committing every acceptable removal
    fn fbw_optimize(&mut self, cost: &mut f64) {
        self.progress.main_label("Backward selection");
        let used = self.store.used_attributes().to_vec();
        for (position, &attribute) in used.iter().enumerate().rev() {
            if !self.scorer.is_attribute_selected(attribute) {
                continue;
            }
            self.progress
                .progress((100.0 - 100.0 * position as f64 / used.len() as f64) as u32);
            if self.stop_training() {
                break;
            }

            self.scorer.remove_attribute(self.store, attribute);
            let new_cost = self.evaluate();
            self.record(EvaluationKind::Remove, Some(attribute), new_cost);

            // a tie is enough to drop an attribute
            if new_cost < *cost + self.epsilon {
                *cost = new_cost;
                self.record(EvaluationKind::BestRemove, Some(attribute), *cost);
                self.progress.label(&format!(
                    "{} (Remove {})",
                    self.scorer.selected_attribute_count(),
                    self.store.preparation().attribute_at(attribute).name()
                ));
            } else {
                self.scorer.add_attribute(self.store, attribute);
            }
        }
    }

    // best addition per step, until no addition improves
    fn fw_optimize(&mut self, cost: &mut f64) {
        let used = self.store.used_attributes().to_vec();
        let mut keep_going = self.scorer.selected_attribute_count() < used.len();
        while keep_going {
            let mut best_cost = *cost;
            let mut best_attribute = None;
            for &attribute in &used {
                if self.scorer.is_attribute_selected(attribute) {
                    continue;
                }
                if self.stop_training() {
                    break;
                }
                self.scorer.add_attribute(self.store, attribute);
                let new_cost = self.evaluate();
                if new_cost < best_cost - self.epsilon {
                    best_cost = new_cost;
                    best_attribute = Some(attribute);
                }
                self.record(EvaluationKind::Add, Some(attribute), new_cost);
                self.scorer.remove_attribute(self.store, attribute);
            }

            if let Some(attribute) = best_attribute {
                self.scorer.add_attribute(self.store, attribute);
                *cost = best_cost;
                self.record(EvaluationKind::BestAdd, Some(attribute), *cost);
            }
            keep_going = best_attribute.is_some()
                && self.scorer.selected_attribute_count() < used.len()
                && !self.stop_training();
        }
    }

    // best single addition or removal per step
    fn fwbw_optimize(&mut self, cost: &mut f64) {
        let used = self.store.used_attributes().to_vec();
        let instance_count = self.store.instance_count() as f64;
        let attribute_count = self.store.preparation().attribute_count() as f64;
        let max_steps = ((instance_count + 1.0).ln() + (attribute_count + 1.0).ln()).ceil() as usize;

        let mut step = 0;
        let mut keep_going = self.scorer.selected_attribute_count() < used.len();
        while keep_going && step < max_steps {
            step += 1;
            let mut best_cost = *cost;
            let mut best_move: Option<(usize, bool)> = None;
            for &attribute in &used {
                if self.stop_training() {
                    break;
                }
                let adding = !self.scorer.is_attribute_selected(attribute);
                if adding {
                    self.scorer.add_attribute(self.store, attribute);
                } else {
                    self.scorer.remove_attribute(self.store, attribute);
                }
                let new_cost = self.evaluate();

                // additions need a strict improvement, removals accept ties
                let tolerance = if adding { self.epsilon } else { -self.epsilon };
                if new_cost < best_cost - tolerance {
                    best_cost = new_cost;
                    best_move = Some((attribute, adding));
                }
                self.record(
                    if adding {
                        EvaluationKind::Add
                    } else {
                        EvaluationKind::Remove
                    },
                    Some(attribute),
                    new_cost,
                );

                if adding {
                    self.scorer.remove_attribute(self.store, attribute);
                } else {
                    self.scorer.add_attribute(self.store, attribute);
                }
            }

            if let Some((attribute, adding)) = best_move {
                if adding {
                    self.scorer.add_attribute(self.store, attribute);
                } else {
                    self.scorer.remove_attribute(self.store, attribute);
                }
                *cost = best_cost;
                self.record(
                    if adding {
                        EvaluationKind::BestAdd
                    } else {
                        EvaluationKind::BestRemove
                    },
                    Some(attribute),
                    *cost,
                );
            }
            keep_going = best_move.is_some()
                && self.scorer.selected_attribute_count() < used.len()
                && !self.stop_training();
        }
    }

    // exhaustive walk over all subsets; consecutive selection ids differ by
    // few bits, each flip toggling one attribute
    fn opt_optimize(&mut self, cost: &mut f64) -> FxHashSet<usize> {
        let used = self.store.used_attributes().to_vec();
        debug_assert!(used.len() <= MAX_EXHAUSTIVE_ATTRIBUTES);
        let max_selection_id: u64 = 1 << used.len();

        self.scorer.initialize_working_data(self.store);
        let mut tested_cost = self.evaluate();
        self.record(EvaluationKind::ForcedRemoveAll, None, tested_cost);
        *cost = tested_cost;
        let mut best_selection = FxHashSet::default();

        for selection_id in 1..max_selection_id {
            if self.stop_training() {
                break;
            }
            for (position, &attribute) in used.iter().enumerate() {
                let attribute_id = 1u64 << position;
                let in_selection = selection_id & attribute_id != 0;
                let in_previous = (selection_id - 1) & attribute_id != 0;
                if in_selection && !in_previous {
                    self.scorer.add_attribute(self.store, attribute);
                    self.record(EvaluationKind::UnevaluatedAdd, Some(attribute), 0.0);
                } else if !in_selection && in_previous {
                    self.scorer.remove_attribute(self.store, attribute);
                    self.record(EvaluationKind::UnevaluatedRemove, Some(attribute), 0.0);
                }
            }

            tested_cost = self.evaluate();
            self.record(EvaluationKind::ForcedEvaluation, None, tested_cost);
            if tested_cost < *cost - self.epsilon {
                *cost = tested_cost;
                best_selection = self.scorer.selected_set().clone();
            }
        }
        best_selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_store::{ColumnStoreConfig, VecRecordSource};
    use crate::preparation::{DataPreparationClass, TargetDescription};
    use crate::progress::NoProgress;
    use crate::symbol::Symbol;
    use crate::target_partition::create_target_partition;
    use crate::weights::WeightingMethod;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    /// Synthetic classification problem: some attributes mirror the target,
    /// some are noise.
    fn build_store(
        informative: usize,
        noisy: usize,
        instances: &[(usize, usize)],
    ) -> PreparedColumnStore {
        let frequencies = instances.iter().fold([0u64; 2], |mut acc, &(_, target)| {
            acc[target] += 1;
            acc
        });
        let target = TargetDescription::Classes {
            values: vec![Symbol::from("T1"), Symbol::from("T2")],
            frequencies: frequencies.to_vec(),
            grouped: false,
        };
        // informative attributes mirror the instance source part, noisy ones
        // follow a pattern independent of the alternating targets
        let part_of = |attribute: usize, instance: usize, source: usize| {
            if attribute < informative {
                source
            } else {
                (instance / 2) % 2
            }
        };
        let mut preparation = DataPreparationClass::new(target);
        for index in 0..informative + noisy {
            let mut joint = [[0u64; 2]; 2];
            for (instance, &(source, target)) in instances.iter().enumerate() {
                joint[part_of(index, instance, source)][target] += 1;
            }
            let mut attribute = crate::preparation::tests::prepared_symbol_attribute(
                &format!("A{index}"),
                &joint,
                &["T1", "T2"],
            );
            attribute.set_sort_value(1.0 / (index as f64 + 2.0));
            preparation.add_attribute(attribute).unwrap();
        }

        let mut store = PreparedColumnStore::new(preparation, ColumnStoreConfig::default());
        store
            .set_used_attributes((0..informative + noisy).collect())
            .unwrap();
        let records: Vec<Vec<i32>> = instances
            .iter()
            .enumerate()
            .map(|(instance, &(source, target))| {
                let mut record: Vec<i32> = (0..informative + noisy)
                    .map(|index| part_of(index, instance, source) as i32 + 1)
                    .collect();
                record.push(target as i32 + 1);
                record
            })
            .collect();
        store
            .compute_prepared_data(
                &mut VecRecordSource::new(records),
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();
        store
    }

    fn predictive_instances() -> Vec<(usize, usize)> {
        // strongly predictive attribute value = target, with a little noise
        let mut instances = Vec::new();
        for index in 0..40 {
            let target = index % 2;
            let source = if index % 10 == 9 { 1 - target } else { target };
            instances.push((source, target));
        }
        instances
    }

    fn run(
        algorithm: OptimizationAlgorithm,
        store: &mut PreparedColumnStore,
    ) -> (FxHashSet<usize>, f64, f64) {
        let parameters = SelectionParameters {
            optimization_algorithm: algorithm,
            ..SelectionParameters::default()
        };
        let partition = create_target_partition(store).unwrap();
        let mut scorer = SelectionScorer::new(
            partition,
            parameters.prior_weight,
            parameters.construction_cost,
            parameters.preparation_cost,
        );
        scorer.initialize_working_data(store);
        let mut cost = scorer.compute_selection_total_cost(store);
        let initial_cost = cost;
        let epsilon = (1.0 + cost.abs()) * 1e-2 / (1.0 + store.instance_count() as f64);

        let mut weights = WeightManager::new(
            WeightingMethod::None,
            store.preparation().attribute_count(),
            store.preparation().instance_count(),
        );
        weights.record(EvaluationKind::Initial, None, 0.0, cost);

        let mut rng = Pcg64::seed_from_u64(1);
        let token = CancelToken::new();
        let mut progress = NoProgress;
        let selected = SelectionOptimizer::new(
            &mut scorer,
            store,
            &mut weights,
            &parameters,
            &mut rng,
            &token,
            &mut progress,
            epsilon,
        )
        .optimize(&mut cost);
        (selected, cost, initial_cost)
    }

    #[test]
    fn greedy_algorithms_pick_the_informative_attribute() {
        for algorithm in [
            OptimizationAlgorithm::Fw,
            OptimizationAlgorithm::Fwbw,
            OptimizationAlgorithm::Ffw,
            OptimizationAlgorithm::Ffwbw,
            OptimizationAlgorithm::MsFfwbw,
        ] {
            let mut store = build_store(2, 0, &predictive_instances());
            let (selected, cost, initial_cost) = run(algorithm, &mut store);
            assert!(
                !selected.is_empty(),
                "{algorithm:?} selected no attribute"
            );
            assert!(cost < initial_cost, "{algorithm:?} did not improve");
        }
    }

    #[test]
    fn exhaustive_search_matches_the_multi_start_cost() {
        let mut store = build_store(2, 1, &predictive_instances());
        let (_, opt_cost, _) = run(OptimizationAlgorithm::Opt, &mut store);

        let mut store = build_store(2, 1, &predictive_instances());
        let (_, ms_cost, initial_cost) = run(OptimizationAlgorithm::MsFfwbw, &mut store);

        let epsilon = (1.0 + initial_cost.abs()) * 1e-2 / (1.0 + 40.0);
        assert!(
            (opt_cost - ms_cost).abs() <= epsilon,
            "exhaustive {opt_cost} vs multi-start {ms_cost}"
        );
    }

    #[test]
    fn exhaustive_beats_or_matches_every_greedy_run() {
        let mut store = build_store(3, 1, &predictive_instances());
        let (_, opt_cost, initial_cost) = run(OptimizationAlgorithm::Opt, &mut store);
        let epsilon = (1.0 + initial_cost.abs()) * 1e-2 / (1.0 + 40.0);

        for algorithm in [OptimizationAlgorithm::Ffw, OptimizationAlgorithm::Fw] {
            let mut store = build_store(3, 1, &predictive_instances());
            let (_, cost, _) = run(algorithm, &mut store);
            assert!(opt_cost <= cost + epsilon, "{algorithm:?} beat exhaustive");
        }
    }

    #[test]
    fn cancellation_keeps_the_moves_accepted_so_far() {
        let mut store = build_store(2, 0, &predictive_instances());
        let parameters = SelectionParameters::default();
        let partition = create_target_partition(&store).unwrap();
        let mut scorer = SelectionScorer::new(partition, 0.25, true, true);
        scorer.initialize_working_data(&store);
        let mut cost = scorer.compute_selection_total_cost(&mut store);

        let mut weights = WeightManager::new(WeightingMethod::None, 2, 40);
        let mut rng = Pcg64::seed_from_u64(1);
        let token = CancelToken::new();
        token.cancel();
        let mut progress = NoProgress;
        let selected = SelectionOptimizer::new(
            &mut scorer,
            &mut store,
            &mut weights,
            &parameters,
            &mut rng,
            &token,
            &mut progress,
            1e-6,
        )
        .optimize(&mut cost);

        // cancelled before any evaluation: the empty selection survives
        assert!(selected.is_empty());
        assert!(scorer.check(&store));
    }
}
