//! Model-averaging weights accumulated over the search trajectory.
//!
//! During the search every evaluation is appended to a typed event log; once
//! the search ends the log is replayed to accumulate one weight per
//! attribute. Weighting a selection by its compression rate or posterior
//! probability turns the trajectory into a weighted naive Bayes predictor.

use rustc_hash::FxHashSet;

/// Kind of a recorded evaluation event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvaluationKind {
    /// Cost of the initial, empty selection.
    Initial,
    /// Evaluation of an attribute addition.
    Add,
    /// An addition was accepted.
    BestAdd,
    /// Evaluation of an attribute removal.
    Remove,
    /// A removal was accepted.
    BestRemove,
    /// A local optimum was reached.
    LocalOptimum,
    /// The global best solution improved.
    GlobalOptimum,
    /// The selection was forcibly reset to empty.
    ForcedRemoveAll,
    /// An attribute was toggled in without evaluation.
    UnevaluatedAdd,
    /// An attribute was toggled out without evaluation.
    UnevaluatedRemove,
    /// The current selection was evaluated as a whole.
    ForcedEvaluation,
    /// Cost of the final retained selection.
    Final,
}

impl EvaluationKind {
    // events that change or confirm the accepted selection
    const fn is_acceptation(self) -> bool {
        matches!(
            self,
            Self::Initial
                | Self::BestAdd
                | Self::BestRemove
                | Self::ForcedEvaluation
                | Self::LocalOptimum
                | Self::GlobalOptimum
                | Self::Final
        )
    }
}

/// How the per-attribute weights are derived from the trajectory.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WeightingMethod {
    /// No averaging: only the MAP selection is reported.
    #[default]
    None,
    /// Weight a selection by its compression rate relative to the initial
    /// cost, clipped at 0.
    PredictorCompressionRate,
    /// Weight a selection by `exp(finalCost - cost)`.
    PredictorProb,
}

#[derive(Clone, Debug)]
struct EvaluationRecord {
    kind: EvaluationKind,
    attribute: Option<usize>,
    model_cost: f64,
    data_cost: f64,
}

impl EvaluationRecord {
    fn total_cost(&self) -> f64 {
        self.model_cost + self.data_cost
    }
}

/// Event log of the selection search with post-hoc weight computation.
#[derive(Debug)]
pub struct WeightManager {
    method: WeightingMethod,
    attribute_count: usize,
    instance_count: u64,
    records: Vec<EvaluationRecord>,
    trace_level: u8,
}

impl WeightManager {
    /// Constructs a manager over `attribute_count` prepared attributes.
    #[must_use]
    pub fn new(method: WeightingMethod, attribute_count: usize, instance_count: u64) -> Self {
        Self {
            method,
            attribute_count,
            instance_count,
            records: Vec::new(),
            trace_level: 0,
        }
    }

    /// The configured weighting method.
    #[must_use]
    pub const fn method(&self) -> WeightingMethod {
        self.method
    }

    /// Sets the trace level, 0 (silent) to 3 (every evaluation).
    pub fn set_trace_level(&mut self, trace_level: u8) {
        self.trace_level = trace_level;
    }

    /// Drops every recorded evaluation.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Appends one evaluation event. Costs are ignored for unevaluated
    /// toggles.
    pub fn record(
        &mut self,
        kind: EvaluationKind,
        attribute: Option<usize>,
        model_cost: f64,
        data_cost: f64,
    ) {
        let record = EvaluationRecord {
            kind,
            attribute,
            model_cost,
            data_cost,
        };
        if self.trace_level >= 3
            || (self.trace_level == 2 && kind.is_acceptation())
            || (self.trace_level == 1
                && matches!(
                    kind,
                    EvaluationKind::Initial
                        | EvaluationKind::LocalOptimum
                        | EvaluationKind::GlobalOptimum
                        | EvaluationKind::Final
                ))
        {
            log::debug!(
                "{kind:?}\tattribute {attribute:?}\tcost {}",
                record.total_cost()
            );
        }
        if self.method != WeightingMethod::None {
            self.records.push(record);
        }
    }

    /// Replays the trajectory into a per-attribute weight vector, normalized
    /// and thresholded at `1/(N+1)`. Returns `None` when no averaging was
    /// requested.
    #[must_use]
    pub fn compute_attribute_weights(&self) -> Option<Vec<f64>> {
        if self.method == WeightingMethod::None {
            return None;
        }
        debug_assert!(self.records.len() >= 2);
        debug_assert_eq!(self.records[0].kind, EvaluationKind::Initial);
        debug_assert_eq!(
            self.records.last().map(|record| record.kind),
            Some(EvaluationKind::Final)
        );
        let initial_cost = self.records[0].total_cost();
        let final_cost = self
            .records
            .last()
            .map_or(initial_cost, EvaluationRecord::total_cost);
        let weight_threshold = 1.0 / (self.instance_count as f64 + 1.0);

        let mut weights = vec![0.0; self.attribute_count];
        let mut selected: FxHashSet<usize> = FxHashSet::default();
        let mut total_weight = 0.0;
        for record in &self.records {
            let weight = match self.method {
                WeightingMethod::PredictorCompressionRate => {
                    // selections worse than the default model are ignored
                    ((initial_cost - record.total_cost()) / initial_cost).max(0.0)
                }
                WeightingMethod::PredictorProb => (final_cost - record.total_cost()).exp(),
                WeightingMethod::None => unreachable!(),
            };

            match record.kind {
                EvaluationKind::Add => {
                    total_weight += weight;
                    for &attribute in &selected {
                        weights[attribute] += weight;
                    }
                    weights[record.attribute.expect("add records carry an attribute")] += weight;
                }
                EvaluationKind::Remove => {
                    total_weight += weight;
                    for &attribute in &selected {
                        weights[attribute] += weight;
                    }
                    weights[record.attribute.expect("remove records carry an attribute")] -=
                        weight;
                }
                EvaluationKind::ForcedEvaluation => {
                    total_weight += weight;
                    for &attribute in &selected {
                        weights[attribute] += weight;
                    }
                }
                _ => {}
            }

            // replay the accepted-selection state
            match record.kind {
                EvaluationKind::BestAdd | EvaluationKind::UnevaluatedAdd => {
                    selected.insert(record.attribute.expect("add records carry an attribute"));
                }
                EvaluationKind::BestRemove | EvaluationKind::UnevaluatedRemove => {
                    selected.remove(&record.attribute.expect("remove records carry an attribute"));
                }
                EvaluationKind::ForcedRemoveAll => selected.clear(),
                _ => {}
            }
        }

        if total_weight > 0.0 {
            for weight in &mut weights {
                *weight /= total_weight;
                if *weight < weight_threshold {
                    *weight = 0.0;
                }
            }
        }
        Some(weights)
    }
}
