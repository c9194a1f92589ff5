//! End-to-end Selective Naive Bayes training driver.
//!
//! The trainer assembles the column store, the target partition matching the
//! target kind, the selection scorer and the search, then reports the
//! selected attributes and optional averaging weights. Recoverable resource
//! failures degrade to a null-model report with a single warning line;
//! cancellation returns the best selection found so far.

use crate::column_store::{ColumnStoreConfig, PreparedColumnStore, RecordSource};
use crate::error::{Error, Result};
use crate::optimizer::{SelectionCriterion, SelectionOptimizer, SelectionParameters};
use crate::preparation::DataPreparationClass;
use crate::progress::{CancelToken, TrainProgress};
use crate::selection::SelectionScorer;
use crate::target_partition::create_target_partition;
use crate::weights::{EvaluationKind, WeightManager, WeightingMethod};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One attribute of the training report.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrainedAttribute {
    /// Index of the attribute in the preparation class.
    pub attribute: usize,
    /// Name of the prepared attribute.
    pub name: String,
    /// Univariate importance of the attribute.
    pub importance: f64,
    /// Averaging weight, 0 without model averaging.
    pub weight: f64,
    /// Whether the attribute belongs to the MAP selection.
    pub selected: bool,
}

/// Result of a training run: the retained attributes and the cost trail.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrainedSelection {
    /// Selected or positively weighted attributes, by decreasing importance.
    pub attributes: Vec<TrainedAttribute>,
    /// Cost of the empty selection.
    pub initial_cost: f64,
    /// Cost of the best selection found.
    pub cost: f64,
    /// Full per-attribute weight vector when model averaging is active.
    pub attribute_weights: Option<Vec<f64>>,
    /// Whether training was interrupted; the report is still well-formed.
    pub interrupted: bool,
    /// Whether training degraded to the null model.
    pub null_model: bool,
}

impl TrainedSelection {
    fn null_model(interrupted: bool) -> Self {
        Self {
            attributes: Vec::new(),
            initial_cost: 0.0,
            cost: 0.0,
            attribute_weights: None,
            interrupted,
            null_model: true,
        }
    }
}

/// Trains a Selective Naive Bayes predictor over a preparation class.
#[derive(Clone, Debug, Default)]
pub struct SelectiveNaiveBayesTrainer {
    /// Search and cost-model parameters.
    pub parameters: SelectionParameters,
    /// Resource configuration of the column store.
    pub store_config: ColumnStoreConfig,
}

impl SelectiveNaiveBayesTrainer {
    /// Constructs a trainer with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the full pipeline: materialize the prepared data, search for the
    /// MAP attribute subset, accumulate averaging weights when requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on an unrecoverable I/O failure while writing
    /// the prepared data. Resource exhaustion and cancellation are
    /// recoverable and yield a null-model or interrupted report instead.
    pub fn train(
        &self,
        preparation: DataPreparationClass,
        source: &mut dyn RecordSource,
        rng: &mut impl Rng,
        token: &CancelToken,
        progress: &mut dyn TrainProgress,
    ) -> Result<TrainedSelection> {
        progress.main_label("Selective Naive Bayes training");
        progress.label("Preparation");

        let usable =
            preparation.compute_usable_attributes(self.parameters.max_evaluated_attribute_number);
        if usable.is_empty() {
            log::warn!("no informative input variable available");
            return Ok(TrainedSelection::null_model(false));
        }

        let mut store = PreparedColumnStore::new(preparation, self.store_config.clone());
        store
            .set_used_attributes(usable)
            .expect("usable attributes are in range");

        // working data first: it is the larger allocation and may fail
        let partition = match create_target_partition(&store) {
            Ok(partition) => partition,
            Err(Error::InsufficientMemory(message)) => {
                log::warn!("unable to train the predictor: {message}");
                return Ok(TrainedSelection::null_model(false));
            }
            Err(error) => return Err(error),
        };

        match store.compute_prepared_data(source, token, progress) {
            Ok(()) => {}
            Err(Error::InsufficientMemory(message)) => {
                log::warn!("unable to train the predictor: {message}");
                return Ok(TrainedSelection::null_model(false));
            }
            Err(error @ Error::InsufficientDiskSpace { .. }) => {
                log::warn!("unable to train the predictor: {error}");
                return Ok(TrainedSelection::null_model(false));
            }
            Err(Error::Cancelled) => {
                log::warn!("train of Selective Naive Bayes predictor interrupted");
                return Ok(TrainedSelection::null_model(true));
            }
            Err(error) => return Err(error),
        }

        progress.label("Train");
        let method = match self.parameters.selection_criterion {
            SelectionCriterion::Map => WeightingMethod::None,
            SelectionCriterion::Ma => WeightingMethod::PredictorProb,
            SelectionCriterion::Cma => WeightingMethod::PredictorCompressionRate,
        };
        let mut weights = WeightManager::new(
            method,
            store.preparation().attribute_count(),
            store.preparation().instance_count(),
        );
        weights.set_trace_level(self.parameters.trace_level);

        let mut scorer = SelectionScorer::new(
            partition,
            self.parameters.prior_weight,
            self.parameters.construction_cost,
            self.parameters.preparation_cost,
        );
        scorer.initialize_working_data(&store);
        let initial_cost = scorer.compute_selection_total_cost(&mut store);

        // cost comparisons are relative to the default-model cost
        let epsilon = (1.0 + initial_cost.abs()) * 1e-2
            / (1.0 + store.preparation().instance_count() as f64);
        {
            let model_cost = scorer.compute_selection_model_cost(&store);
            weights.record(
                EvaluationKind::Initial,
                None,
                model_cost,
                initial_cost - model_cost,
            );
        }

        let mut cost = initial_cost;
        let selected = SelectionOptimizer::new(
            &mut scorer,
            &mut store,
            &mut weights,
            &self.parameters,
            rng,
            token,
            progress,
            epsilon,
        )
        .optimize(&mut cost);
        let interrupted = store.is_fill_error() || token.is_interruption_requested();

        progress.label("Register model");
        weights.record(EvaluationKind::Final, None, 0.0, cost);
        let mut attribute_weights = weights.compute_attribute_weights();

        // the report keeps every selected or positively weighted attribute
        let mut selected: Vec<usize> = selected.into_iter().collect();
        selected.sort_unstable();
        let mut attributes: Vec<TrainedAttribute> = (0..store.preparation().attribute_count())
            .filter_map(|attribute| {
                let weight = attribute_weights
                    .as_ref()
                    .map_or(0.0, |weights| weights[attribute]);
                let is_selected = selected.binary_search(&attribute).is_ok();
                (is_selected || weight > 0.0).then(|| TrainedAttribute {
                    attribute,
                    name: store.preparation().attribute_at(attribute).name().to_string(),
                    importance: store.preparation().attribute_at(attribute).sort_value(),
                    weight,
                    selected: is_selected,
                })
            })
            .collect();
        attributes.sort_by(|left, right| {
            right
                .importance
                .partial_cmp(&left.importance)
                .expect("importances are never NaN")
                .then_with(|| left.name.cmp(&right.name))
        });

        // over-limit attributes are dropped, their weights zeroed
        let max_selected = self.parameters.max_selected_attribute_number;
        if max_selected > 0 && attributes.len() > max_selected {
            for dropped in attributes.drain(max_selected..) {
                if let Some(weights) = attribute_weights.as_mut() {
                    weights[dropped.attribute] = 0.0;
                }
            }
        }

        if interrupted {
            log::warn!("train of Selective Naive Bayes predictor interrupted");
        }
        Ok(TrainedSelection {
            attributes,
            initial_cost,
            cost,
            attribute_weights,
            interrupted,
            null_model: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_store::VecRecordSource;
    use crate::preparation::TargetDescription;
    use crate::progress::NoProgress;
    use crate::symbol::Symbol;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn binary_problem(
        instances: &[(usize, usize)],
        attribute_count: usize,
    ) -> (DataPreparationClass, VecRecordSource) {
        let frequencies = instances.iter().fold([0u64; 2], |mut acc, &(_, target)| {
            acc[target] += 1;
            acc
        });
        let target = TargetDescription::Classes {
            values: vec![Symbol::from("T1"), Symbol::from("T2")],
            frequencies: frequencies.to_vec(),
            grouped: false,
        };
        let mut preparation = DataPreparationClass::new(target);
        let mut joint = [[0u64; 2]; 2];
        for &(source, target) in instances {
            joint[source][target] += 1;
        }
        for index in 0..attribute_count {
            let mut attribute = crate::preparation::tests::prepared_symbol_attribute(
                &format!("A{index}"),
                &joint,
                &["T1", "T2"],
            );
            attribute.set_sort_value(0.9 - index as f64 / 100.0);
            preparation.add_attribute(attribute).unwrap();
        }
        let records: Vec<Vec<i32>> = instances
            .iter()
            .map(|&(source, target)| {
                let mut record = vec![source as i32 + 1; attribute_count];
                record.push(target as i32 + 1);
                record
            })
            .collect();
        (preparation, VecRecordSource::new(records))
    }

    fn predictive_instances() -> Vec<(usize, usize)> {
        (0..40)
            .map(|index| {
                let target = index % 2;
                let source = if index % 10 == 9 { 1 - target } else { target };
                (source, target)
            })
            .collect()
    }

    #[test]
    fn training_selects_an_informative_attribute() {
        let (preparation, mut source) = binary_problem(&predictive_instances(), 2);
        let trainer = SelectiveNaiveBayesTrainer::new();
        let mut rng = Pcg64::seed_from_u64(1);
        let report = trainer
            .train(
                preparation,
                &mut source,
                &mut rng,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        assert!(!report.null_model);
        assert!(!report.interrupted);
        assert!(report.cost < report.initial_cost);
        assert!(report.attributes.iter().any(|attribute| attribute.selected));
    }

    #[test]
    fn no_usable_attribute_degrades_to_the_null_model() {
        let (built, mut source) = binary_problem(&predictive_instances(), 1);
        // zero importance disqualifies the only attribute
        let mut preparation = DataPreparationClass::new(built.target().clone());
        for attribute in built.attributes() {
            let mut attribute = attribute.clone();
            attribute.set_sort_value(0.0);
            preparation.add_attribute(attribute).unwrap();
        }

        let trainer = SelectiveNaiveBayesTrainer::new();
        let mut rng = Pcg64::seed_from_u64(1);
        let report = trainer
            .train(
                preparation,
                &mut source,
                &mut rng,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();
        assert!(report.null_model);
        assert!(report.attributes.is_empty());
    }

    #[test]
    fn model_averaging_produces_normalized_weights() {
        let (preparation, mut source) = binary_problem(&predictive_instances(), 3);
        let trainer = SelectiveNaiveBayesTrainer {
            parameters: SelectionParameters {
                selection_criterion: SelectionCriterion::Cma,
                ..SelectionParameters::default()
            },
            ..SelectiveNaiveBayesTrainer::default()
        };
        let mut rng = Pcg64::seed_from_u64(1);
        let report = trainer
            .train(
                preparation,
                &mut source,
                &mut rng,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        let weights = report.attribute_weights.expect("averaging was requested");
        assert!(weights.iter().all(|&weight| (0.0..=1.0).contains(&weight)));
        assert!(weights.iter().sum::<f64>() <= 1.0 + 1e-9);
        assert!(weights.iter().any(|&weight| weight > 0.0));
    }

    #[test]
    fn max_selected_attribute_number_truncates_the_report() {
        let (preparation, mut source) = binary_problem(&predictive_instances(), 4);
        let trainer = SelectiveNaiveBayesTrainer {
            parameters: SelectionParameters {
                max_selected_attribute_number: 1,
                selection_criterion: SelectionCriterion::Cma,
                ..SelectionParameters::default()
            },
            ..SelectiveNaiveBayesTrainer::default()
        };
        let mut rng = Pcg64::seed_from_u64(1);
        let report = trainer
            .train(
                preparation,
                &mut source,
                &mut rng,
                &CancelToken::new(),
                &mut NoProgress,
            )
            .unwrap();

        assert!(report.attributes.len() <= 1);
        if let Some(weights) = &report.attribute_weights {
            let reported: Vec<usize> = report
                .attributes
                .iter()
                .map(|attribute| attribute.attribute)
                .collect();
            for (attribute, &weight) in weights.iter().enumerate() {
                if !reported.contains(&attribute) {
                    assert_eq!(weight, 0.0);
                }
            }
        }
    }
}
