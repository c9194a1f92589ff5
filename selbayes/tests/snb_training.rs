//! End-to-end scenarios: grid round trips, chunked stores and the full
//! selection pipeline.

use rand::RngExt;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use selbayes::column_store::{ColumnStoreConfig, PreparedColumnStore, VecRecordSource};
use selbayes::grid::DataGrid;
use selbayes::grid_stats::{AttributePartition, AttributeStats, DataGridStats};
use selbayes::optimizer::{OptimizationAlgorithm, SelectionParameters};
use selbayes::preparation::{DataPreparationClass, PreparedAttribute, TargetDescription};
use selbayes::progress::{CancelToken, NoProgress, TrainProgress};
use selbayes::symbol::Symbol;
use selbayes::trainer::SelectiveNaiveBayesTrainer;

/// Binary-classification instances as (per-attribute source parts, target).
struct Problem {
    sources: Vec<Vec<usize>>,
    targets: Vec<usize>,
    part_counts: Vec<usize>,
}

impl Problem {
    fn attribute_count(&self) -> usize {
        self.part_counts.len()
    }

    fn instance_count(&self) -> usize {
        self.targets.len()
    }

    fn preparation(&self) -> DataPreparationClass {
        let mut frequencies = [0u64; 2];
        for &target in &self.targets {
            frequencies[target] += 1;
        }
        let target = TargetDescription::Classes {
            values: vec![Symbol::from("T1"), Symbol::from("T2")],
            frequencies: frequencies.to_vec(),
            grouped: false,
        };
        let mut preparation = DataPreparationClass::new(target);
        for attribute in 0..self.attribute_count() {
            let part_count = self.part_counts[attribute];
            let source_values: Vec<Symbol> = (1..=part_count)
                .map(|part| Symbol::new(format!("V{part}")))
                .collect();
            let mut stats = DataGridStats::new(
                vec![
                    AttributeStats::new(
                        format!("A{attribute}"),
                        AttributePartition::SymbolValues { values: source_values },
                    ),
                    AttributeStats::new(
                        "Class",
                        AttributePartition::SymbolValues {
                            values: vec![Symbol::from("T1"), Symbol::from("T2")],
                        },
                    ),
                ],
                1,
                0,
            )
            .unwrap();
            let mut joint = vec![[0u64; 2]; part_count];
            for (instance, &target) in self.targets.iter().enumerate() {
                joint[self.sources[instance][attribute]][target] += 1;
            }
            for (part, row) in joint.iter().enumerate() {
                for (target_part, &frequency) in row.iter().enumerate() {
                    stats.set_cell_frequency(&[part, target_part], frequency);
                }
            }
            let mut prepared = PreparedAttribute::new(stats).unwrap();
            prepared.set_sort_value(1.0 - attribute as f64 / 1000.0);
            preparation.add_attribute(prepared).unwrap();
        }
        preparation
    }

    fn record_source(&self) -> VecRecordSource {
        VecRecordSource::new(
            (0..self.instance_count())
                .map(|instance| {
                    let mut record: Vec<i32> = self.sources[instance]
                        .iter()
                        .map(|&source| source as i32 + 1)
                        .collect();
                    record.push(self.targets[instance] as i32 + 1);
                    record
                })
                .collect(),
        )
    }
}

/// Random binary problem where each attribute mirrors the target with its
/// own accuracy.
fn random_problem(rng: &mut Pcg64, attribute_count: usize, instance_count: usize) -> Problem {
    let accuracies: Vec<f64> = (0..attribute_count)
        .map(|_| 0.5 + 0.4 * rng.random::<f64>())
        .collect();
    let mut sources = Vec::with_capacity(instance_count);
    let mut targets = Vec::with_capacity(instance_count);
    for instance in 0..instance_count {
        let target = instance % 2;
        sources.push(
            accuracies
                .iter()
                .map(|&accuracy| {
                    if rng.random::<f64>() < accuracy {
                        target
                    } else {
                        1 - target
                    }
                })
                .collect(),
        );
        targets.push(target);
    }
    Problem {
        sources,
        targets,
        part_counts: vec![2; attribute_count],
    }
}

fn train_with(
    problem: &Problem,
    algorithm: OptimizationAlgorithm,
    seed: u64,
) -> selbayes::trainer::TrainedSelection {
    let trainer = SelectiveNaiveBayesTrainer {
        parameters: SelectionParameters {
            optimization_algorithm: algorithm,
            ..SelectionParameters::default()
        },
        ..SelectiveNaiveBayesTrainer::default()
    };
    let mut rng = Pcg64::seed_from_u64(seed);
    trainer
        .train(
            problem.preparation(),
            &mut problem.record_source(),
            &mut rng,
            &CancelToken::new(),
            &mut NoProgress,
        )
        .unwrap()
}

#[test]
fn binary_classification_on_five_instances() {
    // two binary attributes, targets {T1, T2}, total frequency 5
    let problem = Problem {
        sources: vec![
            vec![0, 0],
            vec![0, 0],
            vec![1, 0],
            vec![1, 1],
            vec![1, 1],
        ],
        targets: vec![0, 0, 0, 1, 1],
        part_counts: vec![2, 2],
    };

    let report = train_with(&problem, OptimizationAlgorithm::Fwbw, 1);
    assert!(!report.null_model);
    assert!(report.cost < report.initial_cost);

    // with only four subsets, the exhaustive search gives the reference MAP
    // cost the forward-backward search must reach
    let exhaustive = train_with(&problem, OptimizationAlgorithm::Opt, 1);
    let epsilon = (1.0 + report.initial_cost.abs()) * 1e-2 / (1.0 + 5.0);
    assert!((report.cost - exhaustive.cost).abs() <= epsilon);
}

#[test]
fn import_export_round_trip_through_a_grid() {
    let mut stats = DataGridStats::new(
        vec![
            AttributeStats::new("X1", AttributePartition::Discretization { bounds: vec![0.0] }),
            AttributeStats::new(
                "X2",
                AttributePartition::Discretization { bounds: vec![-2.0, 2.0] },
            ),
            AttributeStats::new("X3", AttributePartition::Discretization { bounds: vec![1.5] }),
            AttributeStats::new(
                "Class",
                AttributePartition::SymbolValues {
                    values: vec![Symbol::from("T1"), Symbol::from("T2")],
                },
            ),
        ],
        1,
        3,
    )
    .unwrap();
    let mut rng = Pcg64::seed_from_u64(11);
    let mut part_indexes = vec![0usize; 4];
    for cell in 0..stats.total_grid_size() {
        stats.compute_part_indexes(cell, &mut part_indexes);
        stats.set_cell_frequency(&part_indexes, rng.random_range(0..5));
    }

    let mut grid = DataGrid::new();
    grid.import_data_grid_stats(&stats).unwrap();
    grid.check().unwrap();
    assert_eq!(grid.grid_frequency(), stats.compute_grid_frequency());

    let exported = grid.export_data_grid_stats().unwrap();
    assert_eq!(exported, stats);
}

#[test]
fn chunked_store_over_a_thousand_instances() {
    let mut rng = Pcg64::seed_from_u64(5);
    let problem = random_problem(&mut rng, 30, 1000);
    let dir = tempfile::tempdir().unwrap();

    // budget sized for 10 resident columns
    let column_memory = 4096 + 1000 * 4 + 64 * 1024;
    let config = ColumnStoreConfig {
        memory_limit: 2 * 10 * column_memory + 2 * column_memory,
        temp_dir: dir.path().to_path_buf(),
        ..ColumnStoreConfig::default()
    };
    let mut store = PreparedColumnStore::new(problem.preparation(), config);
    store.set_used_attributes((0..30).collect()).unwrap();
    store
        .compute_prepared_data(
            &mut problem.record_source(),
            &CancelToken::new(),
            &mut NoProgress,
        )
        .unwrap();
    assert!(store.chunk_count() >= 3);

    // a sequential scan over every attribute succeeds and matches the source
    let mut recodings = Vec::new();
    for attribute in 0..30 {
        store.fill_recoding_indexes_at(attribute, &mut recodings);
        for (instance, &index) in recodings.iter().enumerate() {
            assert_eq!(index as usize, problem.sources[instance][attribute]);
        }
    }
    assert!(!store.is_fill_error());

    // exactly one temp file per chunk while the store lives, none after
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        store.chunk_count()
    );
    drop(store);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn exhaustive_and_multi_start_agree_on_small_problems() {
    let mut agreements = 0;
    let dataset_count = 20;
    for seed in 0..dataset_count {
        let mut rng = Pcg64::seed_from_u64(100 + seed);
        let problem = random_problem(&mut rng, 6, 500);

        let exhaustive = train_with(&problem, OptimizationAlgorithm::Opt, seed);
        let multi_start = train_with(&problem, OptimizationAlgorithm::MsFfwbw, seed);

        let epsilon = (1.0 + exhaustive.initial_cost.abs()) * 1e-2 / (1.0 + 500.0);
        if (exhaustive.cost - multi_start.cost).abs() <= epsilon {
            agreements += 1;
        }
        // the exhaustive optimum is never beaten
        assert!(multi_start.cost >= exhaustive.cost - epsilon);
    }
    assert!(
        agreements * 100 >= dataset_count * 95,
        "only {agreements}/{dataset_count} agreements"
    );
}

/// Progress sink that cancels the token at the first accepted addition.
struct CancelOnFirstAdd<'a> {
    token: &'a CancelToken,
}

impl TrainProgress for CancelOnFirstAdd<'_> {
    fn label(&mut self, label: &str) {
        if label.contains("(Add ") {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_after_the_first_accepted_add_is_clean() {
    let mut rng = Pcg64::seed_from_u64(21);
    let problem = random_problem(&mut rng, 8, 100);
    let dir = tempfile::tempdir().unwrap();

    let trainer = SelectiveNaiveBayesTrainer {
        store_config: ColumnStoreConfig {
            temp_dir: dir.path().to_path_buf(),
            ..ColumnStoreConfig::default()
        },
        ..SelectiveNaiveBayesTrainer::default()
    };
    let token = CancelToken::new();
    let mut progress = CancelOnFirstAdd { token: &token };
    let mut train_rng = Pcg64::seed_from_u64(3);
    let report = trainer
        .train(
            problem.preparation(),
            &mut problem.record_source(),
            &mut train_rng,
            &token,
            &mut progress,
        )
        .unwrap();

    // the selection holds exactly the attributes accepted before the flag
    assert!(report.interrupted);
    assert!(!report.null_model);
    let selected: Vec<_> = report
        .attributes
        .iter()
        .filter(|attribute| attribute.selected)
        .collect();
    assert_eq!(selected.len(), 1);

    // no temp file leaks
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn training_report_serializes_round_trip() {
    let mut rng = Pcg64::seed_from_u64(2);
    let problem = random_problem(&mut rng, 4, 60);
    let report = train_with(&problem, OptimizationAlgorithm::MsFfwbw, 4);

    let encoded = bincode::serialize(&report).unwrap();
    let decoded: selbayes::trainer::TrainedSelection = bincode::deserialize(&encoded).unwrap();
    assert_eq!(decoded, report);
}
