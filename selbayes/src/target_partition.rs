//! Target partitions: per-instance score bookkeeping for the selection
//! search.
//!
//! A target partition maintains, for every part of the current partition of
//! the target values and every training instance, the running sum of
//! log-univariate-conditionals of the selected attributes. Adding an
//! attribute first refines the partition so it stays at least as fine as the
//! attribute's univariate target partition, then accumulates the attribute's
//! conditionals with weight +1; removing accumulates with weight -1 first,
//! then coarsens.
//!
//! Three variants cover the target kinds: a fixed array of parts for a plain
//! symbolic target, an ordered interval list for a rank (regression) target,
//! and a signature-keyed set of value groups for a grouped symbolic target.

use crate::column_store::PreparedColumnStore;
use crate::error::{Error, Result};
use crate::preparation::TargetDescription;
use enum_dispatch::enum_dispatch;
use rustc_hash::FxHashMap;

/// Interface every target partition variant implements.
#[enum_dispatch]
pub trait TargetPartition {
    /// Resets the partition to the empty-selection state.
    fn initialize(&mut self, store: &PreparedColumnStore);

    /// Refines the partition with the univariate target partition of
    /// `attribute`.
    fn add_attribute(&mut self, store: &PreparedColumnStore, attribute: usize);

    /// Coarsens the partition by dropping the contribution of `attribute` to
    /// its structure.
    fn remove_attribute(&mut self, store: &PreparedColumnStore, attribute: usize);

    /// Accumulates `weight` times the conditional log-probabilities of
    /// `attribute` into every part's score vector. The partition must be at
    /// least as fine as the attribute's univariate target partition.
    fn upgrade_conditional_probs(
        &mut self,
        store: &mut PreparedColumnStore,
        attribute: usize,
        weight: f64,
    );

    /// Negative log-likelihood of the training targets under the current
    /// scores, Laplace-smoothed.
    fn data_cost(&mut self, store: &PreparedColumnStore) -> f64;

    /// Number of parts of the current partition.
    fn part_count(&self) -> usize;

    /// Validates the partition structure against the store.
    fn check(&self, store: &PreparedColumnStore) -> bool;
}

/// The target partition variants, dispatched statically.
#[enum_dispatch(TargetPartition)]
#[derive(Debug)]
pub enum TargetPartitionEnum {
    /// Fixed partition, one part per target value.
    FixedClassifierPartition,
    /// Ordered interval partition of a rank target.
    RegressorPartition,
    /// Signature-keyed partition of grouped target values.
    GeneralizedClassifierPartition,
}

/// Creates the target partition variant matching the store's target
/// description.
///
/// # Errors
///
/// Returns [`Error::InsufficientMemory`] when the per-part score vectors
/// cannot be allocated.
pub fn create_target_partition(store: &PreparedColumnStore) -> Result<TargetPartitionEnum> {
    match store.preparation().target() {
        TargetDescription::Classes { grouped: false, .. } => {
            Ok(FixedClassifierPartition::new(store)?.into())
        }
        TargetDescription::Classes { grouped: true, .. } => {
            Ok(GeneralizedClassifierPartition::new(store)?.into())
        }
        TargetDescription::Ranks { .. } => Ok(RegressorPartition::new(store)?.into()),
    }
}

// score-vector allocation that reports memory exhaustion instead of aborting
fn new_score_vector(instance_count: usize) -> Result<Vec<f64>> {
    let mut scores: Vec<f64> = Vec::new();
    scores.try_reserve_exact(instance_count).map_err(|_| {
        Error::InsufficientMemory(format!("score vector of size {instance_count}"))
    })?;
    scores.resize(instance_count, 0.0);
    Ok(scores)
}

struct LaplaceTerms {
    epsilon: f64,
    ln_denominator: f64,
    max_exp_score: f64,
    max_score: f64,
}

// epsilon e gives p_laplace = (p * n + e) / (n + j * e); the exp ceiling
// keeps score differences finite
fn laplace_terms(instance_count: f64, epsilon: f64, class_count: f64) -> LaplaceTerms {
    let max_exp_score = f64::MAX / instance_count.max(1.0);
    LaplaceTerms {
        epsilon,
        ln_denominator: epsilon.mul_add(class_count, instance_count).ln(),
        max_exp_score,
        max_score: max_exp_score.ln(),
    }
}

////////////////////////////////////////////////////////////////////////////
// Fixed classifier

/// Fixed target partition of a plain symbolic target: one part per target
/// value, each holding a per-instance score vector.
#[derive(Debug)]
pub struct FixedClassifierPartition {
    scores: Vec<Vec<f64>>,
    target_frequencies: Vec<u64>,
    instance_count: usize,
}

impl FixedClassifierPartition {
    /// Allocates one score vector per target value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientMemory`] when a score vector cannot be
    /// allocated.
    pub fn new(store: &PreparedColumnStore) -> Result<Self> {
        let TargetDescription::Classes { frequencies, .. } = store.preparation().target() else {
            panic!("fixed classifier partition needs a symbolic target")
        };
        let instance_count = store.preparation().instance_count() as usize;
        let mut scores = Vec::with_capacity(frequencies.len());
        for _ in 0..frequencies.len() {
            scores.push(new_score_vector(instance_count)?);
        }
        Ok(Self {
            scores,
            target_frequencies: frequencies.clone(),
            instance_count,
        })
    }

    /// Score vector of the target value at `target`.
    #[must_use]
    pub fn scores_at(&self, target: usize) -> &[f64] {
        &self.scores[target]
    }
}

impl TargetPartition for FixedClassifierPartition {
    fn initialize(&mut self, _store: &PreparedColumnStore) {
        // empty selection: every instance scores the target prior
        let instance_count = self.instance_count as f64;
        for (target, scores) in self.scores.iter_mut().enumerate() {
            debug_assert!(self.target_frequencies[target] > 0);
            let prior = (self.target_frequencies[target] as f64 / instance_count).ln();
            scores.fill(prior);
        }
    }

    fn add_attribute(&mut self, _store: &PreparedColumnStore, _attribute: usize) {
        // the partition is fixed
    }

    fn remove_attribute(&mut self, _store: &PreparedColumnStore, _attribute: usize) {
        // the partition is fixed
    }

    fn upgrade_conditional_probs(
        &mut self,
        store: &mut PreparedColumnStore,
        attribute: usize,
        weight: f64,
    ) {
        debug_assert_eq!(
            store.preparation().attribute_at(attribute).target_part_count(),
            self.scores.len()
        );
        for (target, scores) in self.scores.iter_mut().enumerate() {
            store.upgrade_target_conditional_ln_probs_at(attribute, target, weight, scores);
        }
    }

    fn data_cost(&mut self, store: &PreparedColumnStore) -> f64 {
        let class_count = self.scores.len();
        let instance_count = self.instance_count as f64;
        let terms = laplace_terms(instance_count, 0.5 / class_count as f64, class_count as f64);

        let mut data_cost = 0.0;
        for (instance, &target_index) in store.target_indexes().iter().enumerate() {
            let actual = target_index as usize;
            let actual_score = self.scores[actual][instance];

            // -ln P(y|x) = ln sum_j exp(score_j - score_actual)
            let mut inverse_prob = 0.0;
            for (target, scores) in self.scores.iter().enumerate() {
                if target == actual {
                    inverse_prob += 1.0;
                } else {
                    let delta = scores[instance] - actual_score;
                    inverse_prob += if delta >= terms.max_score {
                        terms.max_exp_score
                    } else {
                        delta.exp()
                    };
                }
            }
            debug_assert!(inverse_prob >= 1.0);
            data_cost -= (instance_count / inverse_prob + terms.epsilon).ln();
        }
        instance_count.mul_add(terms.ln_denominator, data_cost)
    }

    fn part_count(&self) -> usize {
        self.scores.len()
    }

    fn check(&self, store: &PreparedColumnStore) -> bool {
        self.scores.len() == self.target_frequencies.len()
            && self
                .scores
                .iter()
                .all(|scores| scores.len() == store.instance_count())
    }
}

////////////////////////////////////////////////////////////////////////////
// Regressor

#[derive(Debug)]
struct RankInterval {
    frequency: u64,
    cumulative_frequency: u64,
    ref_count: u32,
    scores: Vec<f64>,
}

/// Ordered interval partition of a rank target.
///
/// Every selected attribute contributes its own univariate rank partition;
/// the current multivariate partition is the coarsest common refinement,
/// maintained by splitting on add and reference-counted merging on remove.
#[derive(Debug)]
pub struct RegressorPartition {
    intervals: Vec<RankInterval>,
    part_indexes: Vec<usize>,
    free_scores: Vec<Vec<f64>>,
    instance_count: usize,
}

impl RegressorPartition {
    /// Allocates the single-interval initial partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientMemory`] when the score vector or the
    /// part index vector cannot be allocated.
    pub fn new(store: &PreparedColumnStore) -> Result<Self> {
        let instance_count = store.preparation().instance_count() as usize;
        let scores = new_score_vector(instance_count)?;
        let mut part_indexes = Vec::new();
        part_indexes
            .try_reserve_exact(instance_count)
            .map_err(|_| {
                Error::InsufficientMemory(format!("part index vector of size {instance_count}"))
            })?;
        part_indexes.resize(instance_count, 0);
        Ok(Self {
            intervals: vec![RankInterval {
                frequency: instance_count as u64,
                cumulative_frequency: instance_count as u64,
                ref_count: 1,
                scores,
            }],
            part_indexes,
            free_scores: Vec::new(),
            instance_count,
        })
    }

    fn take_score_vector(&mut self) -> Vec<f64> {
        self.free_scores
            .pop()
            .unwrap_or_else(|| vec![0.0; self.instance_count])
    }

    // cumulative boundaries of the attribute's univariate rank partition
    fn attribute_boundaries(store: &PreparedColumnStore, attribute: usize) -> Vec<u64> {
        let mut cumulative = 0;
        store
            .preparation()
            .attribute_at(attribute)
            .target_part_frequencies()
            .iter()
            .map(|&frequency| {
                cumulative += frequency;
                cumulative
            })
            .collect()
    }
}

impl TargetPartition for RegressorPartition {
    fn initialize(&mut self, _store: &PreparedColumnStore) {
        while self.intervals.len() > 1 {
            let interval = self.intervals.pop().expect("length checked");
            self.free_scores.push(interval.scores);
        }
        let interval = &mut self.intervals[0];
        interval.frequency = self.instance_count as u64;
        interval.cumulative_frequency = interval.frequency;
        interval.ref_count = 1;
        interval.scores.fill(0.0);
    }

    fn add_attribute(&mut self, store: &PreparedColumnStore, attribute: usize) {
        let boundaries = Self::attribute_boundaries(store, attribute);
        let mut position = 0usize;
        for &boundary in &boundaries {
            while self.intervals[position].cumulative_frequency < boundary {
                position += 1;
            }
            if self.intervals[position].cumulative_frequency == boundary {
                self.intervals[position].ref_count += 1;
            } else {
                // the boundary falls inside the interval: split it, the new
                // left half inheriting the scores
                let lower = self.intervals[position].cumulative_frequency
                    - self.intervals[position].frequency;
                let left_frequency = boundary - lower;
                let mut scores = self.take_score_vector();
                scores.copy_from_slice(&self.intervals[position].scores);
                self.intervals[position].frequency -= left_frequency;
                self.intervals.insert(
                    position,
                    RankInterval {
                        frequency: left_frequency,
                        cumulative_frequency: boundary,
                        ref_count: 1,
                        scores,
                    },
                );
            }
            position += 1;
        }
        debug_assert_eq!(
            self.intervals.last().map(|interval| interval.cumulative_frequency),
            Some(self.instance_count as u64)
        );
    }

    fn remove_attribute(&mut self, store: &PreparedColumnStore, attribute: usize) {
        let boundaries = Self::attribute_boundaries(store, attribute);
        let mut position = 0usize;
        for &boundary in &boundaries {
            while self.intervals[position].cumulative_frequency < boundary {
                position += 1;
            }
            debug_assert_eq!(self.intervals[position].cumulative_frequency, boundary);
            self.intervals[position].ref_count -= 1;
            if self.intervals[position].ref_count == 0 {
                // merge the dropped interval into its successor
                let removed = self.intervals.remove(position);
                self.intervals[position].frequency += removed.frequency;
                self.free_scores.push(removed.scores);
            } else {
                position += 1;
            }
        }
    }

    fn upgrade_conditional_probs(
        &mut self,
        store: &mut PreparedColumnStore,
        attribute: usize,
        weight: f64,
    ) {
        let frequencies = store
            .preparation()
            .attribute_at(attribute)
            .target_part_frequencies();
        let mut attribute_part = 0usize;
        let mut attribute_cumulative = 0u64;
        for interval in &mut self.intervals {
            if interval.cumulative_frequency > attribute_cumulative {
                attribute_cumulative += frequencies[attribute_part];
                attribute_part += 1;
            }
            debug_assert!(interval.cumulative_frequency <= attribute_cumulative);
            store.upgrade_target_conditional_ln_probs_at(
                attribute,
                attribute_part - 1,
                weight,
                &mut interval.scores,
            );
        }
        debug_assert_eq!(attribute_cumulative, self.instance_count as u64);
    }

    fn data_cost(&mut self, store: &PreparedColumnStore) -> f64 {
        // rank -> interval index, rebuilt from the cumulative frequencies
        let mut rank = 0usize;
        for (interval_index, interval) in self.intervals.iter().enumerate() {
            while (rank as u64) < interval.cumulative_frequency {
                self.part_indexes[rank] = interval_index;
                rank += 1;
            }
        }

        let instance_count = self.instance_count as f64;
        let terms = laplace_terms(
            instance_count,
            0.5 / (instance_count + 1.0),
            instance_count,
        );

        let mut data_cost = 0.0;
        for (instance, &target_index) in store.target_indexes().iter().enumerate() {
            let actual_part = self.part_indexes[target_index as usize];
            let actual_score = self.intervals[actual_part].scores[instance];

            // rank probabilities are constant inside an interval, so each
            // interval weighs its exponential by its frequency
            let mut inverse_prob = 0.0;
            for (interval_index, interval) in self.intervals.iter().enumerate() {
                let frequency = interval.frequency as f64;
                if interval_index == actual_part {
                    inverse_prob += frequency;
                } else {
                    let delta = interval.scores[instance] - actual_score;
                    inverse_prob += frequency
                        * if delta >= terms.max_score {
                            terms.max_exp_score
                        } else {
                            delta.exp()
                        };
                }
            }
            debug_assert!(inverse_prob >= 1.0);
            data_cost -= (instance_count / inverse_prob + terms.epsilon).ln();
        }
        instance_count.mul_add(terms.ln_denominator, data_cost)
    }

    fn part_count(&self) -> usize {
        self.intervals.len()
    }

    fn check(&self, store: &PreparedColumnStore) -> bool {
        let mut cumulative = 0u64;
        for interval in &self.intervals {
            if interval.frequency == 0 || interval.ref_count == 0 {
                return false;
            }
            cumulative += interval.frequency;
            if interval.cumulative_frequency != cumulative
                || interval.scores.len() != store.instance_count()
            {
                return false;
            }
        }
        cumulative == self.instance_count as u64
    }
}

////////////////////////////////////////////////////////////////////////////
// Generalized classifier

#[derive(Debug)]
struct ValueGroupPart {
    frequency: u64,
    signature: Vec<usize>,
    scores: Vec<f64>,
}

/// Signature-keyed target partition of a grouped symbolic target.
///
/// The signature of a target value is the tuple of group indices assigned to
/// it by each selected attribute's univariate target grouping; two values
/// share a part exactly when their signatures are equal.
#[derive(Debug)]
pub struct GeneralizedClassifierPartition {
    parts: Vec<Option<ValueGroupPart>>,
    active_parts: Vec<usize>,
    value_parts: Vec<usize>,
    free_slots: Vec<usize>,
    free_scores: Vec<Vec<f64>>,
    signature_attributes: Vec<usize>,
    matchings: FxHashMap<usize, Vec<usize>>,
    target_frequencies: Vec<u64>,
    instance_count: usize,
}

impl GeneralizedClassifierPartition {
    /// Allocates the single-part initial partition and the per-attribute
    /// target group matchings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientMemory`] when the initial score vector
    /// cannot be allocated.
    pub fn new(store: &PreparedColumnStore) -> Result<Self> {
        let TargetDescription::Classes {
            values,
            frequencies,
            ..
        } = store.preparation().target()
        else {
            panic!("generalized classifier partition needs a symbolic target")
        };
        let instance_count = store.preparation().instance_count() as usize;

        let mut matchings = FxHashMap::default();
        for &attribute in store.used_attributes() {
            matchings.insert(
                attribute,
                store
                    .preparation()
                    .attribute_at(attribute)
                    .target_group_matching(values),
            );
        }

        let scores = new_score_vector(instance_count)?;
        Ok(Self {
            parts: vec![Some(ValueGroupPart {
                frequency: instance_count as u64,
                signature: Vec::new(),
                scores,
            })],
            active_parts: vec![0],
            value_parts: vec![0; values.len()],
            free_slots: Vec::new(),
            free_scores: Vec::new(),
            signature_attributes: Vec::new(),
            matchings,
            target_frequencies: frequencies.clone(),
            instance_count,
        })
    }

    fn part(&self, slot: usize) -> &ValueGroupPart {
        self.parts[slot].as_ref().expect("live part slot")
    }

    fn part_mut(&mut self, slot: usize) -> &mut ValueGroupPart {
        self.parts[slot].as_mut().expect("live part slot")
    }

    fn new_part(&mut self, part: ValueGroupPart) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.parts[slot] = Some(part);
            slot
        } else {
            self.parts.push(Some(part));
            self.parts.len() - 1
        }
    }

    fn release_part(&mut self, slot: usize) {
        let part = self.parts[slot].take().expect("live part slot");
        self.free_scores.push(part.scores);
        self.free_slots.push(slot);
    }

    fn take_score_vector(&mut self) -> Vec<f64> {
        self.free_scores
            .pop()
            .unwrap_or_else(|| vec![0.0; self.instance_count])
    }

    fn signature_of_value(&self, value: usize) -> Vec<usize> {
        self.signature_attributes
            .iter()
            .map(|attribute| self.matchings[attribute][value])
            .collect()
    }
}

impl TargetPartition for GeneralizedClassifierPartition {
    fn initialize(&mut self, _store: &PreparedColumnStore) {
        let first = self.active_parts[0];
        for position in 1..self.active_parts.len() {
            let slot = self.active_parts[position];
            self.release_part(slot);
        }
        self.active_parts.truncate(1);
        self.signature_attributes.clear();

        let instance_count = self.instance_count as u64;
        let part = self.part_mut(first);
        part.frequency = instance_count;
        part.signature.clear();
        part.scores.fill(0.0);
        self.value_parts.fill(first);
    }

    fn add_attribute(&mut self, _store: &PreparedColumnStore, attribute: usize) {
        debug_assert!(!self.signature_attributes.contains(&attribute));
        let matching = self.matchings[&attribute].clone();

        // (initial part, new group) -> refined part
        let mut sub_parts: FxHashMap<(usize, usize), usize> = FxHashMap::default();
        let mut split_parts: Vec<usize> = Vec::new();
        for value in 0..self.value_parts.len() {
            let initial = self.value_parts[value];
            let group = matching[value];
            let value_frequency = self.target_frequencies[value];

            let refined = if let Some(&slot) = sub_parts.get(&(initial, group)) {
                self.part_mut(slot).frequency += value_frequency;
                slot
            } else if split_parts.contains(&initial) {
                // another group already claimed the initial part: branch off
                // a copy with the shortened signature plus the new group
                let mut signature = self.part(initial).signature.clone();
                signature.pop();
                signature.push(group);
                let mut scores = self.take_score_vector();
                scores.copy_from_slice(&self.part(initial).scores);
                let slot = self.new_part(ValueGroupPart {
                    frequency: value_frequency,
                    signature,
                    scores,
                });
                self.active_parts.push(slot);
                sub_parts.insert((initial, group), slot);
                slot
            } else {
                // first group seen for this part: reuse it in place
                split_parts.push(initial);
                let part = self.part_mut(initial);
                part.frequency = value_frequency;
                part.signature.push(group);
                sub_parts.insert((initial, group), initial);
                initial
            };
            self.value_parts[value] = refined;
        }
        self.signature_attributes.push(attribute);
    }

    fn remove_attribute(&mut self, _store: &PreparedColumnStore, attribute: usize) {
        let removed_index = self
            .signature_attributes
            .iter()
            .position(|&selected| selected == attribute)
            .expect("attribute belongs to the signature");

        let mut remaining: FxHashMap<Vec<usize>, usize> = FxHashMap::default();
        let mut shortened: Vec<usize> = Vec::new();
        let mut dropped: Vec<usize> = Vec::new();
        self.active_parts.clear();

        for value in 0..self.value_parts.len() {
            let slot = self.value_parts[value];
            if shortened.contains(&slot) {
                // already processed: re-route the value to the kept part
                self.value_parts[value] = remaining[&self.part(slot).signature];
                continue;
            }
            shortened.push(slot);

            // drop the removed component; the last one takes its place
            let frequency = {
                let part = self.part_mut(slot);
                part.signature.swap_remove(removed_index);
                part.frequency
            };
            if let Some(&kept) = remaining.get(&self.part(slot).signature) {
                self.part_mut(kept).frequency += frequency;
                self.value_parts[value] = kept;
                dropped.push(slot);
            } else {
                remaining.insert(self.part(slot).signature.clone(), slot);
                self.active_parts.push(slot);
            }
        }
        for slot in dropped {
            self.release_part(slot);
        }
        self.signature_attributes.swap_remove(removed_index);
    }

    fn upgrade_conditional_probs(
        &mut self,
        store: &mut PreparedColumnStore,
        attribute: usize,
        weight: f64,
    ) {
        let signature_index = self
            .signature_attributes
            .iter()
            .position(|&selected| selected == attribute)
            .expect("attribute belongs to the signature");
        for position in 0..self.active_parts.len() {
            let slot = self.active_parts[position];
            let group = self.part(slot).signature[signature_index];
            let part = self.parts[slot].as_mut().expect("live part slot");
            store.upgrade_target_conditional_ln_probs_at(
                attribute,
                group,
                weight,
                &mut part.scores,
            );
        }
    }

    fn data_cost(&mut self, store: &PreparedColumnStore) -> f64 {
        let class_count = self.target_frequencies.len();
        let instance_count = self.instance_count as f64;
        let terms = laplace_terms(instance_count, 0.5 / class_count as f64, class_count as f64);

        let mut data_cost = 0.0;
        for (instance, &target_index) in store.target_indexes().iter().enumerate() {
            let actual_value = target_index as usize;
            let actual_slot = self.value_parts[actual_value];
            let actual_score = self.part(actual_slot).scores[instance];

            // group probabilities are shared by the values of a part, so each
            // part weighs its exponential by its frequency; the actual value
            // keeps its own frequency in the numerator
            let mut inverse_prob = 0.0;
            for &slot in &self.active_parts {
                let part = self.part(slot);
                if slot == actual_slot {
                    inverse_prob += part.frequency as f64;
                } else {
                    let delta = part.scores[instance] - actual_score;
                    inverse_prob += part.frequency as f64
                        * if delta >= terms.max_score {
                            terms.max_exp_score
                        } else {
                            delta.exp()
                        };
                }
            }
            debug_assert!(inverse_prob >= 1.0);
            inverse_prob /= self.target_frequencies[actual_value] as f64;
            data_cost -= (instance_count / inverse_prob + terms.epsilon).ln();
        }
        instance_count.mul_add(terms.ln_denominator, data_cost)
    }

    fn part_count(&self) -> usize {
        self.active_parts.len()
    }

    fn check(&self, store: &PreparedColumnStore) -> bool {
        // every value's part carries the value's signature
        for value in 0..self.value_parts.len() {
            let part = self.part(self.value_parts[value]);
            if part.signature != self.signature_of_value(value) {
                return false;
            }
        }
        // signatures are unique among active parts, frequencies sum to the
        // instance count, score vectors are fully sized
        let mut signatures: Vec<&[usize]> = Vec::new();
        let mut total_frequency = 0u64;
        for &slot in &self.active_parts {
            let part = self.part(slot);
            if signatures.contains(&part.signature.as_slice())
                || part.frequency == 0
                || part.scores.len() != store.instance_count()
            {
                return false;
            }
            signatures.push(&part.signature);
            total_frequency += part.frequency;
        }
        total_frequency == self.instance_count as u64
            && self.active_parts.len() <= self.value_parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_store::{ColumnStoreConfig, PreparedColumnStore, VecRecordSource};
    use crate::grid_stats::{AttributePartition, AttributeStats, DataGridStats};
    use crate::preparation::{DataPreparationClass, PreparedAttribute};
    use crate::progress::{CancelToken, NoProgress};
    use crate::symbol::Symbol;
    use float_cmp::assert_approx_eq;

    // 6 instances over 3 target values, one binary attribute grouping the
    // targets as {T1, T2 | T3}, one grouping them as {T1 | T2, T3}
    fn grouped_target_store() -> PreparedColumnStore {
        let target_values = [Symbol::from("T1"), Symbol::from("T2"), Symbol::from("T3")];
        let instances: &[(i32, i32, usize)] =
            &[(0, 0, 0), (0, 0, 0), (0, 1, 1), (1, 1, 1), (1, 1, 2), (1, 1, 2)];

        let grouping = |split: usize, name: &str, joint: &[[u64; 2]; 2]| {
            let mut stats = DataGridStats::new(
                vec![
                    AttributeStats::new(
                        name,
                        AttributePartition::SymbolValues {
                            values: vec![Symbol::from("V1"), Symbol::from("V2")],
                        },
                    ),
                    AttributeStats::new(
                        "Class",
                        AttributePartition::Grouping {
                            values: vec![
                                target_values[0].clone(),
                                target_values[1].clone(),
                                target_values[2].clone(),
                                Symbol::star(),
                            ],
                            groups: if split == 2 {
                                vec![[0, 1], [2, 3]]
                            } else {
                                vec![[0, 0], [1, 3]]
                            },
                            garbage_group: None,
                        },
                    ),
                ],
                1,
                0,
            )
            .unwrap();
            for (source, row) in joint.iter().enumerate() {
                for (group, &frequency) in row.iter().enumerate() {
                    stats.set_cell_frequency(&[source, group], frequency);
                }
            }
            PreparedAttribute::new(stats).unwrap()
        };

        let target = TargetDescription::Classes {
            values: target_values.to_vec(),
            frequencies: vec![2, 2, 2],
            grouped: true,
        };
        let mut preparation = DataPreparationClass::new(target);
        // A1 groups {T1,T2 | T3}: joint over (value, group)
        let mut a1 = grouping(2, "A1", &[[3, 0], [1, 2]]);
        a1.set_sort_value(0.8);
        preparation.add_attribute(a1).unwrap();
        // A2 groups {T1 | T2,T3}
        let mut a2 = grouping(1, "A2", &[[2, 0], [0, 4]]);
        a2.set_sort_value(0.7);
        preparation.add_attribute(a2).unwrap();

        let mut store = PreparedColumnStore::new(preparation, ColumnStoreConfig::default());
        store.set_used_attributes(vec![0, 1]).unwrap();
        let records: Vec<Vec<i32>> = instances
            .iter()
            .map(|&(a1, a2, target)| vec![a1 + 1, a2 + 1, target as i32 + 1])
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

    fn classifier_store() -> PreparedColumnStore {
        let instances: Vec<(usize, usize)> = vec![(0, 0), (0, 0), (1, 0), (1, 1), (1, 1)];
        let mut joint = [[0u64; 2]; 2];
        for &(source, target) in &instances {
            joint[source][target] += 1;
        }
        let target = TargetDescription::Classes {
            values: vec![Symbol::from("T1"), Symbol::from("T2")],
            frequencies: vec![3, 2],
            grouped: false,
        };
        let mut preparation = DataPreparationClass::new(target);
        let mut attribute =
            crate::preparation::tests::prepared_symbol_attribute("A1", &joint, &["T1", "T2"]);
        attribute.set_sort_value(0.5);
        preparation.add_attribute(attribute).unwrap();

        let mut store = PreparedColumnStore::new(preparation, ColumnStoreConfig::default());
        store.set_used_attributes(vec![0]).unwrap();
        let records: Vec<Vec<i32>> = instances
            .iter()
            .map(|&(source, target)| vec![source as i32 + 1, target as i32 + 1])
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

    fn rank_store(part_frequencies: &[&[u64]]) -> PreparedColumnStore {
        let instance_count: u64 = part_frequencies[0].iter().sum();
        let target = TargetDescription::Ranks { instance_count };
        let mut preparation = DataPreparationClass::new(target);
        for (index, frequencies) in part_frequencies.iter().enumerate() {
            let mut bounds = Vec::new();
            let mut cumulative = 0.0;
            for &frequency in &frequencies[..frequencies.len() - 1] {
                cumulative += frequency as f64;
                bounds.push(cumulative);
            }
            let mut stats = DataGridStats::new(
                vec![
                    AttributeStats::new(
                        format!("R{index}"),
                        AttributePartition::SymbolValues {
                            values: vec![Symbol::from("V1"), Symbol::from("V2")],
                        },
                    ),
                    AttributeStats::new(
                        "Rank",
                        AttributePartition::Discretization { bounds },
                    ),
                ],
                1,
                0,
            )
            .unwrap();
            // spread the instances evenly over the two source parts
            for (part, &frequency) in frequencies.iter().enumerate() {
                stats.set_cell_frequency(&[0, part], frequency / 2);
                stats.set_cell_frequency(&[1, part], frequency - frequency / 2);
            }
            let mut attribute = PreparedAttribute::new(stats).unwrap();
            attribute.set_sort_value(0.5);
            preparation.add_attribute(attribute).unwrap();
        }

        let mut store = PreparedColumnStore::new(preparation, ColumnStoreConfig::default());
        store
            .set_used_attributes((0..part_frequencies.len()).collect())
            .unwrap();
        let records: Vec<Vec<i32>> = (0..instance_count)
            .map(|rank| {
                let mut record = vec![1 + (rank % 2) as i32; part_frequencies.len()];
                record.push(rank as i32 + 1);
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

    #[test]
    fn classifier_add_remove_restores_the_cost() {
        let mut store = classifier_store();
        let mut partition = create_target_partition(&store).unwrap();
        partition.initialize(&store);
        assert!(partition.check(&store));
        let initial_cost = partition.data_cost(&store);

        partition.add_attribute(&store, 0);
        partition.upgrade_conditional_probs(&mut store, 0, 1.0);
        let with_attribute = partition.data_cost(&store);
        assert!(with_attribute < initial_cost);

        partition.upgrade_conditional_probs(&mut store, 0, -1.0);
        partition.remove_attribute(&store, 0);
        let restored = partition.data_cost(&store);
        assert_approx_eq!(f64, restored, initial_cost, epsilon = 1e-9);
        assert!(partition.check(&store));
    }

    #[test]
    fn classifier_empty_selection_cost_is_the_prior_entropy() {
        let mut store = classifier_store();
        let mut partition = create_target_partition(&store).unwrap();
        partition.initialize(&store);

        // with prior-only scores the smoothed probability of each instance
        // is close to its class prior
        let cost = partition.data_cost(&store);
        let expected: f64 = -(3.0 * (3.0 / 5.0_f64).ln() + 2.0 * (2.0 / 5.0_f64).ln());
        assert!((cost - expected).abs() < 0.5);
    }

    #[test]
    fn regressor_partition_refines_and_merges() {
        let store = rank_store(&[&[4, 4], &[2, 6]]);
        let mut partition = RegressorPartition::new(&store).unwrap();
        partition.initialize(&store);
        assert_eq!(partition.part_count(), 1);

        partition.add_attribute(&store, 0);
        assert_eq!(partition.part_count(), 2);
        assert!(partition.check(&store));

        // boundary 2 splits ]0,4]; boundary 4 is shared and re-referenced
        partition.add_attribute(&store, 1);
        assert_eq!(partition.part_count(), 3);
        assert!(partition.check(&store));

        partition.remove_attribute(&store, 0);
        assert_eq!(partition.part_count(), 2);
        assert!(partition.check(&store));

        partition.remove_attribute(&store, 1);
        assert_eq!(partition.part_count(), 1);
        assert!(partition.check(&store));
    }

    #[test]
    fn regressor_add_remove_restores_the_cost() {
        let mut store = rank_store(&[&[4, 4]]);
        let mut partition = create_target_partition(&store).unwrap();
        partition.initialize(&store);
        let initial_cost = partition.data_cost(&store);

        partition.add_attribute(&store, 0);
        partition.upgrade_conditional_probs(&mut store, 0, 1.0);
        let with_attribute = partition.data_cost(&store);

        partition.upgrade_conditional_probs(&mut store, 0, -1.0);
        partition.remove_attribute(&store, 0);
        let restored = partition.data_cost(&store);
        assert_approx_eq!(f64, restored, initial_cost, epsilon = 1e-9);
        assert!(with_attribute.is_finite());
    }

    #[test]
    fn generalized_partition_splits_by_signature() {
        let store = grouped_target_store();
        let mut partition = GeneralizedClassifierPartition::new(&store).unwrap();
        partition.initialize(&store);
        assert_eq!(partition.part_count(), 1);

        // A1 groups {T1,T2 | T3}
        partition.add_attribute(&store, 0);
        assert_eq!(partition.part_count(), 2);
        assert!(partition.check(&store));

        // A2 groups {T1 | T2,T3}: joint signatures split all three values
        partition.add_attribute(&store, 1);
        assert_eq!(partition.part_count(), 3);
        assert!(partition.check(&store));

        // removing A2 merges T1 and T2 again
        partition.remove_attribute(&store, 1);
        assert_eq!(partition.part_count(), 2);
        assert!(partition.check(&store));

        partition.remove_attribute(&store, 0);
        assert_eq!(partition.part_count(), 1);
        assert!(partition.check(&store));
    }

    #[test]
    fn generalized_add_remove_restores_the_cost() {
        let mut store = grouped_target_store();
        let mut partition = create_target_partition(&store).unwrap();
        partition.initialize(&store);
        let initial_cost = partition.data_cost(&store);

        partition.add_attribute(&store, 0);
        partition.upgrade_conditional_probs(&mut store, 0, 1.0);
        partition.add_attribute(&store, 1);
        partition.upgrade_conditional_probs(&mut store, 1, 1.0);

        partition.upgrade_conditional_probs(&mut store, 1, -1.0);
        partition.remove_attribute(&store, 1);
        partition.upgrade_conditional_probs(&mut store, 0, -1.0);
        partition.remove_attribute(&store, 0);

        let restored = partition.data_cost(&store);
        assert_approx_eq!(f64, restored, initial_cost, epsilon = 1e-9);
    }
}
