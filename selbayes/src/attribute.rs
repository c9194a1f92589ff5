//! Attributes of a data grid: typed partitions of a value space.
//!
//! An [`Attribute`] owns an ordered list of [`Part`]s. A part carries either
//! an [`Interval`] (continuous attributes) or a [`ValueSet`] (symbolic and
//! var-part attributes). An indexing structure, built on demand, maps a value
//! to its containing part.

use crate::error::{Error, Result};
use crate::symbol::Symbol;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Continuous sentinel standing for a missing value. It sorts below every
/// actual data value.
pub const MISSING_VALUE: f64 = f64::MIN;

// binary search pays off only past this interval count
const SEQUENTIAL_LOOKUP_MAX: usize = 10;

/// Type of a grid attribute.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttributeType {
    /// Numerical attribute partitioned into intervals.
    Continuous,
    /// Categorical attribute partitioned into groups of symbols.
    Symbol,
    /// Attribute whose parts group parts of inner attributes.
    VarPart,
}

impl AttributeType {
    /// Returns `true` for the types whose parts are value sets.
    #[must_use]
    pub const fn is_groupable(self) -> bool {
        matches!(self, Self::Symbol | Self::VarPart)
    }
}

/// Half-open interval `]lower, upper]`. The distinguished missing interval
/// has `lower == upper == MISSING_VALUE`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    lower: f64,
    upper: f64,
}

impl Interval {
    /// Sentinel lower bound of the first interval.
    pub const MIN_LOWER_BOUND: f64 = f64::NEG_INFINITY;
    /// Sentinel upper bound of the last interval.
    pub const MAX_UPPER_BOUND: f64 = f64::INFINITY;

    /// Constructs `]lower, upper]`.
    #[must_use]
    pub fn new(lower: f64, upper: f64) -> Self {
        assert!(lower <= upper, "interval bounds out of order");
        Self { lower, upper }
    }

    /// Constructs the missing-value interval.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            lower: MISSING_VALUE,
            upper: MISSING_VALUE,
        }
    }

    /// Returns `true` for the missing-value interval.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.lower == MISSING_VALUE && self.upper == MISSING_VALUE
    }

    /// Lower bound, excluded.
    #[must_use]
    pub const fn lower_bound(&self) -> f64 {
        self.lower
    }

    /// Upper bound, included.
    #[must_use]
    pub const fn upper_bound(&self) -> f64 {
        self.upper
    }

    /// Replaces the lower bound.
    pub fn set_lower_bound(&mut self, lower: f64) {
        self.lower = lower;
    }

    /// Replaces the upper bound.
    pub fn set_upper_bound(&mut self, upper: f64) {
        self.upper = upper;
    }

    /// Returns `true` if `value` falls inside the interval.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        if self.is_missing() {
            value == MISSING_VALUE
        } else {
            self.lower < value && value <= self.upper
        }
    }
}

/// Reference to a part of an inner attribute, by attribute and part index
/// inside the owning [`InnerAttributes`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VarPartRef {
    /// Index of the inner attribute.
    pub attribute: usize,
    /// Index of the part inside the inner attribute.
    pub part: usize,
}

/// A value held by a grouped part.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    /// Categorical value.
    Symbol(Symbol),
    /// Reference to an inner-attribute part.
    VarPart(VarPartRef),
}

impl Value {
    /// Returns `true` if this is the star symbol.
    #[must_use]
    pub fn is_star(&self) -> bool {
        matches!(self, Self::Symbol(symbol) if symbol.is_star())
    }
}

/// A value of a grouped part, with its frequency and typicality.
#[derive(Clone, Debug)]
pub struct ValueItem {
    value: Value,
    frequency: u64,
    typicality: f64,
}

impl ValueItem {
    /// Wraps `value` with zero frequency and full typicality.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self {
            value,
            frequency: 0,
            typicality: 1.0,
        }
    }

    /// The wrapped value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Frequency of the value in the training data.
    #[must_use]
    pub const fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Replaces the frequency.
    pub fn set_frequency(&mut self, frequency: u64) {
        self.frequency = frequency;
    }

    /// Typicality score in `[0, 1]`.
    #[must_use]
    pub const fn typicality(&self) -> f64 {
        self.typicality
    }

    /// Replaces the typicality score.
    pub fn set_typicality(&mut self, typicality: f64) {
        assert!((0.0..=1.0).contains(&typicality));
        self.typicality = typicality;
    }
}

/// Ordered set of values forming one grouped part.
#[derive(Clone, Debug)]
pub struct ValueSet {
    kind: AttributeType,
    values: Vec<ValueItem>,
}

impl ValueSet {
    /// Constructs an empty value set of the given groupable `kind`.
    #[must_use]
    pub fn new(kind: AttributeType) -> Self {
        assert!(kind.is_groupable());
        Self {
            kind,
            values: Vec::new(),
        }
    }

    /// Groupable type of the values.
    #[must_use]
    pub const fn kind(&self) -> AttributeType {
        self.kind
    }

    /// Appends a symbol value.
    pub fn add_symbol_value(&mut self, symbol: Symbol) {
        assert_eq!(self.kind, AttributeType::Symbol);
        self.values.push(ValueItem::new(Value::Symbol(symbol)));
    }

    /// Appends a var-part value.
    pub fn add_var_part_value(&mut self, var_part: VarPartRef) {
        assert_eq!(self.kind, AttributeType::VarPart);
        self.values.push(ValueItem::new(Value::VarPart(var_part)));
    }

    /// Number of values in the set.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Values in order.
    #[must_use]
    pub fn values(&self) -> &[ValueItem] {
        &self.values
    }

    /// Mutable values in order.
    pub fn values_mut(&mut self) -> &mut [ValueItem] {
        &mut self.values
    }

    /// Returns `true` if the set holds the star value, i.e. is the default
    /// part of its attribute.
    #[must_use]
    pub fn is_default_part(&self) -> bool {
        self.values.iter().any(|item| item.value().is_star())
    }

    /// Sum of the per-value frequencies.
    #[must_use]
    pub fn total_value_frequency(&self) -> u64 {
        self.values.iter().map(ValueItem::frequency).sum()
    }

    /// Sorts values by decreasing frequency, star last among equals.
    pub fn sort_values_by_decreasing_frequency(&mut self) {
        self.values.sort_by(|left, right| {
            right
                .frequency()
                .cmp(&left.frequency())
                .then_with(|| left.value().is_star().cmp(&right.value().is_star()))
        });
    }
}

/// Content of a part: an interval or a value set, depending on the attribute
/// type.
#[derive(Clone, Debug)]
pub enum PartValues {
    /// Interval of a continuous attribute.
    Interval(Interval),
    /// Value set of a groupable attribute.
    ValueSet(ValueSet),
}

impl PartValues {
    /// The interval content.
    ///
    /// # Panics
    ///
    /// Panics if the part holds a value set.
    #[must_use]
    pub fn interval(&self) -> &Interval {
        match self {
            Self::Interval(interval) => interval,
            Self::ValueSet(_) => panic!("part holds a value set, not an interval"),
        }
    }

    /// Mutable interval content.
    ///
    /// # Panics
    ///
    /// Panics if the part holds a value set.
    pub fn interval_mut(&mut self) -> &mut Interval {
        match self {
            Self::Interval(interval) => interval,
            Self::ValueSet(_) => panic!("part holds a value set, not an interval"),
        }
    }

    /// The value-set content.
    ///
    /// # Panics
    ///
    /// Panics if the part holds an interval.
    #[must_use]
    pub fn value_set(&self) -> &ValueSet {
        match self {
            Self::ValueSet(value_set) => value_set,
            Self::Interval(_) => panic!("part holds an interval, not a value set"),
        }
    }

    /// Mutable value-set content.
    ///
    /// # Panics
    ///
    /// Panics if the part holds an interval.
    pub fn value_set_mut(&mut self) -> &mut ValueSet {
        match self {
            Self::ValueSet(value_set) => value_set,
            Self::Interval(_) => panic!("part holds an interval, not a value set"),
        }
    }
}

/// One part of an attribute partition.
///
/// A part also heads the doubly-linked list of the grid cells referencing it;
/// the links themselves are stored on the cells, one pair per dimension.
#[derive(Clone, Debug)]
pub struct Part {
    values: PartValues,
    frequency: u64,
    pub(crate) head_cell: Option<usize>,
    pub(crate) tail_cell: Option<usize>,
    pub(crate) cell_count: usize,
}

impl Part {
    pub(crate) fn new(values: PartValues) -> Self {
        Self {
            values,
            frequency: 0,
            head_cell: None,
            tail_cell: None,
            cell_count: 0,
        }
    }

    /// Content of the part.
    #[must_use]
    pub const fn values(&self) -> &PartValues {
        &self.values
    }

    /// Mutable content of the part.
    pub fn values_mut(&mut self) -> &mut PartValues {
        &mut self.values
    }

    /// Interval content, for continuous attributes.
    #[must_use]
    pub fn interval(&self) -> &Interval {
        self.values.interval()
    }

    /// Mutable interval content, for continuous attributes.
    pub fn interval_mut(&mut self) -> &mut Interval {
        self.values.interval_mut()
    }

    /// Value-set content, for groupable attributes.
    #[must_use]
    pub fn value_set(&self) -> &ValueSet {
        self.values.value_set()
    }

    /// Mutable value-set content, for groupable attributes.
    pub fn value_set_mut(&mut self) -> &mut ValueSet {
        self.values.value_set_mut()
    }

    /// Total frequency of the cells referencing the part.
    #[must_use]
    pub const fn frequency(&self) -> u64 {
        self.frequency
    }

    pub(crate) fn set_frequency(&mut self, frequency: u64) {
        self.frequency = frequency;
    }

    /// Number of cells referencing the part.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        self.cell_count
    }
}

/// Ordered, name-unique set of attributes serving as the universe a var-part
/// attribute's parts are built from. Shared by reference counting between the
/// grids holding a var-part attribute.
#[derive(Debug, Default)]
pub struct InnerAttributes {
    attributes: Vec<Attribute>,
    var_part_granularity: usize,
}

impl InnerAttributes {
    /// Constructs an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an inner attribute, which must carry an owner name and a name not
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] on a duplicate name.
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<usize> {
        if self.search_attribute(attribute.name()).is_some() {
            return Err(Error::InvariantViolation(format!(
                "duplicate inner attribute '{}'",
                attribute.name()
            )));
        }
        self.attributes.push(attribute);
        Ok(self.attributes.len() - 1)
    }

    /// Number of inner attributes.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Inner attribute at `index`.
    #[must_use]
    pub fn attribute_at(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    /// Index of the inner attribute named `name`, if any.
    #[must_use]
    pub fn search_attribute(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.name() == name)
    }

    /// Granularity of the var-part tokenization, 0 when unused.
    #[must_use]
    pub const fn var_part_granularity(&self) -> usize {
        self.var_part_granularity
    }

    /// Replaces the var-part granularity.
    pub fn set_var_part_granularity(&mut self, granularity: usize) {
        self.var_part_granularity = granularity;
    }

    /// Total number of parts over all inner attributes.
    #[must_use]
    pub fn total_part_count(&self) -> usize {
        self.attributes
            .iter()
            .map(Attribute::part_count)
            .sum()
    }
}

#[derive(Debug)]
enum AttributeIndex {
    // part indexes sorted by increasing upper bound, missing interval first
    Intervals(Vec<usize>),
    Groups {
        parts: FxHashMap<Value, usize>,
        default_part: Option<usize>,
    },
}

/// One dimension of a data grid.
#[derive(Debug)]
pub struct Attribute {
    name: String,
    attribute_type: AttributeType,
    parts: Vec<Part>,
    garbage_part: Option<usize>,
    catch_all_value_count: u64,
    pub(crate) is_target: bool,
    owner_attribute_name: Option<String>,
    inner_attributes: Option<Rc<InnerAttributes>>,
    initial_value_count: u64,
    granularized_value_count: u64,
    index: Option<AttributeIndex>,
}

impl Attribute {
    /// Constructs an empty attribute of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            parts: Vec::new(),
            garbage_part: None,
            catch_all_value_count: 0,
            is_target: false,
            owner_attribute_name: None,
            inner_attributes: None,
            initial_value_count: 0,
            granularized_value_count: 0,
            index: None,
        }
    }

    /// Attribute name, unique within its grid.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the attribute.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Type of the attribute.
    #[must_use]
    pub const fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    /// Changes the attribute type. Only allowed while no part exists.
    pub fn set_attribute_type(&mut self, attribute_type: AttributeType) {
        assert!(self.parts.is_empty(), "type change requires an empty partition");
        self.attribute_type = attribute_type;
    }

    /// Returns `true` when the attribute is the grid's target.
    #[must_use]
    pub const fn is_target(&self) -> bool {
        self.is_target
    }

    /// Appends an empty part and returns its index.
    pub fn add_part(&mut self) -> usize {
        assert!(!self.is_indexed(), "parts must not change while indexed");
        let values = match self.attribute_type {
            AttributeType::Continuous => PartValues::Interval(Interval::new(
                Interval::MIN_LOWER_BOUND,
                Interval::MAX_UPPER_BOUND,
            )),
            kind => PartValues::ValueSet(ValueSet::new(kind)),
        };
        self.parts.push(Part::new(values));
        self.parts.len() - 1
    }

    /// Number of parts.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Part at `index`.
    #[must_use]
    pub fn part_at(&self, index: usize) -> &Part {
        &self.parts[index]
    }

    /// Mutable part at `index`.
    pub fn part_at_mut(&mut self, index: usize) -> &mut Part {
        assert!(!self.is_indexed(), "parts must not change while indexed");
        &mut self.parts[index]
    }

    pub(crate) fn part_at_mut_internal(&mut self, index: usize) -> &mut Part {
        &mut self.parts[index]
    }

    /// Parts in order.
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter()
    }

    /// Index of the garbage part, if any.
    #[must_use]
    pub const fn garbage_part(&self) -> Option<usize> {
        self.garbage_part
    }

    /// Marks `part` as the garbage part.
    pub fn set_garbage_part(&mut self, part: Option<usize>) {
        assert!(self.attribute_type.is_groupable());
        self.garbage_part = part;
    }

    /// Number of values of the catch-all value set.
    #[must_use]
    pub const fn catch_all_value_count(&self) -> u64 {
        self.catch_all_value_count
    }

    /// Replaces the catch-all value count.
    pub fn set_catch_all_value_count(&mut self, count: u64) {
        self.catch_all_value_count = count;
    }

    /// Name of the var-part attribute owning this inner attribute.
    #[must_use]
    pub fn owner_attribute_name(&self) -> Option<&str> {
        self.owner_attribute_name.as_deref()
    }

    /// Marks the attribute as an inner attribute of `owner`.
    pub fn set_owner_attribute_name(&mut self, owner: impl Into<String>) {
        self.owner_attribute_name = Some(owner.into());
    }

    /// Shared inner-attribute container of a var-part attribute.
    #[must_use]
    pub const fn inner_attributes(&self) -> Option<&Rc<InnerAttributes>> {
        self.inner_attributes.as_ref()
    }

    /// Attaches the shared inner-attribute container.
    pub fn set_inner_attributes(&mut self, inner_attributes: Rc<InnerAttributes>) {
        assert_eq!(self.attribute_type, AttributeType::VarPart);
        self.inner_attributes = Some(inner_attributes);
    }

    /// Number of distinct values before granularization.
    #[must_use]
    pub const fn initial_value_count(&self) -> u64 {
        self.initial_value_count
    }

    /// Replaces the initial value count.
    pub fn set_initial_value_count(&mut self, count: u64) {
        self.initial_value_count = count;
    }

    /// Number of distinct values kept by granularization.
    #[must_use]
    pub const fn granularized_value_count(&self) -> u64 {
        self.granularized_value_count
    }

    /// Replaces the granularized value count.
    pub fn set_granularized_value_count(&mut self, count: u64) {
        self.granularized_value_count = count;
    }

    /// Returns `true` if the attribute partitions its values into more than
    /// one part.
    #[must_use]
    pub fn is_informative(&self) -> bool {
        self.parts.len() > 1
    }

    /// Returns `true` while the lookup structure is live.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Builds the lookup structure. Parts must not change while it is live.
    pub fn build_indexing_structure(&mut self) {
        if self.is_indexed() {
            return;
        }
        let index = match self.attribute_type {
            AttributeType::Continuous => {
                let mut intervals: Vec<usize> = (0..self.parts.len()).collect();
                intervals.sort_by(|&left, &right| {
                    compare_intervals(self.parts[left].interval(), self.parts[right].interval())
                });
                AttributeIndex::Intervals(intervals)
            }
            AttributeType::Symbol | AttributeType::VarPart => {
                let mut parts = FxHashMap::default();
                let mut default_part = None;
                for (part_index, part) in self.parts.iter().enumerate() {
                    for item in part.value_set().values() {
                        if item.value().is_star() {
                            default_part = Some(part_index);
                        }
                        parts.insert(item.value().clone(), part_index);
                    }
                }
                AttributeIndex::Groups {
                    parts,
                    default_part,
                }
            }
        };
        self.index = Some(index);
    }

    /// Drops the lookup structure.
    pub fn delete_indexing_structure(&mut self) {
        self.index = None;
    }

    /// Finds the part containing the continuous value `value`.
    ///
    /// Sequential scan over few intervals, binary search on the sorted upper
    /// bounds otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the lookup structure is not built or the attribute is not
    /// continuous.
    #[must_use]
    pub fn lookup_continuous_part(&self, value: f64) -> usize {
        let Some(AttributeIndex::Intervals(intervals)) = &self.index else {
            panic!("attribute '{}' has no interval index", self.name)
        };
        assert!(!intervals.is_empty());

        if intervals.len() <= SEQUENTIAL_LOOKUP_MAX {
            for &part_index in intervals {
                if value <= self.parts[part_index].interval().upper_bound() {
                    return part_index;
                }
            }
            // partition covers ]-inf, +inf], so the scan cannot fall through
            unreachable!("value outside the interval partition");
        }

        let position = intervals.partition_point(|&part_index| {
            self.parts[part_index].interval().upper_bound() < value
        });
        intervals[position.min(intervals.len() - 1)]
    }

    /// Finds the part containing `symbol`, falling back to the default part
    /// for unseen values.
    ///
    /// # Panics
    ///
    /// Panics if the lookup structure is not built, the attribute is not
    /// symbolic, or no default part exists.
    #[must_use]
    pub fn lookup_symbol_part(&self, symbol: &Symbol) -> usize {
        let Some(AttributeIndex::Groups {
            parts,
            default_part,
        }) = &self.index
        else {
            panic!("attribute '{}' has no group index", self.name)
        };
        assert_eq!(self.attribute_type, AttributeType::Symbol);
        parts
            .get(&Value::Symbol(symbol.clone()))
            .copied()
            .or(*default_part)
            .expect("symbol attribute without default part")
    }

    /// Finds the part containing the inner-attribute part `var_part`.
    ///
    /// # Panics
    ///
    /// Panics if the lookup structure is not built or the attribute is not of
    /// var-part type.
    #[must_use]
    pub fn lookup_var_part(&self, var_part: VarPartRef) -> Option<usize> {
        let Some(AttributeIndex::Groups { parts, .. }) = &self.index else {
            panic!("attribute '{}' has no group index", self.name)
        };
        assert_eq!(self.attribute_type, AttributeType::VarPart);
        parts.get(&Value::VarPart(var_part)).copied()
    }

    /// Validates the partition invariants of the attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] naming the attribute and the
    /// broken invariant.
    pub fn check(&self) -> Result<()> {
        match self.attribute_type {
            AttributeType::Continuous => self.check_intervals(),
            AttributeType::Symbol => self.check_value_sets(true),
            AttributeType::VarPart => {
                if self.inner_attributes.is_none() {
                    return Err(self.violation("var-part attribute without inner attributes"));
                }
                self.check_value_sets(false)
            }
        }
    }

    fn check_intervals(&self) -> Result<()> {
        let mut sorted: Vec<&Interval> = self.parts.iter().map(Part::interval).collect();
        sorted.sort_by(|left, right| compare_intervals(left, right));

        let regular: Vec<&&Interval> = sorted.iter().filter(|i| !i.is_missing()).collect();
        if sorted.len() - regular.len() > 1 {
            return Err(self.violation("more than one missing interval"));
        }
        if let Some(first) = regular.first() {
            if first.lower_bound() != Interval::MIN_LOWER_BOUND {
                return Err(self.violation("first interval must start at the lower sentinel"));
            }
        }
        if let Some(last) = regular.last() {
            if last.upper_bound() != Interval::MAX_UPPER_BOUND {
                return Err(self.violation("last interval must end at the upper sentinel"));
            }
        }
        for pair in regular.windows(2) {
            if pair[0].upper_bound() != pair[1].lower_bound() {
                return Err(self.violation("adjacent intervals must share a bound"));
            }
        }
        Ok(())
    }

    fn check_value_sets(&self, star_required: bool) -> Result<()> {
        let mut seen: FxHashMap<Value, usize> = FxHashMap::default();
        let mut star_count = 0usize;
        for (part_index, part) in self.parts.iter().enumerate() {
            let value_set = part.value_set();
            if value_set.kind() != self.attribute_type {
                return Err(self.violation("value set kind differs from the attribute type"));
            }
            for item in value_set.values() {
                if item.value().is_star() {
                    star_count += 1;
                }
                if let Value::VarPart(var_part) = item.value() {
                    let inner = self
                        .inner_attributes
                        .as_ref()
                        .expect("checked by the caller");
                    if var_part.attribute >= inner.attribute_count()
                        || var_part.part >= inner.attribute_at(var_part.attribute).part_count()
                    {
                        return Err(self.violation("var-part value references no inner part"));
                    }
                }
                if seen.insert(item.value().clone(), part_index).is_some() {
                    return Err(self.violation("a value belongs to two parts"));
                }
            }
        }
        if star_required && self.parts.is_empty() {
            return Ok(());
        }
        if star_required && star_count != 1 {
            return Err(self.violation("exactly one part must hold the star value"));
        }
        if self.attribute_type == AttributeType::VarPart {
            // the parts must partition the whole inner universe
            let inner = self.inner_attributes.as_ref().expect("checked above");
            if seen.len() != inner.total_part_count() {
                return Err(self.violation("var-part values must cover every inner part"));
            }
        }
        Ok(())
    }

    /// Sorts parts for reporting: intervals by increasing bound, groups by
    /// decreasing frequency with values inside groups likewise. Returns the
    /// permutation mapping old part indexes to new ones.
    pub(crate) fn sort_parts(&mut self) -> Vec<usize> {
        assert!(!self.is_indexed(), "parts must not change while indexed");
        let mut order: Vec<usize> = (0..self.parts.len()).collect();
        match self.attribute_type {
            AttributeType::Continuous => order.sort_by(|&left, &right| {
                compare_intervals(self.parts[left].interval(), self.parts[right].interval())
            }),
            AttributeType::Symbol | AttributeType::VarPart => {
                for part in &mut self.parts {
                    part.value_set_mut().sort_values_by_decreasing_frequency();
                }
                order.sort_by(|&left, &right| {
                    self.parts[right]
                        .frequency()
                        .cmp(&self.parts[left].frequency())
                        .then(left.cmp(&right))
                });
            }
        }
        let mut old_to_new = vec![0; order.len()];
        for (new_index, &old_index) in order.iter().enumerate() {
            old_to_new[old_index] = new_index;
        }
        let mut reordered: Vec<Part> = Vec::with_capacity(self.parts.len());
        for &old_index in &order {
            reordered.push(self.parts[old_index].clone());
        }
        let garbage = self.garbage_part.map(|old| old_to_new[old]);
        self.parts = reordered;
        self.garbage_part = garbage;
        old_to_new
    }

    fn violation(&self, message: &str) -> Error {
        Error::InvariantViolation(format!("attribute '{}': {message}", self.name))
    }
}

// missing interval first, then by increasing bounds
fn compare_intervals(left: &Interval, right: &Interval) -> std::cmp::Ordering {
    match (left.is_missing(), right.is_missing()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => left
            .lower_bound()
            .partial_cmp(&right.lower_bound())
            .expect("interval bounds are never NaN")
            .then(
                left.upper_bound()
                    .partial_cmp(&right.upper_bound())
                    .expect("interval bounds are never NaN"),
            ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous_attribute(bounds: &[f64]) -> Attribute {
        let mut attribute = Attribute::new("X", AttributeType::Continuous);
        let mut lower = Interval::MIN_LOWER_BOUND;
        for &bound in bounds {
            let part = attribute.add_part();
            *attribute.part_at_mut(part).interval_mut() = Interval::new(lower, bound);
            lower = bound;
        }
        let part = attribute.add_part();
        *attribute.part_at_mut(part).interval_mut() =
            Interval::new(lower, Interval::MAX_UPPER_BOUND);
        attribute
    }

    #[test]
    fn sequential_interval_lookup() {
        let mut attribute = continuous_attribute(&[1.0, 2.0]);
        attribute.build_indexing_structure();

        assert_eq!(attribute.lookup_continuous_part(0.5), 0);
        assert_eq!(attribute.lookup_continuous_part(1.0), 0);
        assert_eq!(attribute.lookup_continuous_part(1.5), 1);
        assert_eq!(attribute.lookup_continuous_part(100.0), 2);
        assert!(attribute.check().is_ok());
    }

    #[test]
    fn binary_interval_lookup_agrees_with_contains() {
        let bounds: Vec<f64> = (0..20).map(f64::from).collect();
        let mut attribute = continuous_attribute(&bounds);
        attribute.build_indexing_structure();

        for step in 0..100 {
            let value = -2.0 + 0.25 * f64::from(step);
            let part = attribute.lookup_continuous_part(value);
            assert!(
                attribute.part_at(part).interval().contains(value),
                "value {value} mapped to part {part}"
            );
        }
    }

    #[test]
    fn missing_interval_sorts_first_and_catches_the_sentinel() {
        let mut attribute = continuous_attribute(&[0.0]);
        let missing = attribute.add_part();
        *attribute.part_at_mut(missing).interval_mut() = Interval::missing();
        attribute.build_indexing_structure();

        assert_eq!(attribute.lookup_continuous_part(MISSING_VALUE), missing);
        assert_eq!(attribute.lookup_continuous_part(-1.0), 0);
        assert!(attribute.check().is_ok());
    }

    #[test]
    fn symbol_lookup_defaults_to_the_star_part() {
        let mut attribute = Attribute::new("C", AttributeType::Symbol);
        let first = attribute.add_part();
        attribute
            .part_at_mut(first)
            .value_set_mut()
            .add_symbol_value(Symbol::from("V1"));
        let second = attribute.add_part();
        {
            let value_set = attribute.part_at_mut(second).value_set_mut();
            value_set.add_symbol_value(Symbol::from("V2"));
            value_set.add_symbol_value(Symbol::star());
        }
        attribute.build_indexing_structure();

        assert_eq!(attribute.lookup_symbol_part(&Symbol::from("V1")), first);
        assert_eq!(attribute.lookup_symbol_part(&Symbol::from("V2")), second);
        assert_eq!(attribute.lookup_symbol_part(&Symbol::from("unseen")), second);
        assert!(attribute.check().is_ok());
    }

    #[test]
    fn check_rejects_a_duplicated_value() {
        let mut attribute = Attribute::new("C", AttributeType::Symbol);
        for _ in 0..2 {
            let part = attribute.add_part();
            attribute
                .part_at_mut(part)
                .value_set_mut()
                .add_symbol_value(Symbol::from("V1"));
        }
        attribute
            .part_at_mut(1)
            .value_set_mut()
            .add_symbol_value(Symbol::star());
        assert!(attribute.check().is_err());
    }

    #[test]
    fn check_rejects_a_gap_between_intervals() {
        let mut attribute = Attribute::new("X", AttributeType::Continuous);
        let first = attribute.add_part();
        *attribute.part_at_mut(first).interval_mut() =
            Interval::new(Interval::MIN_LOWER_BOUND, 1.0);
        let second = attribute.add_part();
        *attribute.part_at_mut(second).interval_mut() =
            Interval::new(2.0, Interval::MAX_UPPER_BOUND);
        assert!(attribute.check().is_err());
    }

    #[test]
    fn var_part_attribute_partitions_the_inner_universe() {
        let mut inner = InnerAttributes::new();
        let mut inner_continuous = Attribute::new("Measure", AttributeType::Continuous);
        inner_continuous.set_owner_attribute_name("Parts");
        let part = inner_continuous.add_part();
        *inner_continuous.part_at_mut(part).interval_mut() =
            Interval::new(Interval::MIN_LOWER_BOUND, 0.0);
        let part = inner_continuous.add_part();
        *inner_continuous.part_at_mut(part).interval_mut() =
            Interval::new(0.0, Interval::MAX_UPPER_BOUND);
        let first_inner = inner.add_attribute(inner_continuous).unwrap();

        let mut inner_symbol = Attribute::new("Label", AttributeType::Symbol);
        inner_symbol.set_owner_attribute_name("Parts");
        let part = inner_symbol.add_part();
        {
            let value_set = inner_symbol.part_at_mut(part).value_set_mut();
            value_set.add_symbol_value(Symbol::from("V1"));
            value_set.add_symbol_value(Symbol::star());
        }
        let second_inner = inner.add_attribute(inner_symbol).unwrap();
        let inner = Rc::new(inner);

        let mut attribute = Attribute::new("Parts", AttributeType::VarPart);
        attribute.set_inner_attributes(Rc::clone(&inner));
        let first = attribute.add_part();
        attribute
            .part_at_mut(first)
            .value_set_mut()
            .add_var_part_value(VarPartRef {
                attribute: first_inner,
                part: 0,
            });
        let second = attribute.add_part();
        {
            let value_set = attribute.part_at_mut(second).value_set_mut();
            value_set.add_var_part_value(VarPartRef {
                attribute: first_inner,
                part: 1,
            });
            value_set.add_var_part_value(VarPartRef {
                attribute: second_inner,
                part: 0,
            });
        }

        assert!(attribute.check().is_ok());
        attribute.build_indexing_structure();
        assert_eq!(
            attribute.lookup_var_part(VarPartRef {
                attribute: first_inner,
                part: 1,
            }),
            Some(second)
        );

        // the container is shared between the attribute and the test
        assert_eq!(Rc::strong_count(&inner), 2);
        drop(attribute);
        assert_eq!(Rc::strong_count(&inner), 1);
    }

    #[test]
    fn var_part_check_rejects_an_uncovered_inner_part() {
        let mut inner = InnerAttributes::new();
        let mut inner_symbol = Attribute::new("Label", AttributeType::Symbol);
        inner_symbol.set_owner_attribute_name("Parts");
        for value in ["V1", "V2"] {
            let part = inner_symbol.add_part();
            inner_symbol
                .part_at_mut(part)
                .value_set_mut()
                .add_symbol_value(Symbol::from(value));
        }
        inner_symbol
            .part_at_mut(1)
            .value_set_mut()
            .add_symbol_value(Symbol::star());
        let inner_index = inner.add_attribute(inner_symbol).unwrap();

        let mut attribute = Attribute::new("Parts", AttributeType::VarPart);
        attribute.set_inner_attributes(Rc::new(inner));
        let part = attribute.add_part();
        attribute
            .part_at_mut(part)
            .value_set_mut()
            .add_var_part_value(VarPartRef {
                attribute: inner_index,
                part: 0,
            });

        // the second inner part is referenced by no var-part value
        assert!(attribute.check().is_err());
    }

    #[test]
    fn inner_attributes_are_name_unique() {
        let mut inner = InnerAttributes::new();
        inner
            .add_attribute(Attribute::new("A", AttributeType::Continuous))
            .unwrap();
        assert!(inner
            .add_attribute(Attribute::new("A", AttributeType::Symbol))
            .is_err());
        assert_eq!(inner.attribute_count(), 1);
        assert_eq!(inner.search_attribute("A"), Some(0));
    }
}
