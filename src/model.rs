//! Payloads carried by notifications.
//!
//! The pipeline only looks inside result payloads to merge them: a result is a mapping from
//! calculation-configuration name to computation target to value name to value, plus scalar
//! metadata that a merge overwrites wholesale. Everything else is carried through untouched.

use std::{
    collections::{BTreeMap, btree_map},
    fmt,
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Identifier of one computation cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(pub u64);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle#{}", self.0)
    }
}

/// The thing a value was computed for.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetSpec(pub String);

impl From<&str> for TargetSpec {
    fn from(s: &str) -> Self {
        TargetSpec(s.to_owned())
    }
}

impl From<String> for TargetSpec {
    fn from(s: String) -> Self {
        TargetSpec(s)
    }
}

/// A compiled definition the producer will now run cycles for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledDefinition {
    pub name: String,
    pub version: u64,
    pub has_market_data_permissions: bool,
}

/// Options a cycle was (or was to be) executed with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub valuation_time: Option<DateTime<Utc>>,
    pub market_data_source: Option<String>,
}

/// Describes a cycle at the moment it starts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleMetadata {
    pub cycle_id: CycleId,
    pub definition_name: String,
    pub valuation_time: Option<DateTime<Utc>>,
}

/// Scalar fields of a result, replaced as a unit by a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub cycle_id: CycleId,
    pub calculation_time: DateTime<Utc>,
    pub calculation_duration: Duration,
    pub version: u64,
    pub execution_options: ExecutionOptions,
}

/// Values keyed by value name.
pub type TargetValues<V> = BTreeMap<String, V>;

/// Calculation-configuration name -> target -> value name -> value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSet<V> {
    configs: BTreeMap<String, BTreeMap<TargetSpec, TargetValues<V>>>,
}

impl<V> Default for ResultSet<V> {
    fn default() -> Self {
        Self {
            configs: BTreeMap::new(),
        }
    }
}

impl<V> ResultSet<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a calculation configuration, which may stay empty.
    pub fn add_config(&mut self, config: impl Into<String>) {
        self.configs.entry(config.into()).or_default();
    }

    /// Insert a value, returning the one it replaced.
    pub fn insert(
        &mut self,
        config: impl Into<String>,
        target: impl Into<TargetSpec>,
        name: impl Into<String>,
        value: V,
    ) -> Option<V> {
        self.configs
            .entry(config.into())
            .or_default()
            .entry(target.into())
            .or_default()
            .insert(name.into(), value)
    }

    pub fn get(&self, config: &str, target: &TargetSpec, name: &str) -> Option<&V> {
        self.configs.get(config)?.get(target)?.get(name)
    }

    pub fn configs(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Total number of values across all configurations and targets.
    pub fn len(&self) -> usize {
        self.configs
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every value with its full key, ordered by configuration, target, then value name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetSpec, &str, &V)> {
        self.configs.iter().flat_map(|(config, targets)| {
            targets.iter().flat_map(move |(target, values)| {
                values
                    .iter()
                    .map(move |(name, value)| (config.as_str(), target, name.as_str(), value))
            })
        })
    }

    pub(crate) fn config_entry(
        &mut self,
        config: &str,
    ) -> btree_map::Entry<'_, String, BTreeMap<TargetSpec, TargetValues<V>>> {
        self.configs.entry(config.to_owned())
    }

    pub(crate) fn raw_configs(&self) -> &BTreeMap<String, BTreeMap<TargetSpec, TargetValues<V>>> {
        &self.configs
    }
}

/// A complete result: describes the full state as of one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComputationResult<V> {
    pub metadata: ResultMetadata,
    pub results: ResultSet<V>,
    pub market_data: BTreeMap<String, V>,
}

impl<V> ComputationResult<V> {
    pub fn new(metadata: ResultMetadata) -> Self {
        Self {
            metadata,
            results: ResultSet::new(),
            market_data: BTreeMap::new(),
        }
    }

    pub fn cycle_id(&self) -> CycleId {
        self.metadata.cycle_id
    }
}

/// An incremental result: only the values that changed since `previous_calculation_time`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaResult<V> {
    pub metadata: ResultMetadata,
    pub previous_calculation_time: Option<DateTime<Utc>>,
    pub results: ResultSet<V>,
}

impl<V> DeltaResult<V> {
    pub fn new(metadata: ResultMetadata, previous_calculation_time: Option<DateTime<Utc>>) -> Self {
        Self {
            metadata,
            previous_calculation_time,
            results: ResultSet::new(),
        }
    }
}
