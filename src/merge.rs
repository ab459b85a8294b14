//! Key-latest-wins merging of full and delta results.
//!
//! A merge copies every value present in the incoming result over the accumulator. Values the
//! incoming result does not mention are left alone, so merging never shrinks the accumulator and
//! merging the same input twice is the same as merging it once. Inputs are only borrowed.

use std::collections::BTreeMap;

use crate::model::{ComputationResult, DeltaResult, ResultSet};

/// Merge `incoming` into `acc`. All metadata and market data are taken from `incoming`.
pub fn merge_full<V: Clone>(acc: &mut ComputationResult<V>, incoming: &ComputationResult<V>) {
    acc.metadata = incoming.metadata.clone();
    merge_result_set(&mut acc.results, &incoming.results);
    merge_flat(&mut acc.market_data, &incoming.market_data);
}

/// Merge `incoming` into `acc`.
///
/// `previous_calculation_time` belongs to whichever delta started the accumulator and is never
/// overwritten, so the merged delta spans from there to the latest calculation.
pub fn merge_delta<V: Clone>(acc: &mut DeltaResult<V>, incoming: &DeltaResult<V>) {
    acc.metadata = incoming.metadata.clone();
    merge_result_set(&mut acc.results, &incoming.results);
}

/// Merge an optional incoming payload into an optional accumulator; an empty accumulator adopts
/// the incoming payload as-is.
pub(crate) fn merge_into<T>(acc: &mut Option<T>, incoming: Option<T>, merge: impl FnOnce(&mut T, &T)) {
    let Some(incoming) = incoming else {
        return;
    };
    match acc {
        Some(existing) => merge(existing, &incoming),
        None => *acc = Some(incoming),
    }
}

fn merge_result_set<V: Clone>(acc: &mut ResultSet<V>, incoming: &ResultSet<V>) {
    for (config, targets) in incoming.raw_configs() {
        let acc_targets = acc.config_entry(config).or_default();
        for (target, values) in targets {
            let acc_values = acc_targets.entry(target.clone()).or_default();
            merge_flat(acc_values, values);
        }
    }
}

fn merge_flat<V: Clone>(acc: &mut BTreeMap<String, V>, incoming: &BTreeMap<String, V>) {
    for (name, value) in incoming {
        acc.insert(name.clone(), value.clone());
    }
}
