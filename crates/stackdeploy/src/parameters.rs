//! Parameter merging.
//!
//! Combines the configuration file's parameter list with the request's
//! overrides. Every key appears once; an override always wins.

use std::collections::{BTreeMap, HashMap};

use crate::types::Parameter;

/// Merge configuration parameters with overrides.
///
/// Keys keep their position from `base`; override-only keys follow in key
/// order. A key repeated within `base` keeps its first position and its
/// last value.
#[must_use]
pub fn merge(
    base: Option<&[Parameter]>,
    overrides: Option<&BTreeMap<String, String>>,
) -> Vec<Parameter> {
    let base = base.unwrap_or_default();
    let mut merged: Vec<Parameter> = Vec::with_capacity(base.len());
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(base.len());

    for param in base {
        match positions.get(param.key.as_str()) {
            Some(&idx) => merged[idx].value.clone_from(&param.value),
            None => {
                positions.insert(param.key.as_str(), merged.len());
                merged.push(param.clone());
            }
        }
    }

    let Some(overrides) = overrides else {
        return merged;
    };

    let mut appended = Vec::new();
    for (key, value) in overrides {
        match positions.get(key.as_str()) {
            Some(&idx) => merged[idx].value.clone_from(value),
            None => appended.push(Parameter::new(key, value)),
        }
    }

    merged.extend(appended);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<Parameter> {
        pairs.iter().map(|(k, v)| Parameter::new(*k, *v)).collect()
    }

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn overrides_win() {
        let base = params(&[("A", "1"), ("B", "2")]);
        let over = overrides(&[("B", "3"), ("C", "4")]);

        let merged = merge(Some(base.as_slice()), Some(&over));
        assert_eq!(merged, params(&[("A", "1"), ("B", "3"), ("C", "4")]));
    }

    #[test]
    fn absent_inputs_are_empty() {
        assert!(merge(None, None).is_empty());

        let over = overrides(&[("Env", "prod")]);
        assert_eq!(merge(None, Some(&over)), params(&[("Env", "prod")]));

        let base = params(&[("A", "1")]);
        assert_eq!(merge(Some(base.as_slice()), None), base);
    }

    #[test]
    fn duplicate_base_keys_collapse() {
        let base = params(&[("A", "1"), ("B", "2"), ("A", "9")]);
        let merged = merge(Some(base.as_slice()), None);
        assert_eq!(merged, params(&[("A", "9"), ("B", "2")]));
    }

    #[test]
    fn merge_is_deterministic() {
        let base = params(&[("Z", "1"), ("M", "2")]);
        let over = overrides(&[("Q", "3"), ("B", "4"), ("M", "5")]);

        let first = merge(Some(base.as_slice()), Some(&over));
        let second = merge(Some(base.as_slice()), Some(&over));
        assert_eq!(first, second);
        assert_eq!(
            first,
            params(&[("Z", "1"), ("M", "5"), ("B", "4"), ("Q", "3")])
        );
    }
}
