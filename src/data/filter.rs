use std::collections::{BTreeMap, BTreeSet};

use super::model::{AttrValue, Dataset};

// ---------------------------------------------------------------------------
// Attribute filter: which values are selected per attribute key
// ---------------------------------------------------------------------------

/// Per-key selection state: attribute key → set of accepted values.
/// A key absent from the map places no constraint.
pub type AttrFilter = BTreeMap<String, BTreeSet<AttrValue>>;

/// For each attribute key used by any data variable, its distinct values.
pub fn unique_attr_values(dataset: &Dataset) -> BTreeMap<String, BTreeSet<AttrValue>> {
    let mut unique: BTreeMap<String, BTreeSet<AttrValue>> = BTreeMap::new();
    for var in dataset.data_vars().values() {
        for (key, value) in var.attrs() {
            unique.entry(key.clone()).or_default().insert(value.clone());
        }
    }
    unique
}

/// An [`AttrFilter`] with every value selected (nothing filtered out).
pub fn init_filter_state(dataset: &Dataset) -> AttrFilter {
    unique_attr_values(dataset)
}

/// Names of data variables passing every active filter.
///
/// A variable passes a key's filter when:
/// * the selected set is empty → nothing selected → fails
/// * the set holds every known value of the key → passes
/// * the variable's value for the key is selected → passes
/// * the variable lacks the key → passes only if `Null` is selected
pub fn matching_vars(dataset: &Dataset, filters: &AttrFilter) -> Vec<String> {
    let unique = unique_attr_values(dataset);
    dataset
        .data_vars()
        .iter()
        .filter(|(_, var)| {
            filters.iter().all(|(key, selected)| {
                if selected.is_empty() {
                    return false;
                }
                if unique.get(key).is_some_and(|all| all.is_subset(selected)) {
                    return true;
                }
                match var.attrs().get(key) {
                    Some(value) => selected.contains(value),
                    None => selected.contains(&AttrValue::Null),
                }
            })
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Read a textual attribute value the way JSON attrs load: integers,
/// floats, `true`/`false` and `null` keep their kind, anything else is text.
pub fn parse_attr_value(text: &str) -> AttrValue {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        AttrValue::Integer(i)
    } else if let Ok(f) = text.parse::<f64>() {
        AttrValue::Float(f)
    } else {
        match text {
            "true" => AttrValue::Bool(true),
            "false" => AttrValue::Bool(false),
            "null" => AttrValue::Null,
            _ => AttrValue::from(text),
        }
    }
}

/// The sub-dataset of variables passing `filters`.
pub fn filter_by_attrs(dataset: &Dataset, filters: &AttrFilter) -> Dataset {
    dataset.select_vars(&matching_vars(dataset, filters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::buffer::HostArray;
    use crate::data::model::{Coordinate, DataArray};

    fn dataset() -> Dataset {
        let var = |standard_name: &str| {
            DataArray::new(vec!["time"], HostArray::from_vec(vec![1.0, 2.0]))
                .unwrap()
                .with_attr("standard_name", standard_name)
        };
        let flag = DataArray::new(vec!["station"], HostArray::from_vec(vec![0.0])).unwrap();
        Dataset::new()
            .with_var("air", var("air_temperature").with_attr("level", 850_i64))
            .unwrap()
            .with_var("rh", var("relative_humidity").with_attr("level", 500_i64))
            .unwrap()
            .with_var("flag", flag)
            .unwrap()
            .with_coord("time", Coordinate::index("time", vec![0.0, 6.0]))
            .unwrap()
    }

    #[test]
    fn full_selection_keeps_everything() {
        let ds = dataset();
        let filters = init_filter_state(&ds);
        assert_eq!(matching_vars(&ds, &filters), ["air", "flag", "rh"]);
    }

    #[test]
    fn partial_selection_filters_and_drops_unused_coords() {
        let ds = dataset();
        let mut filters = AttrFilter::new();
        filters.insert(
            "standard_name".into(),
            [AttrValue::from("relative_humidity")].into_iter().collect(),
        );

        let picked = filter_by_attrs(&ds, &filters);
        assert_eq!(picked.data_vars().keys().collect::<Vec<_>>(), ["rh"]);
        assert!(picked.coords().contains_key("time"));

        filters.insert(
            "standard_name".into(),
            [AttrValue::Null].into_iter().collect(),
        );
        let picked = filter_by_attrs(&ds, &filters);
        assert_eq!(picked.data_vars().keys().collect::<Vec<_>>(), ["flag"]);
        assert!(picked.coords().is_empty());
    }

    #[test]
    fn attr_values_parse_by_kind() {
        assert_eq!(parse_attr_value("850"), AttrValue::Integer(850));
        assert_eq!(parse_attr_value(" 2.5"), AttrValue::Float(2.5));
        assert_eq!(parse_attr_value("false"), AttrValue::Bool(false));
        assert_eq!(parse_attr_value("null"), AttrValue::Null);
        assert_eq!(parse_attr_value("degK"), AttrValue::from("degK"));

        let ds = dataset();
        let mut filters = AttrFilter::new();
        filters
            .entry("level".into())
            .or_default()
            .insert(parse_attr_value("850"));
        assert_eq!(matching_vars(&ds, &filters), ["air"]);
    }

    #[test]
    fn empty_selection_matches_nothing() {
        let ds = dataset();
        let mut filters = AttrFilter::new();
        filters.insert("level".into(), BTreeSet::new());
        assert!(matching_vars(&ds, &filters).is_empty());
    }
}
