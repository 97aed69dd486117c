//! Centralized cache key construction
//!
//! Every cached read is keyed by its resource path plus a sorted query
//! string, so the same logical request always lands on the same key and a
//! farmer's whole namespace can be dropped with one prefix.

use std::collections::BTreeMap;

// Resource namespaces
pub const FARMERS: &str = "farmers";
pub const SENSORS_DASHBOARD: &str = "sensors/dashboard";

/// Namespace shared by every cached read about one farmer.
pub fn farmer_namespace(farmer_id: u64) -> String {
    format!("{}/{}", FARMERS, farmer_id)
}

/// Key for the farmer profile read.
pub fn farmer_profile_key(farmer_id: u64) -> String {
    farmer_namespace(farmer_id)
}

/// Key for a dashboard read. Query parameters are folded in name order,
/// so callers may collect them in any order.
pub fn dashboard_key<'a, I>(farmer_id: u64, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    build_cache_key(
        &format!("{}/{}", farmer_namespace(farmer_id), SENSORS_DASHBOARD),
        params,
    )
}

/// Build a cache key from an endpoint path and its parameters.
/// Parameters are sorted by name; empty values are kept as `name=`.
pub fn build_cache_key<'a, I>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let sorted: BTreeMap<&str, String> = params.into_iter().collect();

    if sorted.is_empty() {
        return endpoint.to_string();
    }

    let query = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<String>>()
        .join("&");

    format!("{}?{}", endpoint, query)
}

/// True when `key` is `prefix` itself or a resource nested under it.
/// The empty prefix is the root namespace and holds every key.
pub fn in_namespace(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some(rest) => {
            prefix.is_empty()
                || rest.is_empty()
                || prefix.ends_with('/')
                || rest.starts_with('/')
                || rest.starts_with('?')
        },
        None => false,
    }
}
