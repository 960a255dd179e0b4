//! Core data types shared by the streaming pipeline
//!
//! # Key Types
//!
//! - **`TagSet`**: Key-value labels identifying a series (e.g., host=server1)
//! - **`TimeSeries`**: A labelled series of `timestamp -> value` samples
//! - **`BaseQuery`**: Identity of a raw backend query an expression depends on
//! - **`RawData`**: Backend answer for one window, keyed by base query
//!
//! All timestamps are Unix milliseconds (`i64`).
//!
//! # Example
//!
//! ```rust
//! use kuba_stream::types::{TagSet, TimeSeries};
//!
//! let tags = TagSet::from_pairs([("host", "server1")]);
//! let mut series = TimeSeries::new(tags);
//! series.insert(1_000, 42.5);
//! series.insert(2_000, f64::NAN);
//!
//! assert_eq!(series.len(), 2);
//! assert_eq!(series.value_at(1_000), Some(42.5));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Label set for a series
///
/// Backed by a `BTreeMap` so equality, hashing and serialization do not
/// depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    /// Key-value pairs representing series dimensions
    pub tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tag set from `(key, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tags: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Create from a hashmap
    pub fn from_map(tags: HashMap<String, String>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }

    /// Add a tag
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Get a tag value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.tags.get(key)
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if there are no tags
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// A labelled time-series
///
/// Samples are kept ordered by timestamp. A timestamp may map to `NaN`,
/// which the pipeline treats the same as a missing sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Labels identifying this series
    pub tags: TagSet,

    /// Samples keyed by timestamp (milliseconds)
    pub values: BTreeMap<i64, f64>,
}

impl TimeSeries {
    /// Create an empty series with the given labels
    pub fn new(tags: TagSet) -> Self {
        Self {
            tags,
            values: BTreeMap::new(),
        }
    }

    /// Create a series from `(timestamp, value)` samples
    pub fn from_points(tags: TagSet, points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        Self {
            tags,
            values: points.into_iter().collect(),
        }
    }

    /// Insert or overwrite the sample at `timestamp`
    pub fn insert(&mut self, timestamp: i64, value: f64) {
        self.values.insert(timestamp, value);
    }

    /// Value recorded at `timestamp`, if any
    pub fn value_at(&self, timestamp: i64) -> Option<f64> {
        self.values.get(&timestamp).copied()
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the series holds no samples
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of this series restricted to the half-open range `[start, end)`
    pub fn restrict(&self, start: i64, end: i64) -> TimeSeries {
        if start >= end {
            return TimeSeries::new(self.tags.clone());
        }
        TimeSeries {
            tags: self.tags.clone(),
            values: self
                .values
                .range(start..end)
                .map(|(ts, v)| (*ts, *v))
                .collect(),
        }
    }
}

/// Identity of a raw backend query
///
/// Expressions declare the base queries they read; the fetcher asks the
/// backend for all of them once per window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseQuery(pub String);

impl BaseQuery {
    /// Create a base query from its textual form
    pub fn new(query: impl Into<String>) -> Self {
        Self(query.into())
    }

    /// Textual form of the query
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BaseQuery {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BaseQuery {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Backend answer for one window: every requested base query mapped to the
/// raw series covering exactly that window
pub type RawData = HashMap<BaseQuery, Vec<TimeSeries>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagset_order_independent() {
        let a = TagSet::from_pairs([("host", "a"), ("dc", "east")]);
        let mut b = TagSet::new();
        b.add("dc", "east");
        b.add("host", "a");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{dc=east,host=a}");
    }

    #[test]
    fn test_restrict_is_half_open() {
        let series = TimeSeries::from_points(
            TagSet::new(),
            [(0, 1.0), (10, 2.0), (20, 3.0), (30, 4.0)],
        );
        let restricted = series.restrict(10, 30);
        assert_eq!(restricted.len(), 2);
        assert_eq!(restricted.value_at(10), Some(2.0));
        assert_eq!(restricted.value_at(30), None);
    }

    #[test]
    fn test_restrict_empty_range() {
        let series = TimeSeries::from_points(TagSet::new(), [(0, 1.0)]);
        assert!(series.restrict(5, 5).is_empty());
        assert!(series.restrict(10, 0).is_empty());
    }

    #[test]
    fn test_series_json_shape() {
        let series = TimeSeries::from_points(TagSet::from_pairs([("host", "a")]), [(1000, 2.5)]);
        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json["tags"]["host"], "a");
        assert_eq!(json["values"]["1000"], 2.5);
    }
}
