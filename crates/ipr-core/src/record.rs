// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::key::{FieldValue, WaveNumber};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of one population member in a [`crate::RecordSource`].
pub type RecordId = u64;

/// One spectral measurement: amplitudes by wave number plus metadata fields.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub sample_type: Option<String>,
    /// Amplitudes in spectrum order.
    pub amplitudes: Vec<(WaveNumber, f64)>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: RecordId, amplitudes: Vec<(WaveNumber, f64)>) -> Self {
        Self {
            id,
            sample_type: None,
            amplitudes,
            fields: BTreeMap::new(),
        }
    }

    /// Builds a record from parallel wave-number and amplitude slices.
    pub fn from_points(id: RecordId, wave_numbers: &[f64], amplitudes: &[f64]) -> Self {
        let points = wave_numbers
            .iter()
            .zip(amplitudes)
            .map(|(&wn, &amp)| (WaveNumber::new(wn), amp))
            .collect();
        Self::new(id, points)
    }

    pub fn with_sample_type(mut self, sample_type: impl Into<String>) -> Self {
        self.sample_type = Some(sample_type.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn amplitude_count(&self) -> usize {
        self.amplitudes.len()
    }

    /// Exact-match lookup; there is no nearest-neighbour fallback.
    pub fn amplitude_at(&self, wave_number: WaveNumber) -> Option<f64> {
        self.amplitudes
            .iter()
            .find(|(wn, _)| *wn == wave_number)
            .map(|(_, amplitude)| *amplitude)
    }

    /// Index for repeated exact lookups. The first occurrence of a wave number wins.
    pub fn amplitude_index(&self) -> HashMap<WaveNumber, f64> {
        let mut index = HashMap::with_capacity(self.amplitudes.len());
        for &(wave_number, amplitude) in &self.amplitudes {
            index.entry(wave_number).or_insert(amplitude);
        }
        index
    }

    pub fn field_value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Sample-type pattern selecting a training population.
///
/// An empty pattern or `*` matches everything. Otherwise `*` matches any run of
/// characters and every other character is literal.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SampleTypeFilter {
    pattern: String,
}

impl SampleTypeFilter {
    pub fn match_all() -> Self {
        Self::default()
    }

    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match_all(&self) -> bool {
        self.pattern.is_empty() || self.pattern.chars().all(|c| c == '*')
    }

    pub fn matches(&self, sample_type: &str) -> bool {
        self.is_match_all() || wildcard_match(&self.pattern, sample_type)
    }

    /// Population membership: untyped records only belong to match-all populations.
    pub fn accepts(&self, sample_type: Option<&str>) -> bool {
        match sample_type {
            Some(sample_type) => self.matches(sample_type),
            None => self.is_match_all(),
        }
    }
}

impl fmt::Display for SampleTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_match_all() {
            f.write_str("*")
        } else {
            f.write_str(&self.pattern)
        }
    }
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::{Record, SampleTypeFilter};
    use crate::key::{FieldValue, WaveNumber};

    fn sample() -> Record {
        Record::from_points(7, &[400.0, 410.0, 420.0], &[0.1, 0.2, 0.3])
            .with_sample_type("wheat")
            .with_field("moisture", 12.5)
            .with_field("origin", "NZ")
    }

    #[test]
    fn amplitude_lookup_is_exact() {
        let record = sample();
        assert_eq!(record.amplitude_count(), 3);
        assert_eq!(record.amplitude_at(WaveNumber::new(410.0)), Some(0.2));
        assert_eq!(record.amplitude_at(WaveNumber::new(410.000_001)), None);
    }

    #[test]
    fn amplitude_index_matches_linear_lookup() {
        let record = sample();
        let index = record.amplitude_index();
        for &(wn, amp) in &record.amplitudes {
            assert_eq!(index.get(&wn), Some(&amp));
        }
    }

    #[test]
    fn field_lookup_by_name() {
        let record = sample();
        assert_eq!(
            record.field_value("moisture"),
            Some(&FieldValue::Numeric(12.5))
        );
        assert_eq!(record.field_value("protein"), None);
    }

    #[test]
    fn empty_and_star_patterns_match_everything() {
        for filter in [SampleTypeFilter::match_all(), SampleTypeFilter::new("*")] {
            assert!(filter.is_match_all());
            assert!(filter.matches("wheat"));
            assert!(filter.accepts(None));
        }
    }

    #[test]
    fn wildcards_match_runs_of_characters() {
        let filter = SampleTypeFilter::new("wheat*flour");
        assert!(filter.matches("wheatflour"));
        assert!(filter.matches("wheat-white-flour"));
        assert!(!filter.matches("wheat-white-flours"));
        assert!(!filter.matches("Wheatflour"));

        let filter = SampleTypeFilter::new("*barley*");
        assert!(filter.matches("malting barley 2024"));
        assert!(!filter.matches("wheat"));
    }

    #[test]
    fn untyped_records_only_join_match_all_populations() {
        let filter = SampleTypeFilter::new("wheat");
        assert!(filter.accepts(Some("wheat")));
        assert!(!filter.accepts(None));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn record_json_omits_optional_parts() {
        let decoded: Record =
            serde_json::from_str(r#"{"id": 3, "amplitudes": [[400.0, 0.5], [410.0, 0.75]]}"#)
                .expect("minimal record should deserialize");
        assert_eq!(decoded.id, 3);
        assert!(decoded.sample_type.is_none());
        assert!(decoded.fields.is_empty());
        assert_eq!(decoded.amplitude_at(WaveNumber::new(410.0)), Some(0.75));
    }
}
