// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::chunk::{ChunkPercentilePair, ChunkPercentiles, KeyOrder};
use crate::model::InterPercentileRange;
use crate::percentile::median;
use ipr_core::WaveNumber;
use std::collections::HashMap;
use std::hash::Hash;

/// Final ranges in population order, ready to become a model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SynthesizedRanges {
    pub amplitudes: Vec<(WaveNumber, InterPercentileRange)>,
    pub fields: Vec<(String, InterPercentileRange)>,
}

impl SynthesizedRanges {
    pub fn key_count(&self) -> usize {
        self.amplitudes.len() + self.fields.len()
    }
}

/// Combines per-chunk percentile pairs by taking the median of each side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeSynthesizer;

impl RangeSynthesizer {
    /// A key missing from some chunks is synthesized from the chunks that
    /// carry it; a key present in none of them is omitted.
    pub fn synthesize(chunks: &[ChunkPercentiles], key_order: &KeyOrder) -> SynthesizedRanges {
        let amplitudes = key_order
            .wave_numbers()
            .iter()
            .filter_map(|wave_number| {
                synthesize_key(chunks.iter().map(|chunk| &chunk.amplitudes), wave_number)
                    .map(|range| (*wave_number, range))
            })
            .collect();
        let fields = key_order
            .fields()
            .iter()
            .filter_map(|name| {
                synthesize_key(chunks.iter().map(|chunk| &chunk.fields), name)
                    .map(|range| (name.clone(), range))
            })
            .collect();
        SynthesizedRanges { amplitudes, fields }
    }
}

fn synthesize_key<'a, K, I>(per_chunk: I, key: &K) -> Option<InterPercentileRange>
where
    K: Hash + Eq + 'a,
    I: Iterator<Item = &'a HashMap<K, ChunkPercentilePair>>,
{
    let (lows, highs): (Vec<f64>, Vec<f64>) = per_chunk
        .filter_map(|pairs| pairs.get(key))
        .map(|pair| (pair.low, pair.high))
        .unzip();
    Some(InterPercentileRange::new(median(&lows)?, median(&highs)?))
}

#[cfg(test)]
mod tests {
    use super::RangeSynthesizer;
    use crate::chunk::{ChunkPercentilePair, ChunkPercentiles, KeyOrder};
    use crate::model::InterPercentileRange;
    use ipr_core::WaveNumber;

    fn chunk(low: f64, high: f64, with_field: bool) -> ChunkPercentiles {
        let mut out = ChunkPercentiles::default();
        out.amplitudes
            .insert(WaveNumber::new(500.0), ChunkPercentilePair { low, high });
        if with_field {
            out.fields.insert(
                "protein".to_string(),
                ChunkPercentilePair {
                    low: low * 10.0,
                    high: high * 10.0,
                },
            );
        }
        out
    }

    fn key_order() -> KeyOrder {
        let mut order = KeyOrder::default();
        order.observe_wave_number(WaveNumber::new(500.0));
        order.observe_field("protein");
        order
    }

    #[test]
    fn medians_each_side_independently() {
        let chunks = [
            chunk(1.0, 9.0, false),
            chunk(2.0, 8.0, false),
            chunk(0.0, 10.0, false),
        ];
        let ranges = RangeSynthesizer::synthesize(&chunks, &key_order());
        assert_eq!(
            ranges.amplitudes,
            vec![(WaveNumber::new(500.0), InterPercentileRange::new(1.0, 9.0))]
        );
        assert!(ranges.fields.is_empty());
    }

    #[test]
    fn sparse_key_uses_only_chunks_where_it_appeared() {
        let chunks = [
            chunk(1.0, 2.0, true),
            chunk(5.0, 6.0, false),
            chunk(3.0, 4.0, true),
        ];
        let ranges = RangeSynthesizer::synthesize(&chunks, &key_order());
        assert_eq!(
            ranges.fields,
            vec![("protein".to_string(), InterPercentileRange::new(20.0, 30.0))]
        );
        assert_eq!(ranges.key_count(), 2);
    }

    #[test]
    fn result_is_independent_of_chunk_order() {
        let forward = [
            chunk(1.0, 9.0, true),
            chunk(2.0, 8.0, true),
            chunk(0.0, 10.0, true),
            chunk(4.0, 4.5, true),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(
            RangeSynthesizer::synthesize(&forward, &key_order()),
            RangeSynthesizer::synthesize(&reversed, &key_order())
        );
    }

    #[test]
    fn inverted_chunk_pairs_are_tolerated() {
        let chunks = [chunk(5.0, 1.0, false)];
        let ranges = RangeSynthesizer::synthesize(&chunks, &key_order());
        let (_, range) = ranges.amplitudes[0];
        assert_eq!(range.width(), -4.0);
        assert_eq!(range.clamped_width(), 0.0);
    }
}
