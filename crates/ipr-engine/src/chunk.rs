// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::{IprConfig, validate_training_settings};
use crate::percentile::PercentileAccumulator;
use ipr_core::{ExecutionContext, IprError, RecordId, RecordSource, WaveNumber};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, warn};

/// Low and high percentile of one key, computed from a single chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkPercentilePair {
    pub low: f64,
    pub high: f64,
}

/// Partition of a population into the chunks that take part in training.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub population_size: usize,
    pub chunk_size: usize,
    pub chunks: Vec<Range<usize>>,
    pub discarded_records: usize,
    pub warning: Option<String>,
}

impl ChunkPlan {
    pub fn records_used(&self) -> usize {
        self.population_size - self.discarded_records
    }
}

/// Splits `population_size` records into consecutive chunks of `chunk_size`.
///
/// A short trailing chunk is dropped when at least one full chunk exists and
/// kept when it is the only chunk; both cases carry a warning.
pub fn plan_chunks(population_size: usize, chunk_size: usize) -> Result<ChunkPlan, IprError> {
    if chunk_size == 0 {
        return Err(IprError::configuration("chunk_size must be >= 1; got 0"));
    }

    let full_chunks = population_size / chunk_size;
    let remainder = population_size % chunk_size;
    let mut chunks: Vec<Range<usize>> = (0..full_chunks)
        .map(|idx| idx * chunk_size..(idx + 1) * chunk_size)
        .collect();
    let mut discarded_records = 0usize;
    let mut warning = None;

    if remainder > 0 {
        if full_chunks == 0 {
            chunks.push(0..population_size);
            warning = Some(format!(
                "population of {population_size} records is smaller than chunk_size={chunk_size}; \
                 using the single short chunk"
            ));
        } else {
            discarded_records = remainder;
            warning = Some(format!(
                "discarding trailing short chunk of {remainder} records \
                 (population={population_size}, chunk_size={chunk_size}, full_chunks={full_chunks})"
            ));
        }
    }

    Ok(ChunkPlan {
        population_size,
        chunk_size,
        chunks,
        discarded_records,
        warning,
    })
}

/// First-seen order of every key across the population.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyOrder {
    wave_numbers: Vec<WaveNumber>,
    fields: Vec<String>,
    seen_wave_numbers: HashSet<WaveNumber>,
    seen_fields: HashSet<String>,
}

impl KeyOrder {
    pub fn observe_wave_number(&mut self, wave_number: WaveNumber) {
        if self.seen_wave_numbers.insert(wave_number) {
            self.wave_numbers.push(wave_number);
        }
    }

    pub fn observe_field(&mut self, name: &str) {
        if !self.seen_fields.contains(name) {
            self.seen_fields.insert(name.to_string());
            self.fields.push(name.to_string());
        }
    }

    pub fn wave_numbers(&self) -> &[WaveNumber] {
        &self.wave_numbers
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Per-key percentile pairs reduced from one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkPercentiles {
    pub amplitudes: HashMap<WaveNumber, ChunkPercentilePair>,
    pub fields: HashMap<String, ChunkPercentilePair>,
}

/// Output of a chunked pass: one reduced set per chunk plus bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedChunks {
    pub chunks: Vec<ChunkPercentiles>,
    pub key_order: KeyOrder,
    pub plan: ChunkPlan,
    pub non_finite_samples_skipped: usize,
    pub warnings: Vec<String>,
}

/// Streams a population chunk by chunk and reduces each chunk to percentile pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkAggregator {
    chunk_size: usize,
    low_percentile: f64,
    high_percentile: f64,
}

impl ChunkAggregator {
    pub fn new(
        chunk_size: usize,
        low_percentile: f64,
        high_percentile: f64,
    ) -> Result<Self, IprError> {
        validate_training_settings(chunk_size, low_percentile, high_percentile)?;
        Ok(Self {
            chunk_size,
            low_percentile,
            high_percentile,
        })
    }

    pub fn from_config(config: &IprConfig) -> Result<Self, IprError> {
        Self::new(
            config.chunk_size,
            config.low_percentile,
            config.high_percentile,
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Loads and reduces every planned chunk of `ids`.
    ///
    /// Cancellation is observed before each chunk, never in the middle of one.
    pub fn aggregate(
        &self,
        ids: &[RecordId],
        source: &dyn RecordSource,
        ctx: &ExecutionContext<'_>,
    ) -> Result<AggregatedChunks, IprError> {
        let plan = plan_chunks(ids.len(), self.chunk_size)?;
        let mut warnings = vec![];
        if let Some(message) = &plan.warning {
            warn!(
                population = plan.population_size,
                chunk_size = plan.chunk_size,
                discarded = plan.discarded_records,
                "{message}"
            );
            warnings.push(message.clone());
        }

        let total = plan.chunks.len();
        let mut key_order = KeyOrder::default();
        let mut chunks = Vec::with_capacity(total);
        let mut non_finite_samples_skipped = 0usize;

        for (chunk_idx, range) in plan.chunks.iter().enumerate() {
            ctx.check_cancelled()?;
            let reduced = self.reduce_chunk(
                &ids[range.clone()],
                source,
                &mut key_order,
                &mut non_finite_samples_skipped,
            )?;
            debug!(
                chunk = chunk_idx,
                records = range.len(),
                amplitude_keys = reduced.amplitudes.len(),
                field_keys = reduced.fields.len(),
                "reduced chunk"
            );
            chunks.push(reduced);
            ctx.report_progress((chunk_idx + 1) as f32 / total as f32);
        }

        if non_finite_samples_skipped > 0 {
            let message =
                format!("skipped {non_finite_samples_skipped} non-finite samples during training");
            warn!(skipped = non_finite_samples_skipped, "{message}");
            warnings.push(message);
        }

        ctx.record_scalar("chunks_used", total as f64);
        ctx.record_scalar("records_discarded", plan.discarded_records as f64);

        Ok(AggregatedChunks {
            chunks,
            key_order,
            plan,
            non_finite_samples_skipped,
            warnings,
        })
    }

    fn reduce_chunk(
        &self,
        ids: &[RecordId],
        source: &dyn RecordSource,
        key_order: &mut KeyOrder,
        non_finite_samples_skipped: &mut usize,
    ) -> Result<ChunkPercentiles, IprError> {
        let mut amplitude_acc: HashMap<WaveNumber, PercentileAccumulator> = HashMap::new();
        let mut field_acc: HashMap<String, PercentileAccumulator> = HashMap::new();

        for &id in ids {
            let record = source.load_by_id(id)?;

            for &(wave_number, amplitude) in &record.amplitudes {
                if !amplitude.is_finite() || !wave_number.value().is_finite() {
                    *non_finite_samples_skipped += 1;
                    continue;
                }
                key_order.observe_wave_number(wave_number);
                amplitude_acc
                    .entry(wave_number)
                    .or_insert_with(|| PercentileAccumulator::with_capacity(ids.len()))
                    .add(amplitude);
            }

            for (name, value) in &record.fields {
                let Some(value) = value.as_numeric() else {
                    continue;
                };
                if !value.is_finite() {
                    *non_finite_samples_skipped += 1;
                    continue;
                }
                key_order.observe_field(name);
                match field_acc.get_mut(name) {
                    Some(acc) => acc.add(value),
                    None => {
                        let mut acc = PercentileAccumulator::with_capacity(ids.len());
                        acc.add(value);
                        field_acc.insert(name.clone(), acc);
                    }
                }
            }
        }

        Ok(ChunkPercentiles {
            amplitudes: self.reduce_accumulators(amplitude_acc),
            fields: self.reduce_accumulators(field_acc),
        })
    }

    fn reduce_accumulators<K: std::hash::Hash + Eq>(
        &self,
        accumulators: HashMap<K, PercentileAccumulator>,
    ) -> HashMap<K, ChunkPercentilePair> {
        accumulators
            .into_iter()
            .filter_map(|(key, mut acc)| {
                let low = acc.percentile(self.low_percentile)?;
                let high = acc.percentile(self.high_percentile)?;
                Some((key, ChunkPercentilePair { low, high }))
            })
            .collect()
    }
}
