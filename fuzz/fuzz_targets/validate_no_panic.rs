// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use ipr_core::{ExecutionContext, InMemoryRecordSource, Record, SampleTypeFilter, WaveNumber};
use ipr_engine::{IprChecker, IprConfig, ReportMode, TrainableChecker, Validator};
use libfuzzer_sys::fuzz_target;

const SAMPLE_TYPES: [Option<&str>; 4] = [None, Some("wheat"), Some("barley"), Some("")];
const FILTERS: [&str; 4] = ["*", "wheat", "wh*t", "?arley"];

fn build_value(base: f64, mode_seed: u8, raw_seed: i16) -> f64 {
    match mode_seed % 6 {
        0 => base,
        1 => f64::from(raw_seed) / 8.0,
        2 => 0.0,
        3 => f64::NAN,
        4 => f64::INFINITY,
        _ => f64::NEG_INFINITY,
    }
}

fn build_wave(seed: u8) -> f64 {
    match seed % 11 {
        0 => f64::NAN,
        other => 400.0 + f64::from(other),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);

    let payload_len = common::bounded(cursor.next_u8(), 0, 128).saturating_mul(8);
    let mut values = common::decode_f64_chunks(&cursor.take_padded(payload_len), 128);
    if values.is_empty() {
        values.push(0.0);
    }

    let population = common::bounded(cursor.next_u8(), 1, 48);
    let width = common::bounded(cursor.next_u8(), 0, 6);
    let mut value_idx = 0usize;
    let mut records = Vec::with_capacity(population);
    for id in 0..population {
        let mut amplitudes = Vec::with_capacity(width);
        for _ in 0..width {
            let base = values[value_idx % values.len()];
            value_idx = value_idx.wrapping_add(1);
            amplitudes.push((WaveNumber::new(build_wave(cursor.next_u8())), base));
        }
        let mut record = Record::new(id as u64, amplitudes);
        record.sample_type = SAMPLE_TYPES[usize::from(cursor.next_u8()) % SAMPLE_TYPES.len()]
            .map(str::to_string);
        if cursor.next_u8() & 1 == 1 {
            record = record.with_field("moisture", values[value_idx % values.len()]);
        }
        records.push(record);
    }

    let Ok(source) = InMemoryRecordSource::new(records.clone()) else {
        return;
    };
    let config = IprConfig {
        chunk_size: common::bounded(cursor.next_u8(), 0, 32),
        low_percentile: f64::from(cursor.next_u8()) / 255.0,
        high_percentile: f64::from(cursor.next_u8()) / 255.0,
        population_filter: SampleTypeFilter::new(
            FILTERS[usize::from(cursor.next_u8()) % FILTERS.len()],
        ),
        ..IprConfig::default()
    };
    let Ok(checker) = IprChecker::new(config) else {
        return;
    };
    let Ok(model) = checker.train(&source, &ExecutionContext::new()) else {
        return;
    };

    let mode = if cursor.next_u8() & 1 == 0 {
        ReportMode::FirstViolation
    } else {
        ReportMode::AllViolations
    };
    let factor = f64::from(cursor.next_i16()) / 64.0;
    let Ok(validator) = Validator::new(factor, mode) else {
        return;
    };

    for sample in &mut records {
        for (_, amplitude) in &mut sample.amplitudes {
            *amplitude = build_value(*amplitude, cursor.next_u8(), cursor.next_i16());
        }
        let report = validator.validate(&model, sample);
        assert_eq!(report.sample_id, sample.id);
        if mode == ReportMode::FirstViolation {
            assert!(report.issues.len() <= 1);
        }
    }
});
