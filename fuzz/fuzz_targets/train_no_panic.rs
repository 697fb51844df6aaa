// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use ipr_core::{ExecutionContext, InMemoryRecordSource, Record};
use ipr_engine::{IprChecker, IprConfig, TrainableChecker};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);

    let width = common::bounded(cursor.next_u8(), 1, 4);
    let payload_len = common::bounded(cursor.next_u8(), 0, 192).saturating_mul(8);
    let values = common::decode_f64_chunks(&cursor.take_padded(payload_len), 192);
    let waves: Vec<f64> = (0..width).map(|k| 400.0 + k as f64).collect();

    let records: Vec<Record> = values
        .chunks(width)
        .enumerate()
        .map(|(id, row)| Record::from_points(id as u64, &waves[..row.len()], row))
        .collect();
    let Ok(source) = InMemoryRecordSource::new(records) else {
        return;
    };

    let config = IprConfig {
        chunk_size: common::bounded(cursor.next_u8(), 1, 64),
        low_percentile: f64::from(cursor.next_u8() % 128) / 255.0,
        high_percentile: 0.5 + f64::from(cursor.next_u8() % 128) / 255.0,
        ..IprConfig::default()
    };
    let Ok(checker) = IprChecker::new(config) else {
        return;
    };
    if let Ok(model) = checker.train(&source, &ExecutionContext::new()) {
        for (_, range) in model.amplitude_ranges() {
            assert!(range.low.is_finite() && range.high.is_finite());
        }
    }
});
