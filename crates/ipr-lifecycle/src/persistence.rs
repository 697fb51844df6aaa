// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use ipr_core::IprError;
use ipr_engine::{IPR_MODEL_ID, IPR_MODEL_SCHEMA_VERSION, IprModel};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supported codec for model payload bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    #[default]
    Json,
    Bincode,
}

impl std::str::FromStr for PayloadCodec {
    type Err = IprError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "json" => Ok(Self::Json),
            "bincode" => Ok(Self::Bincode),
            other => Err(IprError::invalid_input(format!(
                "payload codec '{other}' is unsupported; expected one of: json, bincode"
            ))),
        }
    }
}

/// A model type that can be written to and read back from a model file.
pub trait PersistableModel: Serialize + DeserializeOwned {
    const MODEL_ID: &'static str;
    const SCHEMA_VERSION: u32;

    /// Invariants checked after every load; a payload that parses but fails
    /// here is rejected.
    fn validate_loaded(&self) -> Result<(), IprError>;
}

impl PersistableModel for IprModel {
    const MODEL_ID: &'static str = IPR_MODEL_ID;
    const SCHEMA_VERSION: u32 = IPR_MODEL_SCHEMA_VERSION;

    fn validate_loaded(&self) -> Result<(), IprError> {
        self.validate()
    }
}

/// Serialized model file envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub model_id: String,
    pub schema_version: u32,
    pub engine_fingerprint: String,
    pub created_at_ns: i64,
    pub payload_crc32: u32,
    pub payload_codec: PayloadCodec,
    pub payload: Vec<u8>,
}

impl ModelEnvelope {
    fn validate_metadata(&self) -> Result<(), IprError> {
        if self.model_id.trim().is_empty() {
            return Err(IprError::invalid_input("model envelope model_id must be non-empty"));
        }
        if self.engine_fingerprint.trim().is_empty() {
            return Err(IprError::invalid_input(
                "model envelope engine_fingerprint must be non-empty",
            ));
        }
        if self.created_at_ns < 0 {
            return Err(IprError::invalid_input(format!(
                "model envelope created_at_ns must be >= 0; got {}",
                self.created_at_ns
            )));
        }
        Ok(())
    }

    fn verify_payload_crc32(&self) -> Result<(), IprError> {
        let observed = crc32fast::hash(&self.payload);
        if observed != self.payload_crc32 {
            return Err(IprError::invalid_input(format!(
                "model payload crc32 mismatch: expected=0x{:08x}, observed=0x{:08x}",
                self.payload_crc32, observed
            )));
        }
        Ok(())
    }
}

fn engine_fingerprint() -> String {
    format!(
        "ipr-lifecycle/{}/{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn now_unix_ns() -> Result<i64, IprError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| {
            IprError::resource_limit(format!(
                "system clock before UNIX epoch; cannot timestamp model: {err}"
            ))
        })?;
    i64::try_from(elapsed.as_nanos())
        .map_err(|_| IprError::resource_limit("system timestamp overflow while saving model"))
}

fn io_resource_error(action: &str, path: &Path, err: std::io::Error) -> IprError {
    IprError::resource_limit(format!("{action} '{}': {err}", path.display()))
}

fn serialize_payload<M: Serialize>(model: &M, codec: PayloadCodec) -> Result<Vec<u8>, IprError> {
    match codec {
        PayloadCodec::Json => serde_json::to_vec(model).map_err(|err| {
            IprError::invalid_input(format!("model serialization failed (codec=json): {err}"))
        }),
        PayloadCodec::Bincode => bincode::serialize(model).map_err(|err| {
            IprError::invalid_input(format!("model serialization failed (codec=bincode): {err}"))
        }),
    }
}

fn deserialize_payload<M: DeserializeOwned>(
    payload: &[u8],
    codec: PayloadCodec,
) -> Result<M, IprError> {
    match codec {
        PayloadCodec::Json => serde_json::from_slice(payload).map_err(|err| {
            IprError::invalid_input(format!("model deserialization failed (codec=json): {err}"))
        }),
        PayloadCodec::Bincode => bincode::deserialize(payload).map_err(|err| {
            IprError::invalid_input(format!(
                "model deserialization failed (codec=bincode): {err}"
            ))
        }),
    }
}

fn write_file_atomic(path: &Path, encoded: &[u8]) -> Result<(), IprError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        IprError::invalid_input(format!(
            "model path '{}' must include a file name",
            path.display()
        ))
    })?;
    let file_name = file_name.to_string_lossy();

    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let temp_path = parent.join(format!("{file_name}.tmp-{}-{suffix}", process::id()));

    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|err| io_resource_error("failed creating model temp file", &temp_path, err))?;

    if let Err(err) = file.write_all(encoded) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error(
            "failed writing model temp file",
            &temp_path,
            err,
        ));
    }

    if let Err(err) = file.sync_all() {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error(
            "failed fsync on model temp file",
            &temp_path,
            err,
        ));
    }

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_resource_error("failed renaming model temp file", path, err));
    }

    Ok(())
}

/// Rejects schema versions this build cannot read.
pub fn validate_model_schema_version<M: PersistableModel>(version: u32) -> Result<(), IprError> {
    if version == M::SCHEMA_VERSION {
        return Ok(());
    }
    Err(IprError::invalid_input(format!(
        "model schema_version={version} is unsupported for '{}'; expected {}",
        M::MODEL_ID,
        M::SCHEMA_VERSION
    )))
}

pub fn encode_model_envelope(envelope: &ModelEnvelope) -> Result<Vec<u8>, IprError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    serde_json::to_vec(envelope).map_err(|err| {
        IprError::invalid_input(format!("model envelope serialization failed: {err}"))
    })
}

pub fn decode_model_envelope(encoded: &[u8]) -> Result<ModelEnvelope, IprError> {
    let envelope: ModelEnvelope = serde_json::from_slice(encoded)
        .map_err(|err| IprError::invalid_input(format!("model envelope parse failed: {err}")))?;
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    Ok(envelope)
}

/// Wraps `model` in a checksummed envelope.
pub fn save_model_to_envelope<M: PersistableModel>(
    model: &M,
    codec: PayloadCodec,
) -> Result<ModelEnvelope, IprError> {
    let payload = serialize_payload(model, codec)?;
    let envelope = ModelEnvelope {
        model_id: M::MODEL_ID.to_string(),
        schema_version: M::SCHEMA_VERSION,
        engine_fingerprint: engine_fingerprint(),
        created_at_ns: now_unix_ns()?,
        payload_crc32: crc32fast::hash(&payload),
        payload_codec: codec,
        payload,
    };
    envelope.validate_metadata()?;
    Ok(envelope)
}

/// Restores a model after id, schema, checksum and model-invariant checks.
pub fn load_model_from_envelope<M: PersistableModel>(
    envelope: &ModelEnvelope,
) -> Result<M, IprError> {
    envelope.validate_metadata()?;
    envelope.verify_payload_crc32()?;
    if envelope.model_id != M::MODEL_ID {
        return Err(IprError::invalid_input(format!(
            "model id mismatch: expected='{}', found='{}'",
            M::MODEL_ID,
            envelope.model_id
        )));
    }
    validate_model_schema_version::<M>(envelope.schema_version)?;
    let model: M = deserialize_payload(&envelope.payload, envelope.payload_codec)?;
    model.validate_loaded()?;
    Ok(model)
}

/// Saves `model` to `path` using atomic persistence (tmp + fsync + rename).
pub fn save_model_to_file<M: PersistableModel>(
    path: impl AsRef<Path>,
    model: &M,
    codec: PayloadCodec,
) -> Result<ModelEnvelope, IprError> {
    let path = path.as_ref();
    let envelope = save_model_to_envelope(model, codec)?;
    let encoded = encode_model_envelope(&envelope)?;
    write_file_atomic(path, &encoded)?;
    Ok(envelope)
}

pub fn load_model_from_file<M: PersistableModel>(path: impl AsRef<Path>) -> Result<M, IprError> {
    let path = path.as_ref();
    let encoded = std::fs::read(path)
        .map_err(|err| io_resource_error("failed reading model file", path, err))?;
    let envelope = decode_model_envelope(&encoded)?;
    load_model_from_envelope(&envelope)
}

#[cfg(test)]
mod tests {
    use super::{
        PayloadCodec, decode_model_envelope, encode_model_envelope, load_model_from_envelope,
        load_model_from_file, save_model_to_envelope, save_model_to_file,
    };
    use ipr_core::{SampleTypeFilter, TrainingDiagnostics, WaveNumber};
    use ipr_engine::{InterPercentileRange, IprModel, SynthesizedRanges};
    use std::path::{Path, PathBuf};
    use std::process;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn unique_temp_model_path(stem: &str) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("{stem}-{}-{seq}.json", process::id()))
    }

    fn remove_file_if_exists(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    fn model() -> IprModel {
        IprModel::new(
            SampleTypeFilter::new("wheat*"),
            SynthesizedRanges {
                amplitudes: vec![
                    (WaveNumber::new(1_100.25), InterPercentileRange::new(0.1 + 0.2, 0.7)),
                    (WaveNumber::new(1_102.5), InterPercentileRange::new(-1.0 / 3.0, 2.0 / 3.0)),
                ],
                fields: vec![("protein".to_string(), InterPercentileRange::new(11.1, 13.9))],
            },
            TrainingDiagnostics {
                population_size: 30,
                chunk_size: 10,
                chunks_used: 3,
                records_used: 30,
                warnings: vec!["sample warning".to_string()],
                ..TrainingDiagnostics::default()
            },
        )
        .expect("valid model")
    }

    #[test]
    fn envelope_roundtrip_supports_json_and_bincode_payload_codecs() {
        let model = model();
        for codec in [PayloadCodec::Json, PayloadCodec::Bincode] {
            let envelope = save_model_to_envelope(&model, codec).expect("envelope save succeeds");
            let encoded = encode_model_envelope(&envelope).expect("envelope should encode");
            let decoded = decode_model_envelope(&encoded).expect("envelope should decode");
            assert_eq!(decoded, envelope);

            let restored: IprModel =
                load_model_from_envelope(&decoded).expect("model load succeeds");
            assert_eq!(restored, model);
        }
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let mut envelope =
            save_model_to_envelope(&model(), PayloadCodec::Json).expect("envelope save succeeds");
        envelope.payload[0] ^= 0xff;
        let err = load_model_from_envelope::<IprModel>(&envelope).expect_err("crc must fail");
        assert!(err.to_string().contains("crc32 mismatch"));

        let truncated = br#"{"model_id":"ipr""#;
        assert!(decode_model_envelope(truncated).is_err());
    }

    #[test]
    fn model_id_and_schema_mismatch_fail_before_restore() {
        let mut envelope =
            save_model_to_envelope(&model(), PayloadCodec::Json).expect("envelope save succeeds");
        envelope.model_id = "other".to_string();
        let err = load_model_from_envelope::<IprModel>(&envelope).expect_err("id mismatch");
        assert!(err.to_string().contains("model id mismatch"));

        let mut envelope =
            save_model_to_envelope(&model(), PayloadCodec::Json).expect("envelope save succeeds");
        envelope.schema_version = 99;
        let err = load_model_from_envelope::<IprModel>(&envelope).expect_err("schema mismatch");
        assert!(err.to_string().contains("schema_version=99"));
    }

    #[test]
    fn payload_that_parses_but_breaks_model_invariants_is_rejected() {
        let diagnostics =
            serde_json::to_value(TrainingDiagnostics::default()).expect("diagnostics serialize");
        let json = serde_json::json!({
            "sample_type_filter": "*",
            "amplitude_ranges": [
                [400.0, {"low": 0.0, "high": 1.0}],
                [400.0, {"low": 0.0, "high": 1.0}]
            ],
            "field_ranges": [],
            "diagnostics": diagnostics,
        });
        let payload = serde_json::to_vec(&json).expect("payload encodes");
        let mut envelope =
            save_model_to_envelope(&model(), PayloadCodec::Json).expect("envelope save succeeds");
        envelope.payload_crc32 = crc32fast::hash(&payload);
        envelope.payload = payload;

        let err = load_model_from_envelope::<IprModel>(&envelope).expect_err("duplicate keys");
        assert!(err.to_string().contains("duplicate wave number"));
    }

    #[test]
    fn atomic_save_writes_final_file_without_leaking_temp_files() {
        let path = unique_temp_model_path("ipr-lifecycle-atomic-save");
        remove_file_if_exists(&path);

        save_model_to_file(&path, &model(), PayloadCodec::Bincode).expect("save succeeds");
        let restored: IprModel = load_model_from_file(&path).expect("load succeeds");
        assert_eq!(restored, model());

        let parent = path.parent().expect("temp path has a parent");
        let stem = path
            .file_name()
            .expect("temp path has a file name")
            .to_string_lossy()
            .to_string();
        let leaked = std::fs::read_dir(parent)
            .expect("temp dir is readable")
            .filter_map(Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(&format!("{stem}.tmp-"))
            });
        assert!(!leaked);
        remove_file_if_exists(&path);
    }

    #[test]
    fn missing_file_is_a_resource_error() {
        let path = unique_temp_model_path("ipr-lifecycle-missing");
        remove_file_if_exists(&path);
        let err = load_model_from_file::<IprModel>(&path).expect_err("missing file");
        assert!(err.to_string().contains("failed reading model file"));
    }

    #[test]
    fn codec_parses_from_cli_names() {
        assert_eq!("json".parse::<PayloadCodec>(), Ok(PayloadCodec::Json));
        assert_eq!("bincode".parse::<PayloadCodec>(), Ok(PayloadCodec::Bincode));
        assert!("yaml".parse::<PayloadCodec>().is_err());
    }
}
