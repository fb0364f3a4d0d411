//! Persisted form of a runtime composition
//!
//! Binary layout:
//!
//! ```text
//! magic "PWRC" | version u32 LE | xxh3-64 of payload u64 LE | payload
//! ```
//!
//! The payload is MessagePack with named fields. The portable form is plain
//! JSON of the same structure. Both forms are validated on load, so a
//! decoded composition always passes [`RuntimeComposition::validate`].

use std::io::Write;
use std::path::Path;

use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::composition::RuntimeComposition;
use crate::error::PersistError;

/// Magic bytes of the binary form
pub const MAGIC: &[u8; 4] = b"PWRC";
/// Current binary format version
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;

impl RuntimeComposition {
    /// Encode into the binary persisted form
    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        let payload =
            rmp_serde::to_vec_named(self).map_err(|e| PersistError::Encode(e.to_string()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&xxh3_64(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode and validate the binary persisted form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistError> {
        if bytes.len() < HEADER_LEN {
            return Err(PersistError::TooShort { len: bytes.len() });
        }
        if &bytes[0..4] != MAGIC {
            return Err(PersistError::BadMagic);
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&bytes[8..HEADER_LEN]);
        let expected = u64::from_le_bytes(checksum);

        let payload = &bytes[HEADER_LEN..];
        let actual = xxh3_64(payload);
        if actual != expected {
            return Err(PersistError::ChecksumMismatch { expected, actual });
        }

        let composition: RuntimeComposition =
            rmp_serde::from_slice(payload).map_err(|e| PersistError::Decode(e.to_string()))?;
        composition.validate()?;
        Ok(composition)
    }

    /// Encode into pretty-printed JSON
    ///
    /// JSON has no representation for NaN or infinities, so metadata holding
    /// one is an encode error rather than a silent `null`.
    pub fn to_json(&self) -> Result<String, PersistError> {
        for part in self.parts() {
            for export in &part.exports {
                if let Some(key) = export.metadata.non_finite_key() {
                    return Err(PersistError::Encode(format!(
                        "metadata `{}` of {} export `{}` is not a finite number",
                        key, part.identity, export.contract
                    )));
                }
            }
        }
        serde_json::to_string_pretty(self).map_err(|e| PersistError::Encode(e.to_string()))
    }

    /// Decode and validate JSON
    pub fn from_json(json: &str) -> Result<Self, PersistError> {
        let composition: RuntimeComposition =
            serde_json::from_str(json).map_err(|e| PersistError::Decode(e.to_string()))?;
        composition.validate()?;
        Ok(composition)
    }

    /// Write the binary form atomically (temp file, fsync, rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), PersistError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistError::Io { path, source }
        };

        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;

        let buf = self.to_bytes()?;
        let tmp_path = path.with_extension("pwrc.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            file.write_all(&buf).map_err(io_err(&tmp_path))?;
            file.sync_all().map_err(io_err(&tmp_path))?;
        }
        std::fs::rename(&tmp_path, path).map_err(io_err(path))?;

        debug!(
            target: "partwire::runtime",
            path = %path.display(),
            bytes = buf.len(),
            "Wrote runtime composition"
        );
        Ok(())
    }

    /// Read and validate a file written by [`RuntimeComposition::write_to_file`]
    pub fn read_from_file(path: &Path) -> Result<Self, PersistError> {
        let bytes = std::fs::read(path).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use partwire_core::{Catalog, ImportDefinition, MetadataValue, PartDefinition, TypeRef};
    use partwire_resolver::Configuration;

    fn composition() -> RuntimeComposition {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(TypeRef::named("Service"))
                .export_self()
                .constructor_import(ImportDefinition::exactly_one("Logger"))
                .member_import("plugins", ImportDefinition::zero_or_more("Plugin"))
                .build(),
            PartDefinition::builder(TypeRef::named("Logger"))
                .export_self()
                .build(),
            PartDefinition::builder(TypeRef::named("CsvPlugin"))
                .export(partwire_core::ExportDefinition::new("Plugin").with_metadata("Format", "csv"))
                .non_shared()
                .build(),
        ]);
        RuntimeComposition::build(&Configuration::create(&catalog)).unwrap()
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = composition();
        let bytes = original.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(RuntimeComposition::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn test_json_roundtrip() {
        let original = composition();
        let json = original.to_json().unwrap();
        assert_eq!(RuntimeComposition::from_json(&json).unwrap(), original);
    }

    fn weighted(weight: f64) -> RuntimeComposition {
        let catalog = Catalog::from_parts([PartDefinition::builder(TypeRef::named("Scale"))
            .export(partwire_core::ExportDefinition::new("Scale").with_metadata("Weight", weight))
            .build()]);
        RuntimeComposition::build(&Configuration::create(&catalog)).unwrap()
    }

    #[test]
    fn test_json_roundtrip_preserves_float_bits() {
        for weight in [1.0715660391465826e-75, 0.1 + 0.2, f64::MIN_POSITIVE, -0.0] {
            let original = weighted(weight);
            let back = RuntimeComposition::from_json(&original.to_json().unwrap()).unwrap();
            assert_eq!(back, original);
            let value = back.parts()[0].exports[0].metadata.get("Weight");
            assert!(
                matches!(value, Some(MetadataValue::Float(v)) if v.to_bits() == weight.to_bits()),
                "{:?} came back as {:?}",
                weight,
                value
            );
        }
    }

    #[test]
    fn test_json_rejects_non_finite_metadata() {
        for weight in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = weighted(weight).to_json().unwrap_err();
            assert!(matches!(err, PersistError::Encode(ref msg) if msg.contains("Weight")));
        }
        // The binary form carries them unchanged
        let bytes = weighted(f64::INFINITY).to_bytes().unwrap();
        assert!(RuntimeComposition::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("app.pwrc");

        let original = composition();
        original.write_to_file(&path).unwrap();
        assert!(!path.with_extension("pwrc.tmp").exists());
        assert_eq!(RuntimeComposition::read_from_file(&path).unwrap(), original);
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            RuntimeComposition::from_bytes(b"PWRC"),
            Err(PersistError::TooShort { len: 4 })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = composition().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            RuntimeComposition::from_bytes(&bytes),
            Err(PersistError::BadMagic)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = composition().to_bytes().unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            RuntimeComposition::from_bytes(&bytes),
            Err(PersistError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut bytes = composition().to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            RuntimeComposition::from_bytes(&bytes),
            Err(PersistError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_inconsistent_json_is_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_str(&composition().to_json().unwrap()).unwrap();
        value["construction_order"] = serde_json::json!([0, 0, 1]);
        let err = RuntimeComposition::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(
            err,
            PersistError::Invalid(BuildError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = RuntimeComposition::read_from_file(&tmp.path().join("absent.pwrc")).unwrap_err();
        assert!(matches!(err, PersistError::Io { .. }));
    }
}
