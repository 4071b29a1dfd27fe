/// Keyword specifications
///
/// A keyword is described either by a bare path to its definition file, in
/// which case the default sensitivity applies, or by an explicit path and
/// sensitivity pair. The order of a keyword list defines the index reported
/// when that keyword is detected.

use crate::detector::DetectorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sensitivity used when a keyword is given as a bare path
pub const DEFAULT_SENSITIVITY: f32 = 0.5;

/// A single keyword definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordSpec {
    /// Path to the keyword file, default sensitivity
    Path(PathBuf),

    /// Path to the keyword file with an explicit sensitivity (0.0 - 1.0)
    WithSensitivity {
        file_path: PathBuf,
        sensitivity: f32,
    },
}

impl KeywordSpec {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self::Path(file_path.into())
    }

    pub fn with_sensitivity(file_path: impl Into<PathBuf>, sensitivity: f32) -> Self {
        Self::WithSensitivity {
            file_path: file_path.into(),
            sensitivity,
        }
    }

    pub fn file_path(&self) -> &Path {
        match self {
            Self::Path(path) => path,
            Self::WithSensitivity { file_path, .. } => file_path,
        }
    }

    pub fn sensitivity(&self) -> f32 {
        match self {
            Self::Path(_) => DEFAULT_SENSITIVITY,
            Self::WithSensitivity { sensitivity, .. } => *sensitivity,
        }
    }
}

/// Parses `path` or `path:sensitivity`.
///
/// A suffix after the last `:` that is not a number is treated as part of
/// the path.
impl FromStr for KeywordSpec {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DetectorError::InvalidKeyword(
                "empty keyword specification".to_string(),
            ));
        }

        match s.rsplit_once(':') {
            Some((path, suffix)) if !path.is_empty() => match suffix.parse::<f32>() {
                Ok(sensitivity) => Ok(Self::with_sensitivity(path, sensitivity)),
                Err(_) if suffix.is_empty() => Err(DetectorError::InvalidKeyword(format!(
                    "missing sensitivity after ':' in '{}'",
                    s
                ))),
                Err(_) => Ok(Self::new(s)),
            },
            _ => Ok(Self::new(s)),
        }
    }
}

/// Keywords passed to the engine at construction
///
/// `Single` makes the detector report a boolean per frame, `Multiple` makes it
/// report the index of the matched keyword. A one-element list is still
/// `Multiple`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keywords {
    Multiple(Vec<KeywordSpec>),
    Single(KeywordSpec),
}

impl Keywords {
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple(_))
    }

    /// Keyword specifications in index order
    pub fn specs(&self) -> &[KeywordSpec] {
        match self {
            Self::Multiple(specs) => specs,
            Self::Single(spec) => std::slice::from_ref(spec),
        }
    }

    pub fn len(&self) -> usize {
        self.specs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs().is_empty()
    }

    /// Check list shape and sensitivity ranges (no file system access)
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.is_empty() {
            return Err(DetectorError::InvalidKeyword(
                "at least one keyword is required".to_string(),
            ));
        }

        for (index, spec) in self.specs().iter().enumerate() {
            let value = spec.sensitivity();
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::SensitivityOutOfRange { index, value });
            }
        }

        Ok(())
    }
}

impl From<KeywordSpec> for Keywords {
    fn from(spec: KeywordSpec) -> Self {
        Self::Single(spec)
    }
}

impl From<Vec<KeywordSpec>> for Keywords {
    fn from(specs: Vec<KeywordSpec>) -> Self {
        Self::Multiple(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bare_path_uses_default_sensitivity() {
        let spec = KeywordSpec::new("keywords/porcupine.ppn");
        assert_eq!(spec.file_path(), Path::new("keywords/porcupine.ppn"));
        assert_relative_eq!(spec.sensitivity(), DEFAULT_SENSITIVITY);
    }

    #[test]
    fn test_deserialize_string_and_object() {
        let spec: KeywordSpec = serde_json::from_str(r#""a.ppn""#).unwrap();
        assert_eq!(spec, KeywordSpec::new("a.ppn"));

        let spec: KeywordSpec =
            serde_json::from_str(r#"{"file_path": "b.ppn", "sensitivity": 0.7}"#).unwrap();
        assert_eq!(spec.file_path(), Path::new("b.ppn"));
        assert_relative_eq!(spec.sensitivity(), 0.7);
    }

    #[test]
    fn test_deserialize_keywords_single_vs_list() {
        let single: Keywords = serde_json::from_str(r#""a.ppn""#).unwrap();
        assert!(!single.is_multiple());
        assert_eq!(single.len(), 1);

        let list: Keywords = serde_json::from_str(
            r#"["a.ppn", {"file_path": "b.ppn", "sensitivity": 0.3}]"#,
        )
        .unwrap();
        assert!(list.is_multiple());
        assert_eq!(list.specs()[1].file_path(), Path::new("b.ppn"));

        let one: Keywords = serde_json::from_str(r#"["a.ppn"]"#).unwrap();
        assert!(one.is_multiple());
    }

    #[test]
    fn test_parse_from_str() {
        let spec: KeywordSpec = "hey.ppn".parse().unwrap();
        assert_eq!(spec, KeywordSpec::new("hey.ppn"));

        let spec: KeywordSpec = "hey.ppn:0.25".parse().unwrap();
        assert_relative_eq!(spec.sensitivity(), 0.25);
        assert_eq!(spec.file_path(), Path::new("hey.ppn"));

        let spec: KeywordSpec = "dir:with:colons/hey.ppn".parse().unwrap();
        assert_eq!(spec.file_path(), Path::new("dir:with:colons/hey.ppn"));

        assert!("".parse::<KeywordSpec>().is_err());
        assert!("hey.ppn:".parse::<KeywordSpec>().is_err());
    }

    #[test]
    fn test_validate_sensitivity_range() {
        let ok = Keywords::from(vec![
            KeywordSpec::with_sensitivity("a.ppn", 0.0),
            KeywordSpec::with_sensitivity("b.ppn", 1.0),
        ]);
        assert!(ok.validate().is_ok());

        let bad = Keywords::from(vec![
            KeywordSpec::new("a.ppn"),
            KeywordSpec::with_sensitivity("b.ppn", 1.5),
        ]);
        match bad.validate() {
            Err(DetectorError::SensitivityOutOfRange { index, value }) => {
                assert_eq!(index, 1);
                assert_relative_eq!(value, 1.5);
            }
            other => panic!("Expected SensitivityOutOfRange, got {:?}", other),
        }

        let nan = Keywords::from(KeywordSpec::with_sensitivity("a.ppn", f32::NAN));
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_validate_empty_list() {
        let empty = Keywords::Multiple(Vec::new());
        assert!(matches!(
            empty.validate(),
            Err(DetectorError::InvalidKeyword(_))
        ));
    }
}
