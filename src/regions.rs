//! Region code to display label mapping used by the interactive create flow.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::info;

/// Errors raised while loading a region label file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RegionLabelError {
    /// The file exists but could not be read.
    #[error("failed to read region labels from {path}: {message}")]
    Io {
        /// Path of the label file.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The file is not a JSON object of strings.
    #[error("failed to parse region labels in {path}: {message}")]
    Parse {
        /// Path of the label file.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Bidirectional lookup between provider region codes and human labels.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegionLabels {
    labels: BTreeMap<String, String>,
}

impl RegionLabels {
    /// Builds a mapping from `(region, label)` pairs.
    #[must_use]
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(region, label)| (region.into(), label.into()))
                .collect(),
        }
    }

    /// Loads labels from a JSON object file. A missing file yields an empty
    /// mapping so every region is shown by its raw code.
    ///
    /// # Errors
    ///
    /// Returns [`RegionLabelError`] when the file exists but cannot be read or
    /// decoded.
    pub fn load(path: &Utf8Path) -> Result<Self, RegionLabelError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let Some(file_name) = path.file_name() else {
            return Err(RegionLabelError::Io {
                path: path.to_path_buf(),
                message: String::from("path is missing a filename"),
            });
        };

        let read = Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.read_to_string(file_name));
        let contents = match read {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(%path, "no region label file; showing raw region codes");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(RegionLabelError::Io {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                });
            }
        };

        let labels: BTreeMap<String, String> =
            serde_json::from_str(&contents).map_err(|err| RegionLabelError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(Self { labels })
    }

    /// Display label for `region`, falling back to the code itself.
    #[must_use]
    pub fn label_for<'a>(&'a self, region: &'a str) -> &'a str {
        self.labels.get(region).map_or(region, String::as_str)
    }

    /// Reverse lookup: region code for a label produced by
    /// [`RegionLabels::label_for`].
    #[must_use]
    pub fn region_for_label<'a>(&'a self, label: &'a str) -> &'a str {
        self.labels
            .iter()
            .find_map(|(region, candidate)| (candidate == label).then_some(region.as_str()))
            .unwrap_or(label)
    }

    /// Returns `true` when no labels are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn labels() -> RegionLabels {
        RegionLabels::new([("fr-par", "Paris"), ("nl-ams", "Amsterdam")])
    }

    #[rstest]
    #[case("fr-par", "Paris")]
    #[case("pl-waw", "pl-waw")]
    fn label_falls_back_to_region(#[case] region: &str, #[case] expected: &str) {
        assert_eq!(labels().label_for(region), expected);
    }

    #[rstest]
    #[case("Amsterdam", "nl-ams")]
    #[case("pl-waw", "pl-waw")]
    fn reverse_lookup_round_trips_labels(#[case] label: &str, #[case] expected: &str) {
        assert_eq!(labels().region_for_label(label), expected);
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("region_map.json"))
            .unwrap_or_else(|err| panic!("utf8 path: {}", err.display()));

        let loaded = RegionLabels::load(&path).unwrap_or_else(|err| panic!("load: {err}"));
        assert!(loaded.is_empty());
    }

    #[test]
    fn loads_json_object() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("region_map.json"))
            .unwrap_or_else(|err| panic!("utf8 path: {}", err.display()));
        std::fs::write(&path, r#"{"fr-par": "Paris"}"#)
            .unwrap_or_else(|err| panic!("write labels: {err}"));

        let loaded = RegionLabels::load(&path).unwrap_or_else(|err| panic!("load: {err}"));
        assert_eq!(loaded.label_for("fr-par"), "Paris");
    }

    #[test]
    fn rejects_non_object_file() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("region_map.json"))
            .unwrap_or_else(|err| panic!("utf8 path: {}", err.display()));
        std::fs::write(&path, "[1, 2]").unwrap_or_else(|err| panic!("write labels: {err}"));

        let err = RegionLabels::load(&path).expect_err("array should be rejected");
        assert!(matches!(err, RegionLabelError::Parse { .. }));
    }
}
