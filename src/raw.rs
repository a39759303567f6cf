use std::{fs::File, path::PathBuf, str::FromStr};

use crate::err::{Context, Result};
use serde::{Deserialize, Serialize};

/// Reader and writer options
///
/// May be given as a JSON file via `--options`; every field has a default,
/// so `{}` is a valid options file.

/// default=false
fn no() -> bool {
    false
}

/// default=""
fn empty() -> String {
    String::new()
}

/// Options for both decoders.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReadOptions {
    /// Only forward instances on this node; `None` accepts all.
    #[serde(default)]
    pub partition: Option<u32>,
    /// Treat an unresolvable synapse type as an error instead of skipping
    /// the affected override with a warning.
    #[serde(default = "no")]
    pub strict_synapse_types: bool,
}

/// Layout of the XML output. Both decode to the same events.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum XmlStyle {
    /// `cell_type`, `source`, `target` and synapse values as attributes.
    #[default]
    Attributes,
    /// Nested `cell_type`/`source`/`target` elements, `default_values` and
    /// `pre`/`post` children.
    Elements,
}

impl FromStr for XmlStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attributes" | "attr" => Ok(XmlStyle::Attributes),
            "elements" | "elem" => Ok(XmlStyle::Elements),
            _ => anyhow::bail!("Unknown XML style <{s}>; expected attributes or elements"),
        }
    }
}

/// Float width of HDF5 data arrays.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Single,
    #[default]
    Double,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WriteOptions {
    #[serde(default)]
    pub xml_style: XmlStyle,
    #[serde(default)]
    pub precision: Precision,
    /// Free text written to `<notes>` / the `notes` attribute.
    #[serde(default = "empty")]
    pub notes: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            xml_style: XmlStyle::default(),
            precision: Precision::default(),
            notes: empty(),
        }
    }
}

fn open(path: &str) -> Result<File> {
    let path = PathBuf::from_str(path)
        .map_err(anyhow::Error::from)
        .and_then(|p| p.canonicalize().map_err(anyhow::Error::from))
        .with_context(|| format!("Resolving options path {path:?}"))?;
    File::open(&path).with_context(|| format!("Opening {path:?}"))
}

impl ReadOptions {
    pub fn from_file(path: &str) -> Result<Self> {
        let rd = open(path)?;
        serde_json::de::from_reader(rd).with_context(|| format!("Parsing read options {path:?}"))
    }
}

impl WriteOptions {
    pub fn from_file(path: &str) -> Result<Self> {
        let rd = open(path)?;
        serde_json::de::from_reader(rd).with_context(|| format!("Parsing write options {path:?}"))
    }
}

/// Both option sets in one file: `{"read": {...}, "write": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(default)]
    pub read: ReadOptions,
    #[serde(default)]
    pub write: WriteOptions,
}

impl Options {
    pub fn from_file(path: &str) -> Result<Self> {
        let rd = open(path)?;
        serde_json::de::from_reader(rd).with_context(|| format!("Parsing options {path:?}"))
    }
}
