//! Core type definitions for the noma screening pipeline.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An image file and the class index it was discovered under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label (index into the class catalog)
    pub label: usize,
}

impl ImageSample {
    pub fn new(path: PathBuf, label: usize) -> Self {
        Self { path, label }
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSplit {
    Train,
    Validation,
}

impl fmt::Display for DataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSplit::Train => write!(f, "train"),
            DataSplit::Validation => write!(f, "val"),
        }
    }
}

/// Registered backbone networks.
///
/// The string identifiers are the ones persisted in checkpoints and passed on
/// the command line. Adding a backbone means adding a variant here and a
/// matching arm in the classifier builder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Backbone {
    /// MobileNet-V3 Small
    #[default]
    MobileNetV3Small,
    /// Global-pool plus linear head, used for demo artifacts
    TinyDemo,
}

impl Backbone {
    pub const ALL: [Backbone; 2] = [Backbone::MobileNetV3Small, Backbone::TinyDemo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backbone::MobileNetV3Small => "mobilenet_v3_small",
            Backbone::TinyDemo => "tiny_demo",
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backbone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Backbone::ALL
            .into_iter()
            .find(|b| b.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = Backbone::ALL.iter().map(|b| b.as_str()).collect();
                Error::Config(format!(
                    "Unsupported backbone '{s}' (supported: {})",
                    known.join(", ")
                ))
            })
    }
}

impl TryFrom<String> for Backbone {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Backbone> for String {
    fn from(value: Backbone) -> Self {
        value.as_str().to_string()
    }
}

/// Compute device requested for training or export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda(usize),
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Cuda(0) => write!(f, "cuda"),
            DeviceType::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "cuda" | "gpu" => Ok(DeviceType::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(DeviceType::Cuda)
                .ok_or_else(|| Error::Config(format!("Unknown device '{other}'"))),
        }
    }
}

impl TryFrom<String> for DeviceType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.to_string()
    }
}

/// ImageNet channel statistics used by every pipeline.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
