//! Package manifest and overlay configuration files

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActivationStage;

/// Manifest file at the root of every package directory.
pub const MANIFEST_FILE: &str = "package.json";

/// How a package wants to be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Executable,
    Overlay,
    Service,
}

impl PackageType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executable" => Some(PackageType::Executable),
            "overlay" => Some(PackageType::Overlay),
            "service" => Some(PackageType::Service),
            _ => None,
        }
    }
}

/// Parsed `package.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Manifest {
    Executable {
        executable_file: String,
    },
    Overlay {
        overlay_file: String,
    },
    Service {
        service_file: String,
        service_class: String,
        #[serde(default)]
        service_options: Value,
    },
}

impl Manifest {
    pub fn package_type(&self) -> PackageType {
        match self {
            Manifest::Executable { .. } => PackageType::Executable,
            Manifest::Overlay { .. } => PackageType::Overlay,
            Manifest::Service { .. } => PackageType::Service,
        }
    }
}

/// What reading a package directory's manifest produced.
#[derive(Debug)]
pub enum ManifestRead {
    Missing,
    /// The `type` field names no known activation (or is absent).
    UnsupportedType(String),
    Ready(Manifest),
}

pub(crate) type StageFailure = (ActivationStage, String);

pub fn read_manifest(package_dir: &Path) -> Result<ManifestRead, StageFailure> {
    let path = package_dir.join(MANIFEST_FILE);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ManifestRead::Missing),
        Err(e) => return Err((ActivationStage::ReadManifest, e.to_string())),
    };

    let raw: Value = serde_json::from_slice(&bytes)
        .map_err(|e| (ActivationStage::ParseManifest, e.to_string()))?;

    let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    if PackageType::parse(kind).is_none() {
        return Ok(ManifestRead::UnsupportedType(kind.to_string()));
    }

    let manifest: Manifest = serde_json::from_value(raw)
        .map_err(|e| (ActivationStage::ParseManifest, e.to_string()))?;
    Ok(ManifestRead::Ready(manifest))
}

/// Overlay configuration referenced by an overlay manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlayConfig {
    pub overlays: Vec<OverlaySpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlaySpec {
    pub class: String,
    #[serde(default)]
    pub initialize: Value,
    #[serde(default)]
    pub walkers: Vec<WalkerSpec>,
    /// Each entry is `[method, arg...]`
    #[serde(default)]
    pub on_start: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WalkerSpec {
    pub strategy: String,
    #[serde(default = "default_walker_peers")]
    pub peers: i64,
    #[serde(default)]
    pub init: Value,
}

fn default_walker_peers() -> i64 {
    -1
}

/// A start callback split into method name and arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct StartCall {
    pub method: String,
    pub args: Vec<Value>,
}

impl OverlaySpec {
    pub fn start_calls(&self) -> Result<Vec<StartCall>, String> {
        self.on_start
            .iter()
            .map(|entry| match entry.split_first() {
                Some((Value::String(method), args)) => Ok(StartCall {
                    method: method.clone(),
                    args: args.to_vec(),
                }),
                _ => Err(format!(
                    "on_start entry of {} must start with a method name: {:?}",
                    self.class, entry
                )),
            })
            .collect()
    }
}

pub fn read_overlay_config(path: &Path) -> Result<OverlayConfig, StageFailure> {
    let bytes =
        std::fs::read(path).map_err(|e| (ActivationStage::LoadOverlayConfig, e.to_string()))?;
    let config: OverlayConfig = serde_json::from_slice(&bytes)
        .map_err(|e| (ActivationStage::LoadOverlayConfig, e.to_string()))?;

    for spec in &config.overlays {
        spec.start_calls()
            .map_err(|e| (ActivationStage::LoadOverlayConfig, e))?;
    }
    Ok(config)
}
