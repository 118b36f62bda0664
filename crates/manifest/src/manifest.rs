//! Library Manifest Parser
//!
//! A manifest declares, per method, everything a library instance exposes:
//! pipelines, static samplers, the constant buffer, the texture pools and the
//! ordered dispatch schedule. Pool texture sizes and dispatch grids are given
//! as rational scale factors of the instance resolution, written like "1/2"
//! or "2".

use denoiser_wgpu::library::{
    BindingOffsets, ConstantBufferDesc, DescriptorRangeDesc, Format, Method, ResourceDesc, ResourceType, StaticSamplerDesc, TextureDesc,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Represents a rational scale factor as a fraction
///
/// Used to express texture and grid extents relative to the instance
/// resolution, supporting both simple integers (e.g., "2") and fractions
/// (e.g., "1/2").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleFactor {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

impl ScaleFactor {
    pub const UNITY: Self = Self { numerator: 1, denominator: 1 };

    /// Creates a new scale factor from numerator and denominator
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Returns true if this scale factor equals 1.0 (no scaling)
    pub fn is_unity(&self) -> bool {
        self.numerator == self.denominator
    }

    /// Scales `extent`, rounding up and never returning less than one
    ///
    /// # Arguments
    /// * `extent` - Width or height of the instance resolution
    pub fn apply(&self, extent: u32) -> u32 {
        let scaled = (u64::from(extent) * u64::from(self.numerator)).div_ceil(u64::from(self.denominator));
        u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::UNITY
    }
}

impl FromStr for ScaleFactor {
    type Err = ScaleFactorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numerator, denominator) = match s.split_once('/') {
            Some((numerator, denominator)) => {
                if denominator.contains('/') {
                    return Err(ScaleFactorParseError::InvalidFormat);
                }
                let numerator = numerator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
                let denominator = denominator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidDenominator)?;
                (numerator, denominator)
            }
            None => (s.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?, 1),
        };

        if denominator == 0 {
            return Err(ScaleFactorParseError::ZeroDenominator);
        }
        if numerator == 0 {
            return Err(ScaleFactorParseError::ZeroNumerator);
        }

        Ok(ScaleFactor::new(numerator, denominator))
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl<'de> Deserialize<'de> for ScaleFactor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error types for scale factor parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleFactorParseError {
    /// The format is not recognized (should be "n" or "n/d")
    #[error("invalid scale factor format")]
    InvalidFormat,
    #[error("invalid numerator")]
    InvalidNumerator,
    #[error("invalid denominator")]
    InvalidDenominator,
    #[error("denominator cannot be zero")]
    ZeroDenominator,
    /// A zero-sized texture or grid is never meaningful
    #[error("numerator cannot be zero")]
    ZeroNumerator,
}

fn unity_pair() -> [ScaleFactor; 2] {
    [ScaleFactor::UNITY; 2]
}

fn default_entry_point() -> String {
    "main".to_string()
}

fn default_mip_num() -> u32 {
    1
}

/// A compute pipeline declared by a method
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineManifest {
    /// Shader file name, without extension
    pub shader: String,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Descriptor ranges in binding order
    #[serde(default)]
    pub ranges: Vec<DescriptorRangeDesc>,
}

impl PipelineManifest {
    /// Total number of descriptors across all ranges
    pub fn descriptor_count(&self) -> usize {
        self.ranges.iter().map(|range| range.descriptor_num as usize).sum()
    }
}

/// A pool texture sized relative to the instance resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TextureManifest {
    pub format: Format,
    /// Scale factors [width_scale, height_scale] relative to the instance resolution
    #[serde(default = "unity_pair")]
    pub scale_factor: [ScaleFactor; 2],
    #[serde(default = "default_mip_num")]
    pub mip_num: u32,
}

impl TextureManifest {
    /// Resolves the texture at the given instance resolution
    pub fn resolve(&self, width: u32, height: u32) -> TextureDesc {
        TextureDesc {
            format: self.format,
            width: self.scale_factor[0].apply(width),
            height: self.scale_factor[1].apply(height),
            mip_num: self.mip_num.max(1),
        }
    }
}

/// How many thread groups a dispatch launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GridManifest {
    /// Threads per group along each axis
    pub group_size: [u32; 2],
    /// Extent covered by the dispatch, relative to the instance resolution
    #[serde(default = "unity_pair")]
    pub scale_factor: [ScaleFactor; 2],
}

impl GridManifest {
    /// Number of thread groups along each axis
    pub fn resolve(&self, width: u32, height: u32) -> (u32, u32) {
        let groups = |extent: u32, group: u32| extent.div_ceil(group.max(1));
        (
            groups(self.scale_factor[0].apply(width), self.group_size[0]),
            groups(self.scale_factor[1].apply(height), self.group_size[1]),
        )
    }
}

/// One scheduled dispatch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatchManifest {
    pub name: String,
    /// Index into the method's pipelines
    pub pipeline: u16,
    /// Resources in binding order
    pub resources: Vec<ResourceDesc>,
    pub grid: GridManifest,
}

/// Everything a single method declares
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodManifest {
    pub method: Method,
    pub constant_buffer: ConstantBufferDesc,
    #[serde(default)]
    pub static_samplers: Vec<StaticSamplerDesc>,
    pub pipelines: Vec<PipelineManifest>,
    #[serde(default)]
    pub permanent_pool: Vec<TextureManifest>,
    #[serde(default)]
    pub transient_pool: Vec<TextureManifest>,
    pub dispatches: Vec<DispatchManifest>,
}

/// Library version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VersionManifest {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

/// Raw library manifest as parsed from YAML
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LibraryManifest {
    pub version: VersionManifest,
    #[serde(default)]
    pub binding_offsets: BindingOffsets,
    pub methods: Vec<MethodManifest>,
}

/// Structural problems found in a parsed manifest
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestValidationError {
    #[error("method {0} is declared more than once")]
    DuplicateMethod(Method),

    #[error("{method}: dispatch '{dispatch}' uses pipeline {pipeline} but only {available} are declared")]
    UnknownPipeline { method: Method, dispatch: String, pipeline: u16, available: usize },

    #[error("{method}: dispatch '{dispatch}' references {role:?} index {index} but the pool holds {size} textures")]
    PoolIndexOutOfRange { method: Method, dispatch: String, role: ResourceType, index: u16, size: usize },

    #[error("{method}: dispatch '{dispatch}' lists {actual} resources but its pipeline declares {expected} descriptors")]
    ResourceCountMismatch { method: Method, dispatch: String, expected: usize, actual: usize },

    #[error("{method}: dispatch '{dispatch}' has a zero thread-group size")]
    ZeroGroupSize { method: Method, dispatch: String },

    #[error("{method}: constant buffer holds {max} bytes but {required} are needed")]
    ConstantBufferTooSmall { method: Method, max: u32, required: usize },
}

/// Errors raised while loading a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_norway::Error),
    #[error("invalid manifest: {0}")]
    Validation(#[from] ManifestValidationError),
}

impl LibraryManifest {
    /// Parses a library manifest from YAML content
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the manifest
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }

    /// Parses a library manifest from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML manifest file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    /// Returns the manifest of `method`, if declared
    pub fn method(&self, method: Method) -> Option<&MethodManifest> {
        self.methods.iter().find(|manifest| manifest.method == method)
    }

    /// Checks the manifest for structural consistency
    ///
    /// # Arguments
    /// * `constant_block_size` - Bytes every method's constant buffer must hold
    pub fn validate(&self, constant_block_size: usize) -> Result<(), ManifestValidationError> {
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.method) {
                return Err(ManifestValidationError::DuplicateMethod(method.method));
            }
            method.validate(constant_block_size)?;
        }
        Ok(())
    }
}

impl MethodManifest {
    fn validate(&self, constant_block_size: usize) -> Result<(), ManifestValidationError> {
        if (self.constant_buffer.max_data_size as usize) < constant_block_size {
            return Err(ManifestValidationError::ConstantBufferTooSmall {
                method: self.method,
                max: self.constant_buffer.max_data_size,
                required: constant_block_size,
            });
        }

        for dispatch in &self.dispatches {
            let Some(pipeline) = self.pipelines.get(dispatch.pipeline as usize) else {
                return Err(ManifestValidationError::UnknownPipeline {
                    method: self.method,
                    dispatch: dispatch.name.clone(),
                    pipeline: dispatch.pipeline,
                    available: self.pipelines.len(),
                });
            };

            if pipeline.descriptor_count() != dispatch.resources.len() {
                return Err(ManifestValidationError::ResourceCountMismatch {
                    method: self.method,
                    dispatch: dispatch.name.clone(),
                    expected: pipeline.descriptor_count(),
                    actual: dispatch.resources.len(),
                });
            }

            if dispatch.grid.group_size.contains(&0) {
                return Err(ManifestValidationError::ZeroGroupSize {
                    method: self.method,
                    dispatch: dispatch.name.clone(),
                });
            }

            for resource in &dispatch.resources {
                let size = match resource.resource_type {
                    ResourceType::PermanentPool => self.permanent_pool.len(),
                    ResourceType::TransientPool => self.transient_pool.len(),
                    _ => continue,
                };
                if resource.index_in_pool as usize >= size {
                    return Err(ManifestValidationError::PoolIndexOutOfRange {
                        method: self.method,
                        dispatch: dispatch.name.clone(),
                        role: resource.resource_type,
                        index: resource.index_in_pool,
                        size,
                    });
                }
            }
        }

        Ok(())
    }
}
