//! Declarative descriptions exchanged with the filtering library
//!
//! These types describe everything the library exposes about itself: the
//! pipelines it needs, the texture pools backing its history and scratch
//! state, the static samplers its shaders reference, and the per-frame
//! dispatch list. None of them know anything about a concrete backend.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Abstract pixel formats used by the library for pool textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Format {
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,
    Rg8Unorm,
    Rg8Snorm,
    Rg8Uint,
    Rg8Sint,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Rgba8Srgb,
    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,
    R16Sfloat,
    Rg16Unorm,
    Rg16Snorm,
    Rg16Uint,
    Rg16Sint,
    Rg16Sfloat,
    Rgba16Unorm,
    Rgba16Snorm,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Sfloat,
    R32Uint,
    R32Sint,
    R32Sfloat,
    Rg32Uint,
    Rg32Sint,
    Rg32Sfloat,
    Rgb32Uint,
    Rgb32Sint,
    Rgb32Sfloat,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Sfloat,
    R10G10B10A2Unorm,
    R10G10B10A2Uint,
    R11G11B10Ufloat,
    R9G9B9E5Ufloat,
}

/// Kind of descriptor a range holds, which is also the access state a resource needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DescriptorType {
    /// Read-only sampled texture
    Texture,
    /// Read-write storage texture
    StorageTexture,
}

/// Static sampler variants a library shader may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaticSampler {
    NearestClamp,
    NearestMirroredRepeat,
    LinearClamp,
    LinearMirroredRepeat,
}

/// A static sampler and the register it is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSamplerDesc {
    pub sampler: StaticSampler,
    pub register_index: u32,
}

/// A contiguous range of descriptors of one kind within a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRangeDesc {
    pub descriptor_type: DescriptorType,
    pub base_register_index: u32,
    pub descriptor_num: u32,
}

/// A compute pipeline the library needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDesc {
    /// Shader file name, without extension
    pub shader_file_name: String,
    /// Compute entry point inside the shader file
    pub shader_entry_point_name: String,
    /// Descriptor ranges in binding order
    pub descriptor_ranges: Vec<DescriptorRangeDesc>,
}

impl PipelineDesc {
    /// Total number of descriptors across all ranges
    pub fn descriptor_count(&self) -> usize {
        self.descriptor_ranges.iter().map(|range| range.descriptor_num as usize).sum()
    }
}

/// A pool texture declared by the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub mip_num: u32,
}

/// The constant buffer shared by every pipeline of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantBufferDesc {
    pub register_index: u32,
    pub max_data_size: u32,
}

/// Everything the library declares for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDesc {
    pub pipelines: Vec<PipelineDesc>,
    pub permanent_pool: Vec<TextureDesc>,
    pub transient_pool: Vec<TextureDesc>,
    pub static_samplers: Vec<StaticSamplerDesc>,
    pub constant_buffer: ConstantBufferDesc,
}

impl InstanceDesc {
    /// Total number of pool textures
    pub fn pool_size(&self) -> usize {
        self.permanent_pool.len() + self.transient_pool.len()
    }
}

/// Semantic role of a resource referenced by a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    InMv,
    InNormalRoughness,
    InViewz,
    InDiffRadianceHitdist,
    InSpecRadianceHitdist,
    InSpecHitdist,
    InDeltaPrimaryPos,
    InDeltaSecondaryPos,
    InDiffConfidence,
    InSpecConfidence,
    OutDiffRadianceHitdist,
    OutSpecRadianceHitdist,
    OutReflectionMv,
    OutDeltaMv,
    OutValidation,
    TransientPool,
    PermanentPool,
}

/// One resource reference inside a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDesc {
    pub resource_type: ResourceType,
    pub state_needed: DescriptorType,
    /// Index into the permanent or transient pool; ignored for other roles
    #[serde(default)]
    pub index_in_pool: u16,
    #[serde(default)]
    pub mip_offset: u16,
    #[serde(default = "default_mip_num")]
    pub mip_num: u16,
}

fn default_mip_num() -> u16 {
    1
}

/// A single compute dispatch, produced fresh every frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchDesc {
    pub name: String,
    pub pipeline_index: u16,
    pub resources: Vec<ResourceDesc>,
    pub constant_buffer_data: Bytes,
    pub grid_width: u32,
    pub grid_height: u32,
}

/// Filtering methods a library can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    RelaxDiffuseSpecular,
    RelaxDiffuse,
    ReblurDiffuseSpecular,
    SpecularReflectionMv,
    SpecularDeltaMv,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelaxDiffuseSpecular => "RELAX_DIFFUSE_SPECULAR",
            Self::RelaxDiffuse => "RELAX_DIFFUSE",
            Self::ReblurDiffuseSpecular => "REBLUR_DIFFUSE_SPECULAR",
            Self::SpecularReflectionMv => "SPECULAR_REFLECTION_MV",
            Self::SpecularDeltaMv => "SPECULAR_DELTA_MV",
        };
        f.write_str(name)
    }
}

/// Per-kind offsets added to register indices to form binding numbers
///
/// Registers of different kinds share one numbering space on backends with a
/// flat binding model; the offsets keep them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingOffsets {
    pub sampler: u32,
    pub texture: u32,
    pub constant_buffer: u32,
    pub storage_texture: u32,
}

impl Default for BindingOffsets {
    fn default() -> Self {
        Self {
            sampler: 100,
            texture: 200,
            constant_buffer: 300,
            storage_texture: 400,
        }
    }
}

/// Capability and version metadata of a library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDesc {
    pub version_major: u8,
    pub version_minor: u8,
    pub version_build: u8,
    pub methods: Vec<Method>,
    #[serde(default)]
    pub binding_offsets: BindingOffsets,
}

impl LibraryDesc {
    /// Returns true if the library implements `method`
    pub fn supports(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Version as `major.minor.build`
    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.version_major, self.version_minor, self.version_build)
    }
}

/// Parameters of a single method requested at instance creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDesc {
    pub method: Method,
    pub full_resolution_width: u16,
    pub full_resolution_height: u16,
}

/// Non-success results reported by a library
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("allocation failed: {0}")]
    Allocation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enums_use_screaming_snake_case() {
        let yaml = serde_norway::to_string(&ResourceType::InDiffRadianceHitdist).unwrap();
        assert_eq!(yaml.trim(), "IN_DIFF_RADIANCE_HITDIST");

        let sampler: StaticSampler = serde_norway::from_str("LINEAR_MIRRORED_REPEAT").unwrap();
        assert_eq!(sampler, StaticSampler::LinearMirroredRepeat);

        let format: Format = serde_norway::from_str("R11_G11_B10_UFLOAT").unwrap();
        assert_eq!(format, Format::R11G11B10Ufloat);
    }

    #[test]
    fn test_resource_desc_defaults() {
        let resource: ResourceDesc = serde_norway::from_str("resource_type: IN_VIEWZ\nstate_needed: TEXTURE\n").unwrap();
        assert_eq!(resource.index_in_pool, 0);
        assert_eq!(resource.mip_offset, 0);
        assert_eq!(resource.mip_num, 1);
    }

    #[test]
    fn test_descriptor_count_sums_ranges() {
        let pipeline = PipelineDesc {
            shader_file_name: "Blur".into(),
            shader_entry_point_name: "main".into(),
            descriptor_ranges: vec![
                DescriptorRangeDesc {
                    descriptor_type: DescriptorType::Texture,
                    base_register_index: 0,
                    descriptor_num: 4,
                },
                DescriptorRangeDesc {
                    descriptor_type: DescriptorType::StorageTexture,
                    base_register_index: 0,
                    descriptor_num: 2,
                },
            ],
        };
        assert_eq!(pipeline.descriptor_count(), 6);
    }

    #[test]
    fn test_library_version_and_support() {
        let desc = LibraryDesc {
            version_major: 4,
            version_minor: 2,
            version_build: 1,
            methods: vec![Method::RelaxDiffuse],
            binding_offsets: BindingOffsets::default(),
        };
        assert_eq!(desc.version(), "4.2.1");
        assert!(desc.supports(Method::RelaxDiffuse));
        assert!(!desc.supports(Method::SpecularDeltaMv));
    }
}
