//! Filtering method selection
//!
//! Everything that depends on the selected method is decided here, with one
//! exhaustive match per responsibility: the library method it maps to, the
//! channels it reflects, the radiance prepass it needs, the pass-through plan
//! used while disabled, and whether it may be switched at runtime.

use crate::error::{DenoiseError, Result, Stage};
use crate::library::{Method, ResourceType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DIFFUSE_RADIANCE_HIT_DIST: &str = "diffuseRadianceHitDist";
pub const SPECULAR_RADIANCE_HIT_DIST: &str = "specularRadianceHitDist";
pub const SPECULAR_HIT_DIST: &str = "specularHitDist";
pub const MOTION_VECTORS: &str = "mvec";
pub const NORMAL_ROUGHNESS_MATERIAL_ID: &str = "normWRoughnessMaterialID";
pub const VIEW_Z: &str = "viewZ";
pub const DELTA_PRIMARY_POS_W: &str = "deltaPrimaryPosW";
pub const DELTA_SECONDARY_POS_W: &str = "deltaSecondaryPosW";

pub const FILTERED_DIFFUSE_RADIANCE_HIT_DIST: &str = "filteredDiffuseRadianceHitDist";
pub const FILTERED_SPECULAR_RADIANCE_HIT_DIST: &str = "filteredSpecularRadianceHitDist";
pub const REFLECTION_MOTION_VECTORS: &str = "reflectionMvec";
pub const DELTA_MOTION_VECTORS: &str = "deltaMvec";

/// Filtering variant run by the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DenoisingMethod {
    /// Joint diffuse and specular ReLAX
    #[default]
    RelaxDiffuseSpecular,
    /// Diffuse-only ReLAX
    RelaxDiffuse,
    /// Joint diffuse and specular ReBLUR
    ReblurDiffuseSpecular,
    /// Motion vectors for specular reflections
    SpecularReflectionMv,
    /// Motion vectors for delta (mirror) reflections and transmissions
    SpecularDeltaMv,
}

/// Direction of a render-graph channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Input,
    Output,
}

/// A render-graph channel required by a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDesc {
    pub name: &'static str,
    pub description: &'static str,
    pub direction: ChannelDirection,
    /// Format the pass requires for outputs; inputs accept what the host provides
    pub format: Option<wgpu::TextureFormat>,
}

impl ChannelDesc {
    const fn input(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            direction: ChannelDirection::Input,
            format: None,
        }
    }

    const fn output(name: &'static str, description: &'static str, format: wgpu::TextureFormat) -> Self {
        Self {
            name,
            description,
            direction: ChannelDirection::Output,
            format: Some(format),
        }
    }
}

/// One step of the disabled-pass fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThroughOp {
    /// Resampling, format-converting copy
    Blit { source: &'static str, destination: &'static str },
    Clear { destination: &'static str },
}

/// Prepass run over the radiance inputs before the library reads them
///
/// Every variant clamps radiance luminance to the configured maximum and
/// replaces non-finite values with zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadiancePacking {
    /// Diffuse and specular radiance with raw hit distances
    RelaxDiffuseSpecular,
    /// Diffuse radiance with raw hit distance
    RelaxDiffuse,
    /// Diffuse and specular radiance with hit distances normalized by view depth and roughness
    ReblurDiffuseSpecular,
}

impl RadiancePacking {
    pub fn has_specular(&self) -> bool {
        match self {
            Self::RelaxDiffuseSpecular | Self::ReblurDiffuseSpecular => true,
            Self::RelaxDiffuse => false,
        }
    }

    /// Whether the view-depth and normal-roughness guides are read
    pub fn normalizes_hit_distance(&self) -> bool {
        match self {
            Self::ReblurDiffuseSpecular => true,
            Self::RelaxDiffuseSpecular | Self::RelaxDiffuse => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RelaxDiffuseSpecular => "PackRadiance",
            Self::RelaxDiffuse => "PackRadianceHitDist",
            Self::ReblurDiffuseSpecular => "PackRadianceNormHitDist",
        }
    }
}

/// Where a semantic resource role is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleBinding {
    /// A render-graph channel, by name
    Channel(&'static str),
    PermanentPool,
    TransientPool,
    /// A role this pass never provides
    Unmapped,
}

/// Resolves a semantic role to its source
pub fn role_binding(role: ResourceType) -> RoleBinding {
    match role {
        ResourceType::InMv => RoleBinding::Channel(MOTION_VECTORS),
        ResourceType::InNormalRoughness => RoleBinding::Channel(NORMAL_ROUGHNESS_MATERIAL_ID),
        ResourceType::InViewz => RoleBinding::Channel(VIEW_Z),
        ResourceType::InDiffRadianceHitdist => RoleBinding::Channel(DIFFUSE_RADIANCE_HIT_DIST),
        ResourceType::InSpecRadianceHitdist => RoleBinding::Channel(SPECULAR_RADIANCE_HIT_DIST),
        ResourceType::InSpecHitdist => RoleBinding::Channel(SPECULAR_HIT_DIST),
        ResourceType::InDeltaPrimaryPos => RoleBinding::Channel(DELTA_PRIMARY_POS_W),
        ResourceType::InDeltaSecondaryPos => RoleBinding::Channel(DELTA_SECONDARY_POS_W),
        ResourceType::OutDiffRadianceHitdist => RoleBinding::Channel(FILTERED_DIFFUSE_RADIANCE_HIT_DIST),
        ResourceType::OutSpecRadianceHitdist => RoleBinding::Channel(FILTERED_SPECULAR_RADIANCE_HIT_DIST),
        ResourceType::OutReflectionMv => RoleBinding::Channel(REFLECTION_MOTION_VECTORS),
        ResourceType::OutDeltaMv => RoleBinding::Channel(DELTA_MOTION_VECTORS),
        ResourceType::PermanentPool => RoleBinding::PermanentPool,
        ResourceType::TransientPool => RoleBinding::TransientPool,
        ResourceType::InDiffConfidence | ResourceType::InSpecConfidence | ResourceType::OutValidation => RoleBinding::Unmapped,
    }
}

const DIFFUSE_SPECULAR_CHANNELS: &[ChannelDesc] = &[
    ChannelDesc::input(DIFFUSE_RADIANCE_HIT_DIST, "Diffuse radiance and hit distance"),
    ChannelDesc::input(SPECULAR_RADIANCE_HIT_DIST, "Specular radiance and hit distance"),
    ChannelDesc::input(VIEW_Z, "View Z"),
    ChannelDesc::input(NORMAL_ROUGHNESS_MATERIAL_ID, "World normal, roughness, and material ID"),
    ChannelDesc::input(MOTION_VECTORS, "Motion vectors"),
    ChannelDesc::output(FILTERED_DIFFUSE_RADIANCE_HIT_DIST, "Filtered diffuse radiance and hit distance", wgpu::TextureFormat::Rgba16Float),
    ChannelDesc::output(FILTERED_SPECULAR_RADIANCE_HIT_DIST, "Filtered specular radiance and hit distance", wgpu::TextureFormat::Rgba16Float),
];

const DIFFUSE_CHANNELS: &[ChannelDesc] = &[
    ChannelDesc::input(DIFFUSE_RADIANCE_HIT_DIST, "Diffuse radiance and hit distance"),
    ChannelDesc::input(VIEW_Z, "View Z"),
    ChannelDesc::input(NORMAL_ROUGHNESS_MATERIAL_ID, "World normal, roughness, and material ID"),
    ChannelDesc::input(MOTION_VECTORS, "Motion vectors"),
    ChannelDesc::output(FILTERED_DIFFUSE_RADIANCE_HIT_DIST, "Filtered diffuse radiance and hit distance", wgpu::TextureFormat::Rgba16Float),
];

const REFLECTION_MV_CHANNELS: &[ChannelDesc] = &[
    ChannelDesc::input(SPECULAR_HIT_DIST, "Specular hit distance"),
    ChannelDesc::input(VIEW_Z, "View Z"),
    ChannelDesc::input(NORMAL_ROUGHNESS_MATERIAL_ID, "World normal, roughness, and material ID"),
    ChannelDesc::input(MOTION_VECTORS, "Motion vectors"),
    ChannelDesc::output(REFLECTION_MOTION_VECTORS, "Reflection motion vectors in screen space", wgpu::TextureFormat::Rg16Float),
];

const DELTA_MV_CHANNELS: &[ChannelDesc] = &[
    ChannelDesc::input(DELTA_PRIMARY_POS_W, "Delta primary world position"),
    ChannelDesc::input(DELTA_SECONDARY_POS_W, "Delta secondary world position"),
    ChannelDesc::input(MOTION_VECTORS, "Motion vectors"),
    ChannelDesc::output(DELTA_MOTION_VECTORS, "Delta motion vectors in screen space", wgpu::TextureFormat::Rg16Float),
];

impl DenoisingMethod {
    pub const ALL: [DenoisingMethod; 5] = [
        Self::RelaxDiffuseSpecular,
        Self::RelaxDiffuse,
        Self::ReblurDiffuseSpecular,
        Self::SpecularReflectionMv,
        Self::SpecularDeltaMv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RelaxDiffuseSpecular => "RelaxDiffuseSpecular",
            Self::RelaxDiffuse => "RelaxDiffuse",
            Self::ReblurDiffuseSpecular => "ReblurDiffuseSpecular",
            Self::SpecularReflectionMv => "SpecularReflectionMv",
            Self::SpecularDeltaMv => "SpecularDeltaMv",
        }
    }

    /// The library method implementing this variant
    pub fn library_method(&self) -> Method {
        match self {
            Self::RelaxDiffuseSpecular => Method::RelaxDiffuseSpecular,
            Self::RelaxDiffuse => Method::RelaxDiffuse,
            Self::ReblurDiffuseSpecular => Method::ReblurDiffuseSpecular,
            Self::SpecularReflectionMv => Method::SpecularReflectionMv,
            Self::SpecularDeltaMv => Method::SpecularDeltaMv,
        }
    }

    /// Channels the method reads and writes
    pub fn channels(&self) -> &'static [ChannelDesc] {
        match self {
            Self::RelaxDiffuseSpecular | Self::ReblurDiffuseSpecular => DIFFUSE_SPECULAR_CHANNELS,
            Self::RelaxDiffuse => DIFFUSE_CHANNELS,
            Self::SpecularReflectionMv => REFLECTION_MV_CHANNELS,
            Self::SpecularDeltaMv => DELTA_MV_CHANNELS,
        }
    }

    /// The prepass run before the library, if any
    pub fn radiance_packing(&self) -> Option<RadiancePacking> {
        match self {
            Self::RelaxDiffuseSpecular => Some(RadiancePacking::RelaxDiffuseSpecular),
            Self::RelaxDiffuse => Some(RadiancePacking::RelaxDiffuse),
            Self::ReblurDiffuseSpecular => Some(RadiancePacking::ReblurDiffuseSpecular),
            Self::SpecularReflectionMv | Self::SpecularDeltaMv => None,
        }
    }

    /// Blits and clears performed instead of filtering while the pass is disabled
    ///
    /// Motion-vector outputs are cleared when motion is in world space, since
    /// the input cannot be reused as a screen-space result.
    pub fn pass_through(&self, world_space_motion: bool) -> Vec<PassThroughOp> {
        let motion = |destination| {
            if world_space_motion {
                PassThroughOp::Clear { destination }
            } else {
                PassThroughOp::Blit {
                    source: MOTION_VECTORS,
                    destination,
                }
            }
        };

        match self {
            Self::RelaxDiffuseSpecular | Self::ReblurDiffuseSpecular => vec![
                PassThroughOp::Blit {
                    source: DIFFUSE_RADIANCE_HIT_DIST,
                    destination: FILTERED_DIFFUSE_RADIANCE_HIT_DIST,
                },
                PassThroughOp::Blit {
                    source: SPECULAR_RADIANCE_HIT_DIST,
                    destination: FILTERED_SPECULAR_RADIANCE_HIT_DIST,
                },
            ],
            Self::RelaxDiffuse => vec![PassThroughOp::Blit {
                source: DIFFUSE_RADIANCE_HIT_DIST,
                destination: FILTERED_DIFFUSE_RADIANCE_HIT_DIST,
            }],
            Self::SpecularReflectionMv => vec![motion(REFLECTION_MOTION_VECTORS)],
            Self::SpecularDeltaMv => vec![motion(DELTA_MOTION_VECTORS)],
        }
    }

    /// Only methods with identical channel sets can be swapped without recompiling the graph
    pub fn is_runtime_togglable(&self) -> bool {
        match self {
            Self::RelaxDiffuseSpecular | Self::ReblurDiffuseSpecular => true,
            Self::RelaxDiffuse | Self::SpecularReflectionMv | Self::SpecularDeltaMv => false,
        }
    }
}

impl fmt::Display for DenoisingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DenoisingMethod {
    type Err = DenoiseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.name() == s)
            .ok_or_else(|| DenoiseError::configuration(Stage::Translation, format!("unknown denoising method '{s}'")))
    }
}
