//! Radiance prepass
//!
//! The filtering methods expect clamped, sanitized radiance with the hit
//! distance packed into alpha. The host's radiance channels are packed into
//! pass-owned textures every frame, and the library reads those in place of
//! the host channels.

use crate::arena::ConstantUploadArena;
use crate::backend::{Backend, PackRadianceDesc, PackTarget, ResourceState, TextureSpec};
use crate::error::{DenoiseError, Result, Stage};
use crate::frame_dispatcher::{ChannelBindings, FrameReport};
use crate::library::HitDistanceParameters;
use crate::method::{self, RadiancePacking};

/// Format of the packed radiance textures
pub const PACKED_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Constants read by the prepass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackConstants {
    /// ReBLUR hit-distance normalization, `[a, b, c, d]`
    pub hit_distance_parameters: [f32; 4],
    /// Luminance radiance is clamped to
    pub max_intensity: f32,
    _padding: [f32; 3],
}

impl PackConstants {
    pub fn new(max_intensity: f32, hit_distance: &HitDistanceParameters) -> Self {
        Self {
            hit_distance_parameters: [hit_distance.a, hit_distance.b, hit_distance.c, hit_distance.d],
            max_intensity,
            _padding: [0.0; 3],
        }
    }
}

/// Pass-owned packed radiance textures for one packing at one resolution
pub struct RadiancePacker<B: Backend> {
    packing: RadiancePacking,
    diffuse: B::Texture,
    specular: Option<B::Texture>,
}

impl<B: Backend> RadiancePacker<B> {
    /// Creates the packed textures at `size`
    pub fn allocate(backend: &B, packing: RadiancePacking, size: (u32, u32)) -> Result<Self> {
        let spec = |label| TextureSpec {
            label,
            width: size.0,
            height: size.1,
            format: PACKED_FORMAT,
            mip_level_count: 1,
        };

        let diffuse = backend.create_texture(&spec("Packed Diffuse Radiance"))?;
        let specular = if packing.has_specular() {
            match backend.create_texture(&spec("Packed Specular Radiance")) {
                Ok(texture) => Some(texture),
                Err(err) => {
                    backend.destroy_texture(diffuse);
                    return Err(err);
                }
            }
        } else {
            None
        };

        tracing::debug!(packing = packing.name(), width = size.0, height = size.1, "Allocated packed radiance");
        Ok(Self { packing, diffuse, specular })
    }

    pub fn packing(&self) -> RadiancePacking {
        self.packing
    }

    pub fn packed_diffuse(&self) -> &B::Texture {
        &self.diffuse
    }

    pub fn packed_specular(&self) -> Option<&B::Texture> {
        self.specular.as_ref()
    }

    pub fn release(self, backend: &B) {
        backend.destroy_texture(self.diffuse);
        if let Some(specular) = self.specular {
            backend.destroy_texture(specular);
        }
    }

    /// Records the prepass and returns `channels` with the radiance channels replaced by their packed textures
    ///
    /// # Arguments
    /// * `backend` - Backend to record with
    /// * `encoder` - Command stream for this frame
    /// * `arena` - Upload memory for the prepass constants
    /// * `channels` - Render-graph textures for this frame
    /// * `constants` - Prepass constants
    /// * `report` - Counters the prepass adds to
    pub fn record<'a>(
        &'a self,
        backend: &B,
        encoder: &mut B::Encoder,
        arena: &mut ConstantUploadArena<B>,
        channels: &ChannelBindings<'a, B::Texture>,
        constants: &PackConstants,
        report: &mut FrameReport,
    ) -> Result<ChannelBindings<'a, B::Texture>> {
        let channel = |name: &str| {
            channels
                .get(name)
                .ok_or_else(|| DenoiseError::configuration(Stage::Binding, format!("{}: channel '{name}' is not bound", self.packing.name())))
        };

        let diffuse = PackTarget {
            source: channel(method::DIFFUSE_RADIANCE_HIT_DIST)?,
            packed: &self.diffuse,
        };
        let specular = match &self.specular {
            Some(packed) => Some(PackTarget {
                source: channel(method::SPECULAR_RADIANCE_HIT_DIST)?,
                packed,
            }),
            None => None,
        };
        let (view_z, normal_roughness) = if self.packing.normalizes_hit_distance() {
            (Some(channel(method::VIEW_Z)?), Some(channel(method::NORMAL_ROUGHNESS_MATERIAL_ID)?))
        } else {
            (None, None)
        };

        let reads = [Some(diffuse.source), specular.as_ref().map(|target| target.source), view_z, normal_roughness];
        for texture in reads.into_iter().flatten() {
            backend.transition(encoder, texture, 0, ResourceState::ShaderResource);
            report.barriers += 1;
        }
        for texture in [Some(diffuse.packed), specular.as_ref().map(|target| target.packed)].into_iter().flatten() {
            backend.transition(encoder, texture, 0, ResourceState::UnorderedAccess);
            report.barriers += 1;
        }

        let allocation = arena.allocate(backend, bytemuck::bytes_of(constants))?;
        let result = backend.pack_radiance(
            encoder,
            &PackRadianceDesc {
                packing: self.packing,
                constants: arena.view(&allocation),
                diffuse,
                specular,
                view_z,
                normal_roughness,
            },
        );
        arena.release(allocation);
        result?;

        report.prepass_dispatches += 1;
        report.constant_bytes += size_of::<PackConstants>();

        let mut packed = channels.clone();
        packed.insert(method::DIFFUSE_RADIANCE_HIT_DIST, &self.diffuse);
        if let Some(specular) = &self.specular {
            packed.insert(method::SPECULAR_RADIANCE_HIT_DIST, specular);
        }
        Ok(packed)
    }
}
