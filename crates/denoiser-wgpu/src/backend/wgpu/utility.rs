//! Fixed-function compute pipelines of the wgpu backend
//!
//! Blit pipelines are built per destination format, pack pipelines per
//! radiance packing. Both are created on first use and kept for the lifetime
//! of the backend.

use crate::error::{DenoiseError, Result, Stage};
use crate::method::RadiancePacking;
use crate::prepass::PACKED_FORMAT;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

const BLIT_SHADER: &str = include_str!("shaders/blit.wgsl");
const PACK_SHADER: &str = include_str!("shaders/pack_radiance.wgsl");

/// Threads per workgroup along each axis in both shaders
pub const WORKGROUP_SIZE: u32 = 8;

/// Bindings of the pack shader
pub mod pack_binding {
    pub const CONSTANTS: u32 = 0;
    pub const DIFFUSE: u32 = 1;
    pub const SPECULAR: u32 = 2;
    pub const VIEW_Z: u32 = 3;
    pub const NORMAL_ROUGHNESS: u32 = 4;
    pub const PACKED_DIFFUSE: u32 = 5;
    pub const PACKED_SPECULAR: u32 = 6;
}

/// WGSL name of a float storage format the blit can write
pub fn storage_format_name(format: wgpu::TextureFormat) -> Option<&'static str> {
    use wgpu::TextureFormat as T;

    Some(match format {
        T::R8Unorm => "r8unorm",
        T::R8Snorm => "r8snorm",
        T::Rg8Unorm => "rg8unorm",
        T::Rg8Snorm => "rg8snorm",
        T::Rgba8Unorm => "rgba8unorm",
        T::Rgba8Snorm => "rgba8snorm",
        T::Bgra8Unorm => "bgra8unorm",
        T::Rgb10a2Unorm => "rgb10a2unorm",
        T::R16Unorm => "r16unorm",
        T::R16Snorm => "r16snorm",
        T::Rg16Unorm => "rg16unorm",
        T::Rg16Snorm => "rg16snorm",
        T::Rgba16Unorm => "rgba16unorm",
        T::Rgba16Snorm => "rgba16snorm",
        T::R16Float => "r16float",
        T::Rg16Float => "rg16float",
        T::Rgba16Float => "rgba16float",
        T::R32Float => "r32float",
        T::Rg32Float => "rg32float",
        T::Rgba32Float => "rgba32float",
        _ => return None,
    })
}

/// Entry point of the pack shader for `packing`
pub fn pack_entry_point(packing: RadiancePacking) -> &'static str {
    match packing {
        RadiancePacking::RelaxDiffuse => "pack_diffuse",
        RadiancePacking::RelaxDiffuseSpecular => "pack_diffuse_specular",
        RadiancePacking::ReblurDiffuseSpecular => "pack_normalized_diffuse_specular",
    }
}

/// Bindings the pack pipeline for `packing` expects, in ascending order
pub fn pack_bindings(packing: RadiancePacking) -> Vec<u32> {
    use pack_binding::*;

    let mut bindings = vec![CONSTANTS, DIFFUSE];
    if packing.has_specular() {
        bindings.push(SPECULAR);
    }
    if packing.normalizes_hit_distance() {
        bindings.extend([VIEW_Z, NORMAL_ROUGHNESS]);
    }
    bindings.push(PACKED_DIFFUSE);
    if packing.has_specular() {
        bindings.push(PACKED_SPECULAR);
    }
    bindings
}

/// Number of workgroups covering `size`
pub fn workgroups(size: (u32, u32)) -> (u32, u32) {
    (size.0.div_ceil(WORKGROUP_SIZE), size.1.div_ceil(WORKGROUP_SIZE))
}

#[derive(Debug)]
pub struct UtilityPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

#[derive(Debug, Default)]
pub struct UtilityPipelines {
    blit: HashMap<wgpu::TextureFormat, UtilityPipeline>,
    pack: HashMap<RadiancePacking, UtilityPipeline>,
}

impl UtilityPipelines {
    /// The blit pipeline writing `format`
    pub fn blit(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<&UtilityPipeline> {
        match self.blit.entry(format) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let Some(name) = storage_format_name(format) else {
                    return Err(DenoiseError::configuration(Stage::Dispatch, format!("cannot blit into a {format:?} texture")));
                };
                let label = format!("Blit {format:?}");
                let entries = [
                    texture_entry(0),
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ];
                let source = BLIT_SHADER.replace("{{FORMAT}}", name);
                tracing::debug!(?format, "Creating blit pipeline");
                Ok(&*entry.insert(build(device, &label, &source, "main", &entries)))
            }
        }
    }

    /// The pack pipeline for `packing`
    pub fn pack(&mut self, device: &wgpu::Device, packing: RadiancePacking) -> &UtilityPipeline {
        use pack_binding::*;

        self.pack.entry(packing).or_insert_with(|| {
            let entries: Vec<_> = pack_bindings(packing)
                .into_iter()
                .map(|binding| match binding {
                    CONSTANTS => wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    PACKED_DIFFUSE | PACKED_SPECULAR => wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: PACKED_FORMAT,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                    _ => texture_entry(binding),
                })
                .collect();
            tracing::debug!(packing = packing.name(), "Creating pack pipeline");
            build(device, packing.name(), PACK_SHADER, pack_entry_point(packing), &entries)
        })
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn build(device: &wgpu::Device, label: &str, source: &str, entry_point: &str, entries: &[wgpu::BindGroupLayoutEntry]) -> UtilityPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: Some(label), entries });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    });

    UtilityPipeline { pipeline, layout }
}
