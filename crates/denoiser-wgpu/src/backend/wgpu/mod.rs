//! wgpu implementation of the backend seam
//!
//! Every pipeline uses two bind groups. Group 0 holds the instance's static
//! samplers and is built once with the pipeline state. Group 1 holds the
//! constant buffer followed by the texture ranges and is rebuilt per dispatch.
//! The radiance prepass and the blit run fixed pipelines with a single group.

mod program;
mod utility;

pub use program::{BindingReflection, ProgramReflection, WgslProgram, WgslProgramLibrary, parse_program, program_identity};

use super::{Backend, PackRadianceDesc, PipelineStateDesc, ResourceState, SamplerSpec, TextureSpec};
use crate::error::{DenoiseError, Result, Stage};
use crate::layout::{BindingKind, BindingSet, ConstantView, TextureAccess};
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, PoisonError};
use utility::{UtilityPipeline, UtilityPipelines, pack_binding, pack_bindings, storage_format_name, workgroups};

/// Bind group holding the static samplers
pub const SAMPLER_GROUP: u32 = 0;
/// Bind group holding the constant buffer and textures
pub const RESOURCE_GROUP: u32 = 1;

/// A compute pipeline with its resource layout and sampler bind group
#[derive(Debug)]
pub struct WgpuPipelineState {
    label: String,
    pipeline: wgpu::ComputePipeline,
    resource_layout: wgpu::BindGroupLayout,
    sampler_group: wgpu::BindGroup,
}

impl WgpuPipelineState {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }
}

/// Backend recording into a `wgpu::CommandEncoder`
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    utility: Arc<Mutex<UtilityPipelines>>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            utility: Arc::default(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Layout entry for a group 1 binding
    ///
    /// A float texture is filterable only when the program samples it with
    /// one of `filtering_samplers`.
    fn texture_entry(reflection: &ProgramReflection, filtering_samplers: &[u32], label: &str, kind: BindingKind, binding: u32) -> Result<wgpu::BindingType> {
        let reflected = reflection.get(RESOURCE_GROUP, binding);
        match kind {
            BindingKind::ReadOnlyTexture => {
                let sample_type = match reflected {
                    Some(BindingReflection::Sampled {
                        sample_type: wgpu::TextureSampleType::Float { filterable },
                    }) => wgpu::TextureSampleType::Float {
                        filterable: filterable
                            && reflection
                                .samplers_of(RESOURCE_GROUP, binding)
                                .any(|(group, sampler)| group == SAMPLER_GROUP && filtering_samplers.contains(&sampler)),
                    },
                    Some(BindingReflection::Sampled { sample_type }) => sample_type,
                    None => wgpu::TextureSampleType::Float { filterable: false },
                    Some(other) => {
                        return Err(DenoiseError::configuration(Stage::InstanceCreation, format!("{label}: binding {binding} is a read-only texture but the program declares {other:?}")));
                    }
                };
                Ok(wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                })
            }
            BindingKind::ReadWriteTexture => match reflected {
                Some(BindingReflection::Storage { format, access }) => Ok(wgpu::BindingType::StorageTexture {
                    access,
                    format,
                    view_dimension: wgpu::TextureViewDimension::D2,
                }),
                _ => Err(DenoiseError::configuration(
                    Stage::InstanceCreation,
                    format!("{label}: binding {binding} is a storage texture but the program declares no storage format for it"),
                )),
            },
            BindingKind::ConstantBuffer => Ok(wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            }),
        }
    }
}

fn single_mip_view(texture: &wgpu::Texture) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        base_mip_level: 0,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

fn run_utility(encoder: &mut wgpu::CommandEncoder, label: &str, pipeline: &UtilityPipeline, bind_group: &wgpu::BindGroup, size: (u32, u32)) {
    let (x, y) = workgroups(size);
    let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label), timestamp_writes: None });
    compute_pass.set_pipeline(&pipeline.pipeline);
    compute_pass.set_bind_group(0, bind_group, &[]);
    compute_pass.dispatch_workgroups(x, y, 1);
}

impl Backend for WgpuBackend {
    type Texture = wgpu::Texture;
    type Sampler = wgpu::Sampler;
    type Program = WgslProgram;
    type PipelineState = WgpuPipelineState;
    type ConstantBuffer = wgpu::Buffer;
    type Encoder = wgpu::CommandEncoder;

    fn constant_alignment(&self) -> u64 {
        u64::from(self.device.limits().min_uniform_buffer_offset_alignment)
    }

    fn create_texture(&self, spec: &TextureSpec<'_>) -> Result<wgpu::Texture> {
        let usage = wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
        let allowed = spec.format.guaranteed_format_features(self.device.features()).allowed_usages;
        if !allowed.contains(usage) {
            return Err(DenoiseError::configuration(
                Stage::InstanceCreation,
                format!("{}: format {:?} cannot be used as a read-write texture on this device", spec.label, spec.format),
            ));
        }

        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(spec.label),
            size: wgpu::Extent3d {
                width: spec.width,
                height: spec.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: spec.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: spec.format,
            usage,
            view_formats: &[],
        }))
    }

    fn destroy_texture(&self, texture: wgpu::Texture) {
        texture.destroy();
    }

    fn mip_level_count(&self, texture: &wgpu::Texture) -> u32 {
        texture.mip_level_count()
    }

    fn create_sampler(&self, spec: &SamplerSpec) -> Result<wgpu::Sampler> {
        Ok(self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("Sampler {:?} {:?}", spec.filter, spec.address_mode)),
            address_mode_u: spec.address_mode,
            address_mode_v: spec.address_mode,
            address_mode_w: spec.address_mode,
            mag_filter: spec.filter,
            min_filter: spec.filter,
            mipmap_filter: spec.mipmap_filter,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        }))
    }

    fn create_constant_buffer(&self, size: u64) -> Result<wgpu::Buffer> {
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Constant Upload Page"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn write_constants(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    fn create_pipeline_state(&self, desc: &PipelineStateDesc<'_, Self>) -> Result<WgpuPipelineState> {
        let program = desc.program;

        let sampler_entries: Vec<_> = desc
            .samplers
            .iter()
            .map(|sampler| wgpu::BindGroupLayoutEntry {
                binding: sampler.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Sampler(if sampler.filtering {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            })
            .collect();

        let filtering_samplers: Vec<u32> = desc.samplers.iter().filter(|sampler| sampler.filtering).map(|sampler| sampler.binding).collect();
        let mut resource_entries = Vec::with_capacity(desc.layout.texture_slot_count() + 1);
        for range in desc.layout.ranges() {
            for offset in 0..range.count {
                let binding = range.binding(offset);
                resource_entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: Self::texture_entry(&program.reflection, &filtering_samplers, desc.label, range.kind, binding)?,
                    count: None,
                });
            }
        }
        resource_entries.sort_by_key(|entry| entry.binding);

        let sampler_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Samplers", desc.label)),
            entries: &sampler_entries,
        });
        let resource_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &resource_entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&sampler_layout, &resource_layout],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            module: &program.module,
            entry_point: Some(&program.entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        let sampler_bindings: Vec<_> = desc
            .samplers
            .iter()
            .map(|sampler| wgpu::BindGroupEntry {
                binding: sampler.binding,
                resource: wgpu::BindingResource::Sampler(sampler.sampler),
            })
            .collect();
        let sampler_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Samplers", desc.label)),
            layout: &sampler_layout,
            entries: &sampler_bindings,
        });

        Ok(WgpuPipelineState {
            label: desc.label.to_string(),
            pipeline,
            resource_layout,
            sampler_group,
        })
    }

    fn transition(&self, _encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, mip: u32, state: ResourceState) {
        // wgpu tracks usage and inserts barriers itself
        tracing::trace!(format = ?texture.format(), width = texture.width(), height = texture.height(), mip, ?state, "Resource transition");
    }

    fn dispatch(&self, encoder: &mut wgpu::CommandEncoder, pipeline: &WgpuPipelineState, bindings: &BindingSet<'_, Self>, grid: (u32, u32)) -> Result<()> {
        let Some(constants) = bindings.constants() else {
            return Err(DenoiseError::backend(Stage::Dispatch, format!("{}: constant buffer is not bound", bindings.label())));
        };

        let views: Vec<(u32, wgpu::TextureView)> = bindings
            .textures()
            .map(|(binding, view)| {
                let (base_mip_level, mip_level_count) = match view.access {
                    TextureAccess::ReadOnly { base_mip, mip_count } => (base_mip, mip_count),
                    TextureAccess::ReadWrite { mip } => (mip, 1),
                };
                let texture_view = view.texture.create_view(&wgpu::TextureViewDescriptor {
                    base_mip_level,
                    mip_level_count: Some(mip_level_count),
                    ..Default::default()
                });
                (binding, texture_view)
            })
            .collect();

        let mut entries = Vec::with_capacity(views.len() + 1);
        entries.push(wgpu::BindGroupEntry {
            binding: bindings.layout().constant_binding(),
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: constants.buffer,
                offset: constants.offset,
                size: NonZeroU64::new(constants.size),
            }),
        });
        for (binding, view) in &views {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.sort_by_key(|entry| entry.binding);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(bindings.label()),
            layout: &pipeline.resource_layout,
            entries: &entries,
        });

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(bindings.label()),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.pipeline);
        compute_pass.set_bind_group(SAMPLER_GROUP, &pipeline.sampler_group, &[]);
        compute_pass.set_bind_group(RESOURCE_GROUP, &bind_group, &[]);
        compute_pass.dispatch_workgroups(grid.0, grid.1, 1);

        Ok(())
    }

    fn pack_radiance(&self, encoder: &mut wgpu::CommandEncoder, desc: &PackRadianceDesc<'_, Self>) -> Result<()> {
        let mut views = vec![(pack_binding::DIFFUSE, single_mip_view(desc.diffuse.source)), (pack_binding::PACKED_DIFFUSE, single_mip_view(desc.diffuse.packed))];
        if let Some(specular) = &desc.specular {
            views.push((pack_binding::SPECULAR, single_mip_view(specular.source)));
            views.push((pack_binding::PACKED_SPECULAR, single_mip_view(specular.packed)));
        }
        if let Some(view_z) = desc.view_z {
            views.push((pack_binding::VIEW_Z, single_mip_view(view_z)));
        }
        if let Some(normal_roughness) = desc.normal_roughness {
            views.push((pack_binding::NORMAL_ROUGHNESS, single_mip_view(normal_roughness)));
        }
        views.sort_by_key(|(binding, _)| *binding);

        let expected = pack_bindings(desc.packing);
        let bound: Vec<u32> = std::iter::once(pack_binding::CONSTANTS).chain(views.iter().map(|(binding, _)| *binding)).collect();
        if bound != expected {
            return Err(DenoiseError::backend(Stage::Dispatch, format!("{}: expected bindings {expected:?}, got {bound:?}", desc.packing.name())));
        }

        let ConstantView { buffer, offset, size } = desc.constants;
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: pack_binding::CONSTANTS,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset,
                size: NonZeroU64::new(size),
            }),
        }];
        entries.extend(views.iter().map(|(binding, view)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: wgpu::BindingResource::TextureView(view),
        }));

        let mut utility = self.utility.lock().unwrap_or_else(PoisonError::into_inner);
        let pipeline = utility.pack(&self.device, desc.packing);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(desc.packing.name()),
            layout: &pipeline.layout,
            entries: &entries,
        });
        run_utility(encoder, desc.packing.name(), pipeline, &bind_group, (desc.diffuse.packed.width(), desc.diffuse.packed.height()));
        Ok(())
    }

    fn blit_texture(&self, encoder: &mut wgpu::CommandEncoder, source: &wgpu::Texture, destination: &wgpu::Texture) -> Result<()> {
        if !matches!(source.format().sample_type(None, Some(self.device.features())), Some(wgpu::TextureSampleType::Float { .. })) {
            return Err(DenoiseError::configuration(Stage::Dispatch, format!("cannot blit from a {:?} texture", source.format())));
        }
        if !destination.usage().contains(wgpu::TextureUsages::STORAGE_BINDING) || storage_format_name(destination.format()).is_none() {
            return Err(DenoiseError::configuration(
                Stage::Dispatch,
                format!("cannot blit into a {:?} texture without storage access", destination.format()),
            ));
        }

        let source_view = single_mip_view(source);
        let destination_view = single_mip_view(destination);

        let mut utility = self.utility.lock().unwrap_or_else(PoisonError::into_inner);
        let pipeline = utility.blit(&self.device, destination.format())?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit"),
            layout: &pipeline.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&destination_view),
                },
            ],
        });
        run_utility(encoder, "Blit", pipeline, &bind_group, (destination.width(), destination.height()));
        Ok(())
    }

    fn clear_texture(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        encoder.clear_texture(texture, &wgpu::ImageSubresourceRange::default());
    }
}
