//! Per-frame recording of the library's dispatch list
//!
//! For every dispatch the recorder uploads the constant blob, resolves each
//! resource role to a concrete texture, transitions every mip it touches, binds
//! the views into a binding set built from the pipeline's cached layout, and
//! records the dispatch against the cached pipeline state.

use crate::arena::{ConstantAllocation, ConstantUploadArena};
use crate::backend::{Backend, PipelineStateDesc, ProgramSource, ResourceState};
use crate::compiler::MethodInstance;
use crate::error::{DenoiseError, Result, Stage};
use crate::layout::{BindingKind, BindingSet, BindingSetLayout, TextureAccess, TextureView};
use crate::library::{DescriptorType, DispatchDesc, FilteringLibrary, InstanceDesc, ResourceDesc};
use crate::method::{PassThroughOp, RoleBinding, role_binding};
use crate::pipeline_cache::PipelineStateCache;
use crate::pool::ResourcePool;
use std::collections::HashMap;

/// Render-graph channel textures for the current frame, by name
pub struct ChannelBindings<'a, T> {
    channels: HashMap<&'a str, &'a T>,
}

impl<T> Default for ChannelBindings<'_, T> {
    fn default() -> Self {
        Self { channels: HashMap::new() }
    }
}

impl<T> Clone for ChannelBindings<'_, T> {
    fn clone(&self) -> Self {
        Self { channels: self.channels.clone() }
    }
}

impl<'a, T> ChannelBindings<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel, builder style
    pub fn with(mut self, name: &'a str, texture: &'a T) -> Self {
        self.insert(name, texture);
        self
    }

    pub fn insert(&mut self, name: &'a str, texture: &'a T) {
        self.channels.insert(name, texture);
    }

    pub fn get(&self, name: &str) -> Option<&'a T> {
        self.channels.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }
}

/// Counters describing what a frame recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub dispatches: usize,
    pub barriers: usize,
    pub bound_resources: usize,
    pub constant_bytes: usize,
    pub pipeline_rebuilds: usize,
    /// Radiance prepass dispatches recorded ahead of the library's dispatches
    pub prepass_dispatches: usize,
    /// True when the disabled-pass fallback ran instead of the library
    pub pass_through: bool,
}

/// Disjoint borrows of a method instance for the duration of a frame
struct InstanceParts<'i, B: Backend> {
    desc: &'i InstanceDesc,
    pool: &'i ResourcePool<B>,
    layouts: &'i [BindingSetLayout],
    pipeline_states: &'i mut PipelineStateCache<B::PipelineState>,
}

/// Records dispatch lists and pass-through plans into a backend encoder
pub struct FrameDispatcher<B: Backend> {
    arena: ConstantUploadArena<B>,
}

impl<B: Backend> FrameDispatcher<B> {
    pub fn new(backend: &B) -> Self {
        Self {
            arena: ConstantUploadArena::new(backend.constant_alignment()),
        }
    }

    /// Rewinds constant memory at the frame boundary
    pub fn begin_frame(&mut self) {
        self.arena.begin_frame();
    }

    pub fn arena(&self) -> &ConstantUploadArena<B> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ConstantUploadArena<B> {
        &mut self.arena
    }

    /// Records every dispatch, in list order
    ///
    /// # Arguments
    /// * `backend` - Backend to record with
    /// * `encoder` - Command stream for this frame
    /// * `library` - Library that owns the instance
    /// * `instance` - The ready method instance
    /// * `programs` - Program source consulted for pipeline-state rebuilds
    /// * `channels` - Render-graph textures for this frame
    /// * `dispatches` - The library's dispatch list for this frame
    ///
    /// # Returns
    /// Counters for the recorded work
    #[allow(clippy::too_many_arguments)]
    pub fn record<L, P>(
        &mut self,
        backend: &B,
        encoder: &mut B::Encoder,
        library: &L,
        instance: &mut MethodInstance<B, L>,
        programs: &mut P,
        channels: &ChannelBindings<'_, B::Texture>,
        dispatches: &[DispatchDesc],
    ) -> Result<FrameReport>
    where
        L: FilteringLibrary,
        P: ProgramSource<B>,
    {
        let MethodInstance {
            library_instance,
            pool,
            layouts,
            pipeline_states,
            ..
        } = instance;
        let mut parts = InstanceParts {
            desc: library.instance_desc(library_instance),
            pool,
            layouts,
            pipeline_states,
        };

        let mut report = FrameReport::default();
        let rebuilds_before = parts.pipeline_states.rebuild_count();

        for dispatch in dispatches {
            self.record_dispatch(backend, encoder, &mut parts, programs, channels, dispatch, &mut report)?;
        }

        report.pipeline_rebuilds = parts.pipeline_states.rebuild_count() - rebuilds_before;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_dispatch<P: ProgramSource<B>>(
        &mut self,
        backend: &B,
        encoder: &mut B::Encoder,
        parts: &mut InstanceParts<'_, B>,
        programs: &mut P,
        channels: &ChannelBindings<'_, B::Texture>,
        dispatch: &DispatchDesc,
        report: &mut FrameReport,
    ) -> Result<()> {
        let index = dispatch.pipeline_index as usize;
        if index >= parts.layouts.len() || index >= parts.desc.pipelines.len() {
            return Err(DenoiseError::LayoutMismatch {
                dispatch: dispatch.name.clone(),
                detail: format!("pipeline index {index} is out of range for {} pipelines", parts.layouts.len()),
            });
        }

        let blob = &dispatch.constant_buffer_data;
        let max_size = parts.desc.constant_buffer.max_data_size;
        if blob.len() > max_size as usize {
            return Err(DenoiseError::LayoutMismatch {
                dispatch: dispatch.name.clone(),
                detail: format!("constant blob of {} bytes exceeds the declared maximum of {max_size}", blob.len()),
            });
        }

        tracing::debug!(dispatch = %dispatch.name, pipeline = index, resources = dispatch.resources.len(), grid_width = dispatch.grid_width, grid_height = dispatch.grid_height, "Recording dispatch");

        let allocation = self.arena.allocate(backend, blob)?;
        let result = self.encode(backend, encoder, parts, programs, channels, dispatch, &allocation, report);
        self.arena.release(allocation);
        result?;

        report.constant_bytes += blob.len();
        report.dispatches += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode<P: ProgramSource<B>>(
        &self,
        backend: &B,
        encoder: &mut B::Encoder,
        parts: &mut InstanceParts<'_, B>,
        programs: &mut P,
        channels: &ChannelBindings<'_, B::Texture>,
        dispatch: &DispatchDesc,
        allocation: &ConstantAllocation,
        report: &mut FrameReport,
    ) -> Result<()> {
        let index = dispatch.pipeline_index as usize;
        let (desc, pool, layouts) = (parts.desc, parts.pool, parts.layouts);
        let layout = &layouts[index];

        let mut bindings = BindingSet::<B>::new(&dispatch.name, layout);
        bindings.bind_constants(self.arena.view(allocation));

        let consumed = bind_resources(backend, encoder, pool, channels, dispatch, &mut bindings, report)?;
        if consumed != dispatch.resources.len() {
            return Err(DenoiseError::LayoutMismatch {
                dispatch: dispatch.name.clone(),
                detail: format!("layout consumed {consumed} resources but the dispatch declares {}", dispatch.resources.len()),
            });
        }

        let pipeline = &desc.pipelines[index];
        let compiled = programs.program(backend, pipeline).map_err(|err| err.at_stage(Stage::Dispatch))?;
        let state = parts
            .pipeline_states
            .get_or_build(index, compiled.identity, || {
                let samplers = pool.samplers();
                let label = format!("{}::{}", pipeline.shader_file_name, pipeline.shader_entry_point_name);
                backend.create_pipeline_state(&PipelineStateDesc {
                    label: &label,
                    program: &compiled.program,
                    layout,
                    samplers: &samplers,
                })
            })
            .map_err(|err| err.at_stage(Stage::Dispatch))?;

        backend.dispatch(encoder, state, &bindings, (dispatch.grid_width, dispatch.grid_height))
    }

    /// Records the disabled-pass fallback
    ///
    /// Nothing but blits and clears are recorded: no library pipeline, no barrier and no constant upload.
    pub fn record_pass_through(&self, backend: &B, encoder: &mut B::Encoder, plan: &[PassThroughOp], channels: &ChannelBindings<'_, B::Texture>) -> Result<FrameReport> {
        let channel = |name: &str| {
            channels
                .get(name)
                .ok_or_else(|| DenoiseError::configuration(Stage::Binding, format!("channel '{name}' is not bound")))
        };

        for op in plan {
            match *op {
                PassThroughOp::Blit { source, destination } => backend.blit_texture(encoder, channel(source)?, channel(destination)?)?,
                PassThroughOp::Clear { destination } => backend.clear_texture(encoder, channel(destination)?),
            }
        }

        Ok(FrameReport {
            pass_through: true,
            ..FrameReport::default()
        })
    }
}

/// Walks the layout's ranges in order and binds one resource entry per descriptor
///
/// # Returns
/// The number of resource entries consumed
fn bind_resources<'a, B: Backend>(
    backend: &B,
    encoder: &mut B::Encoder,
    pool: &'a ResourcePool<B>,
    channels: &ChannelBindings<'a, B::Texture>,
    dispatch: &DispatchDesc,
    bindings: &mut BindingSet<'a, B>,
    report: &mut FrameReport,
) -> Result<usize> {
    let mut consumed = 0;

    for (range_index, range) in bindings.layout().texture_ranges() {
        let expected = match range.kind {
            BindingKind::ReadOnlyTexture => DescriptorType::Texture,
            BindingKind::ReadWriteTexture => DescriptorType::StorageTexture,
            BindingKind::ConstantBuffer => continue,
        };

        for offset in 0..range.count {
            let Some(resource) = dispatch.resources.get(consumed) else {
                return Err(DenoiseError::LayoutMismatch {
                    dispatch: dispatch.name.clone(),
                    detail: format!("layout expects more than the {} declared resources", dispatch.resources.len()),
                });
            };
            if resource.state_needed != expected {
                return Err(DenoiseError::LayoutMismatch {
                    dispatch: dispatch.name.clone(),
                    detail: format!("resource {consumed} needs {:?} but range {range_index} holds {:?}", resource.state_needed, range.kind),
                });
            }

            let texture = resolve(pool, channels, dispatch, resource)?;

            let state = match resource.state_needed {
                DescriptorType::Texture => ResourceState::ShaderResource,
                DescriptorType::StorageTexture => ResourceState::UnorderedAccess,
            };
            let first_mip = u32::from(resource.mip_offset);
            let mip_count = u32::from(resource.mip_num.max(1));
            let available = backend.mip_level_count(texture);
            if first_mip + mip_count > available {
                return Err(DenoiseError::LayoutMismatch {
                    dispatch: dispatch.name.clone(),
                    detail: format!(
                        "resource {consumed} ({:?}) touches mips {first_mip}..{} but the texture has {available}",
                        resource.resource_type,
                        first_mip + mip_count
                    ),
                });
            }
            for mip in first_mip..first_mip + mip_count {
                backend.transition(encoder, texture, mip, state);
                report.barriers += 1;
            }

            let access = match resource.state_needed {
                DescriptorType::Texture => TextureAccess::ReadOnly { base_mip: first_mip, mip_count },
                DescriptorType::StorageTexture => TextureAccess::ReadWrite { mip: first_mip },
            };
            bindings.bind_texture(range_index, offset, TextureView { texture, access })?;

            consumed += 1;
            report.bound_resources += 1;
        }
    }

    Ok(consumed)
}

/// Resolves a resource's semantic role to a concrete texture
fn resolve<'a, B: Backend>(pool: &'a ResourcePool<B>, channels: &ChannelBindings<'a, B::Texture>, dispatch: &DispatchDesc, resource: &ResourceDesc) -> Result<&'a B::Texture> {
    let index = resource.index_in_pool as usize;
    let texture = match role_binding(resource.resource_type) {
        RoleBinding::Channel(name) => channels.get(name),
        RoleBinding::PermanentPool => pool.permanent(index),
        RoleBinding::TransientPool => pool.transient(index),
        RoleBinding::Unmapped => None,
    };

    texture.ok_or_else(|| DenoiseError::UnresolvedRole {
        dispatch: dispatch.name.clone(),
        role: resource.resource_type,
        index: resource.index_in_pool,
    })
}
