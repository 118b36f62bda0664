//! Method-instance lifecycle
//!
//! A method instance bundles everything built for one filtering method at one
//! resolution: the library instance, the resource pool, one binding-set layout
//! and one pipeline-state object per declared pipeline. Rebuilding replaces the
//! whole bundle; nothing is patched in place across a rebuild.

use crate::backend::{Backend, PipelineStateDesc, ProgramSource};
use crate::error::{DenoiseError, Result, Stage};
use crate::layout::BindingSetLayout;
use crate::library::{BindingOffsets, FilteringLibrary, InstanceCreationDesc, InstanceDesc, MethodDesc, SystemAllocator};
use crate::method::DenoisingMethod;
use crate::pipeline_cache::PipelineStateCache;
use crate::pool::ResourcePool;
use std::sync::Arc;

/// Observable state of a [`PipelineCompiler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerStatus {
    Uninitialized,
    Building,
    Ready,
}

/// Everything built for the selected method
pub struct MethodInstance<B: Backend, L: FilteringLibrary> {
    method: DenoisingMethod,
    size: (u32, u32),
    pub(crate) library_instance: L::Instance,
    allocator: Arc<SystemAllocator>,
    pub(crate) pool: ResourcePool<B>,
    pub(crate) layouts: Box<[BindingSetLayout]>,
    pub(crate) pipeline_states: PipelineStateCache<B::PipelineState>,
}

impl<B: Backend, L: FilteringLibrary> MethodInstance<B, L> {
    pub fn method(&self) -> DenoisingMethod {
        self.method
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Number of compiled pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipeline_states.len()
    }

    pub fn layouts(&self) -> &[BindingSetLayout] {
        &self.layouts
    }

    pub fn pool(&self) -> &ResourcePool<B> {
        &self.pool
    }

    pub fn pipeline_states(&self) -> &PipelineStateCache<B::PipelineState> {
        &self.pipeline_states
    }

    pub fn library_instance(&self) -> &L::Instance {
        &self.library_instance
    }

    /// Allocator scoped to the library instance
    pub fn allocator(&self) -> &Arc<SystemAllocator> {
        &self.allocator
    }

    fn destroy(self, backend: &B, library: &L) {
        let Self {
            method,
            library_instance,
            allocator,
            mut pool,
            ..
        } = self;

        library.destroy_instance(library_instance);
        pool.release(backend);

        let outstanding = allocator.outstanding_bytes();
        if outstanding > 0 {
            tracing::warn!(%method, outstanding, "Library instance left host memory allocated");
        }
        tracing::info!(%method, "Destroyed method instance");
    }
}

enum CompilerState<B: Backend, L: FilteringLibrary> {
    Uninitialized,
    Building,
    Ready(MethodInstance<B, L>),
}

/// Owns the method instance and drives its create/destroy/rebuild lifecycle
pub struct PipelineCompiler<B: Backend, L: FilteringLibrary> {
    state: CompilerState<B, L>,
}

impl<B: Backend, L: FilteringLibrary> Default for PipelineCompiler<B, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend, L: FilteringLibrary> PipelineCompiler<B, L> {
    pub fn new() -> Self {
        Self {
            state: CompilerState::Uninitialized,
        }
    }

    pub fn status(&self) -> CompilerStatus {
        match self.state {
            CompilerState::Uninitialized => CompilerStatus::Uninitialized,
            CompilerState::Building => CompilerStatus::Building,
            CompilerState::Ready(_) => CompilerStatus::Ready,
        }
    }

    pub fn instance(&self) -> Option<&MethodInstance<B, L>> {
        match &self.state {
            CompilerState::Ready(instance) => Some(instance),
            CompilerState::Uninitialized | CompilerState::Building => None,
        }
    }

    pub(crate) fn instance_mut(&mut self) -> Option<&mut MethodInstance<B, L>> {
        match &mut self.state {
            CompilerState::Ready(instance) => Some(instance),
            CompilerState::Uninitialized | CompilerState::Building => None,
        }
    }

    /// Tears down the current instance and builds a new one for `method` at `size`
    ///
    /// The previous instance is destroyed before anything new is created.
    /// On failure every partially built object is destroyed and the compiler
    /// is left uninitialized.
    ///
    /// # Arguments
    /// * `backend` - Backend that owns the created objects
    /// * `library` - Filtering library providing the instance description
    /// * `programs` - Program source for the declared pipelines
    /// * `method` - Method to build
    /// * `size` - Output resolution
    pub fn rebuild<P: ProgramSource<B>>(&mut self, backend: &B, library: &L, programs: &mut P, method: DenoisingMethod, size: (u32, u32)) -> Result<()> {
        self.teardown(backend, library);
        self.state = CompilerState::Building;
        tracing::info!(%method, width = size.0, height = size.1, "Building method instance");

        match Self::build(backend, library, programs, method, size) {
            Ok(instance) => {
                tracing::info!(%method, pipelines = instance.pipeline_count(), pool = instance.pool.texture_count(), "Method instance ready");
                self.state = CompilerState::Ready(instance);
                Ok(())
            }
            Err(err) => {
                self.state = CompilerState::Uninitialized;
                Err(err)
            }
        }
    }

    /// Destroys the current instance, if any
    pub fn teardown(&mut self, backend: &B, library: &L) {
        if let CompilerState::Ready(instance) = std::mem::replace(&mut self.state, CompilerState::Uninitialized) {
            instance.destroy(backend, library);
        }
    }

    fn build<P: ProgramSource<B>>(backend: &B, library: &L, programs: &mut P, method: DenoisingMethod, size: (u32, u32)) -> Result<MethodInstance<B, L>> {
        let library_method = method.library_method();
        if !library.library_desc().supports(library_method) {
            return Err(DenoiseError::configuration(Stage::InstanceCreation, format!("library does not provide method {library_method}")));
        }

        let (Ok(width), Ok(height)) = (u16::try_from(size.0), u16::try_from(size.1)) else {
            return Err(DenoiseError::configuration(Stage::InstanceCreation, format!("resolution {}x{} exceeds the library's limits", size.0, size.1)));
        };

        let allocator = Arc::new(SystemAllocator::new());
        let library_instance = library
            .create_instance(InstanceCreationDesc {
                method: MethodDesc {
                    method: library_method,
                    full_resolution_width: width,
                    full_resolution_height: height,
                },
                allocator: allocator.clone(),
            })
            .map_err(|err| DenoiseError::library(Stage::InstanceCreation, "create_instance", err))?;

        let offsets = library.library_desc().binding_offsets;
        match Self::build_objects(backend, programs, library.instance_desc(&library_instance), &offsets) {
            Ok((pool, layouts, pipeline_states)) => Ok(MethodInstance {
                method,
                size,
                library_instance,
                allocator,
                pool,
                layouts,
                pipeline_states,
            }),
            Err(err) => {
                library.destroy_instance(library_instance);
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn build_objects<P: ProgramSource<B>>(
        backend: &B,
        programs: &mut P,
        desc: &InstanceDesc,
        offsets: &BindingOffsets,
    ) -> Result<(ResourcePool<B>, Box<[BindingSetLayout]>, PipelineStateCache<B::PipelineState>)> {
        let mut pool = ResourcePool::allocate(backend, desc, offsets)?;

        match Self::build_pipelines(backend, programs, desc, offsets, &pool) {
            Ok((layouts, states)) => Ok((pool, layouts, states)),
            Err(err) => {
                pool.release(backend);
                Err(err)
            }
        }
    }

    fn build_pipelines<P: ProgramSource<B>>(
        backend: &B,
        programs: &mut P,
        desc: &InstanceDesc,
        offsets: &BindingOffsets,
        pool: &ResourcePool<B>,
    ) -> Result<(Box<[BindingSetLayout]>, PipelineStateCache<B::PipelineState>)> {
        let samplers = pool.samplers();
        let mut layouts = Vec::with_capacity(desc.pipelines.len());
        let mut states = Vec::with_capacity(desc.pipelines.len());

        for (index, pipeline) in desc.pipelines.iter().enumerate() {
            let layout = BindingSetLayout::from_pipeline(pipeline, &desc.constant_buffer, offsets);
            let compiled = programs.program(backend, pipeline)?;
            let label = format!("{}::{}", pipeline.shader_file_name, pipeline.shader_entry_point_name);
            let state = backend.create_pipeline_state(&PipelineStateDesc {
                label: &label,
                program: &compiled.program,
                layout: &layout,
                samplers: &samplers,
            })?;
            tracing::debug!(pipeline = index, %label, ranges = layout.range_count(), identity = %compiled.identity, "Compiled pipeline");

            layouts.push(layout);
            states.push((compiled.identity, state));
        }

        Ok((layouts.into_boxed_slice(), PipelineStateCache::new(states)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Method;
    use crate::testing::{MockBackend, ScriptedLibrary, StaticPrograms, scenario_library};

    type Compiler = PipelineCompiler<MockBackend, ScriptedLibrary>;

    #[test]
    fn test_scenario_builds_layouts_and_pool() {
        let backend = MockBackend::new();
        let library = scenario_library();
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();
        assert_eq!(compiler.status(), CompilerStatus::Uninitialized);

        compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap();

        assert_eq!(compiler.status(), CompilerStatus::Ready);
        let instance = compiler.instance().unwrap();
        assert_eq!(instance.pipeline_count(), 2);
        let range_counts: Vec<usize> = instance.layouts().iter().map(BindingSetLayout::range_count).collect();
        assert_eq!(range_counts, vec![3, 4]);
        assert_eq!(instance.pool().texture_count(), 3);
        assert_eq!(backend.live_textures().len(), 3);
        assert_eq!(backend.pipeline_states_created(), 2);
        assert_eq!(instance.pipeline_states().state(0).unwrap().sampler_bindings, vec![100]);
    }

    #[test]
    fn test_method_switch_tears_down_first() {
        let backend = MockBackend::new();
        let library = scenario_library();
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();

        compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap();
        let previous: Vec<usize> = (0..3).map(|slot| compiler.instance().unwrap().pool().slot(slot).unwrap().id).collect();
        let previous_allocator = Arc::clone(compiler.instance().unwrap().allocator());

        compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::ReblurDiffuseSpecular, (64, 64)).unwrap();

        let live = backend.live_textures();
        assert!(previous.iter().all(|id| !live.contains(id)));
        assert_eq!(live.len(), 2);
        assert_eq!(library.destroyed.get(), 1);
        assert_eq!(previous_allocator.outstanding_bytes(), 0);
        assert_eq!(compiler.instance().unwrap().method(), DenoisingMethod::ReblurDiffuseSpecular);
        assert_eq!(compiler.instance().unwrap().pipeline_count(), 1);
    }

    #[test]
    fn test_library_failure_leaves_uninitialized() {
        let backend = MockBackend::new();
        let library = scenario_library();
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();

        compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap();
        library.fail_create.set(true);

        let err = compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap_err();
        assert!(matches!(err, DenoiseError::LibraryCall { stage: Stage::InstanceCreation, call: "create_instance", .. }));
        assert_eq!(compiler.status(), CompilerStatus::Uninitialized);
        assert!(backend.live_textures().is_empty());
    }

    #[test]
    fn test_pipeline_failure_destroys_partial_state() {
        let backend = MockBackend::new();
        let library = scenario_library();
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();
        backend.fail_pipeline("Blur::main");

        let err = compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap_err();
        assert!(matches!(err, DenoiseError::Backend { .. }));
        assert_eq!(compiler.status(), CompilerStatus::Uninitialized);
        assert!(backend.live_textures().is_empty());
        assert_eq!(library.created.get(), 1);
        assert_eq!(library.destroyed.get(), 1);
    }

    #[test]
    fn test_unsupported_method_and_oversized_resolution() {
        let backend = MockBackend::new();
        let library = ScriptedLibrary::new(vec![(Method::RelaxDiffuseSpecular, crate::testing::scenario_instance_desc(), vec![])]);
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();

        let err = compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::SpecularDeltaMv, (64, 64)).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration { stage: Stage::InstanceCreation, .. }));

        let err = compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (70_000, 64)).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration { .. }));
        assert_eq!(library.created.get(), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let backend = MockBackend::new();
        let library = scenario_library();
        let mut programs = StaticPrograms::new();
        let mut compiler = Compiler::new();

        compiler.rebuild(&backend, &library, &mut programs, DenoisingMethod::RelaxDiffuseSpecular, (64, 64)).unwrap();
        compiler.teardown(&backend, &library);

        assert_eq!(compiler.status(), CompilerStatus::Uninitialized);
        assert!(backend.live_textures().is_empty());
        assert_eq!(library.destroyed.get(), 1);
    }
}
