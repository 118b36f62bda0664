//! Host-facing denoising pass
//!
//! The render-graph host drives the pass through `reflect`, `compile` and
//! `execute`. An enabled pass builds its method instance in `compile`; a
//! runtime method toggle, or a pass enabled after compiling, rebuilds on the
//! next enabled frame. The host is expected to have submitted every command
//! stream that references the previous instance before either happens.

use crate::backend::{Backend, ProgramSource};
use crate::compiler::{CompilerStatus, MethodInstance, PipelineCompiler};
use crate::error::{DenoiseError, Result, Stage};
use crate::frame_dispatcher::{ChannelBindings, FrameDispatcher, FrameReport};
use crate::frame_settings::{CameraFrame, FrameParameters, FrameSettingsBuilder};
use crate::library::FilteringLibrary;
use crate::method::{ChannelDesc, DenoisingMethod};
use crate::prepass::{PackConstants, RadiancePacker};
use crate::properties::{DenoiserConfig, Properties};
use tracing::Span;

/// Host information available when the graph is compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileData {
    /// The host's default texture dimensions
    pub default_dims: (u32, u32),
}

/// Result of reflecting the pass
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    /// Size the outputs will be created at
    pub size: (u32, u32),
    pub channels: &'static [ChannelDesc],
}

/// A denoising pass over a filtering library, a backend and a program source
pub struct DenoisePass<B: Backend, L: FilteringLibrary, P: ProgramSource<B>> {
    backend: B,
    library: L,
    programs: P,
    config: DenoiserConfig,
    logger: Span,
    compiler: PipelineCompiler<B, L>,
    packer: Option<RadiancePacker<B>>,
    dispatcher: FrameDispatcher<B>,
    frame_settings: FrameSettingsBuilder,
    screen_size: (u32, u32),
    compiled: bool,
    reinit_pending: bool,
}

impl<B: Backend, L: FilteringLibrary, P: ProgramSource<B>> DenoisePass<B, L, P> {
    /// Creates the pass from its serialized configuration
    ///
    /// # Arguments
    /// * `backend` - Backend that records the pass's work
    /// * `library` - Filtering library producing the dispatch graph
    /// * `programs` - Program source for the library's pipelines
    /// * `properties` - Serialized configuration
    /// * `logger` - Span every event of the pass is recorded under
    pub fn new(backend: B, library: L, programs: P, properties: &Properties, logger: Span) -> Result<Self> {
        let config = DenoiserConfig::from_properties(properties, &logger)?;
        {
            let _entered = logger.enter();
            tracing::info!(library = %library.library_desc().version(), method = %config.method, enabled = config.enabled, "Created denoise pass");
        }

        let dispatcher = FrameDispatcher::new(&backend);
        Ok(Self {
            backend,
            library,
            programs,
            config,
            logger,
            compiler: PipelineCompiler::new(),
            packer: None,
            dispatcher,
            frame_settings: FrameSettingsBuilder::new(),
            screen_size: (0, 0),
            compiled: false,
            reinit_pending: true,
        })
    }

    /// Serializes the current configuration
    pub fn properties(&self) -> Properties {
        self.config.to_properties()
    }

    pub fn config(&self) -> &DenoiserConfig {
        &self.config
    }

    /// Version of the filtering library, as `major.minor.build`
    pub fn library_version(&self) -> String {
        self.library.library_desc().version()
    }

    /// Channels the selected method reads and writes, and the size outputs are created at
    pub fn reflect(&self, data: &CompileData) -> Reflection {
        Reflection {
            size: self.config.output_size.resolve(self.screen_size, data.default_dims),
            channels: self.config.method.channels(),
        }
    }

    /// Captures the output resolution and rebuilds the method instance
    ///
    /// A disabled pass defers the rebuild to its first enabled frame, so
    /// failures to create the instance surface there instead.
    pub fn compile(&mut self, data: &CompileData) -> Result<()> {
        let logger = self.logger.clone();
        let _entered = logger.enter();
        self.screen_size = self.config.output_size.resolve(self.screen_size, data.default_dims);
        self.compiled = true;
        self.reinit_pending = true;
        tracing::info!(width = self.screen_size.0, height = self.screen_size.1, "Compiled denoise pass");

        if self.config.enabled { self.reinit() } else { Ok(()) }
    }

    /// Records one frame
    ///
    /// While the pass is disabled only the method's pass-through blits and
    /// clears are recorded, and no method instance is built. Otherwise the
    /// radiance prepass runs first and the library reads its packed textures.
    ///
    /// # Arguments
    /// * `encoder` - Command stream for this frame
    /// * `channels` - The render-graph textures reflected by the pass
    /// * `camera` - This frame's camera
    ///
    /// # Returns
    /// Counters for the recorded work
    pub fn execute(&mut self, encoder: &mut B::Encoder, channels: &ChannelBindings<'_, B::Texture>, camera: &CameraFrame) -> Result<FrameReport> {
        let logger = self.logger.clone();
        let _entered = logger.enter();

        if !self.compiled {
            return Err(DenoiseError::configuration(Stage::Dispatch, "execute called before compile"));
        }

        if !self.config.enabled {
            let plan = self.config.method.pass_through(self.config.world_space_motion);
            return self.dispatcher.record_pass_through(&self.backend, encoder, &plan, channels);
        }

        if self.reinit_pending || self.compiler.status() != CompilerStatus::Ready {
            self.reinit()?;
        }

        let Some(instance) = self.compiler.instance_mut() else {
            return Err(DenoiseError::configuration(Stage::Dispatch, "no method instance after reinit"));
        };

        let common = self.frame_settings.build(
            camera,
            &FrameParameters {
                resolution: self.screen_size,
                disocclusion_threshold: self.config.disocclusion_threshold,
                world_space_motion: self.config.world_space_motion,
            },
        );

        self.dispatcher.begin_frame();
        let mut prepass = FrameReport::default();
        let packed = match &self.packer {
            Some(packer) => {
                let constants = PackConstants::new(self.config.max_intensity, &self.config.reblur.hit_distance_parameters);
                Some(packer.record(&self.backend, encoder, self.dispatcher.arena_mut(), channels, &constants, &mut prepass)?)
            }
            None => None,
        };

        self.library
            .set_method_settings(&mut instance.library_instance, &self.config.method_settings())
            .map_err(|err| DenoiseError::library(Stage::Dispatch, "set_method_settings", err))?;
        let dispatches = self
            .library
            .compute_dispatches(&mut instance.library_instance, &common)
            .map_err(|err| DenoiseError::library(Stage::Dispatch, "compute_dispatches", err))?;

        let channels = packed.as_ref().unwrap_or(channels);
        let mut report = self.dispatcher.record(&self.backend, encoder, &self.library, instance, &mut self.programs, channels, &dispatches)?;
        report.prepass_dispatches = prepass.prepass_dispatches;
        report.barriers += prepass.barriers;
        report.constant_bytes += prepass.constant_bytes;
        Ok(report)
    }

    /// Enables or disables filtering; a disabled pass only copies inputs to outputs
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.config.enabled != enabled {
            let _entered = self.logger.enter();
            tracing::info!(enabled, "Denoise pass toggled");
            self.config.enabled = enabled;
        }
    }

    /// Switches to `method` at the next frame
    ///
    /// Only methods sharing a channel set can be switched without recompiling
    /// the render graph; any other switch is rejected.
    pub fn request_method(&mut self, method: DenoisingMethod) -> Result<()> {
        let current = self.config.method;
        if method == current {
            return Ok(());
        }
        if !current.is_runtime_togglable() || !method.is_runtime_togglable() {
            return Err(DenoiseError::configuration(
                Stage::InstanceCreation,
                format!("switching from {current} to {method} changes the pass's channels and requires a graph recompile"),
            ));
        }

        let _entered = self.logger.enter();
        tracing::info!(from = %current, to = %method, "Method switch requested");
        self.config.method = method;
        self.reinit_pending = true;
        Ok(())
    }

    /// The ready method instance, if one has been built
    pub fn instance(&self) -> Option<&MethodInstance<B, L>> {
        self.compiler.instance()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn programs_mut(&mut self) -> &mut P {
        &mut self.programs
    }

    fn reinit(&mut self) -> Result<()> {
        if let Some(packer) = self.packer.take() {
            packer.release(&self.backend);
        }
        self.compiler.rebuild(&self.backend, &self.library, &mut self.programs, self.config.method, self.screen_size)?;
        if let Some(packing) = self.config.method.radiance_packing() {
            self.packer = Some(RadiancePacker::allocate(&self.backend, packing, self.screen_size)?);
        }
        self.frame_settings.reset();
        self.reinit_pending = false;
        Ok(())
    }
}

impl<B: Backend, L: FilteringLibrary, P: ProgramSource<B>> Drop for DenoisePass<B, L, P> {
    fn drop(&mut self) {
        let _entered = self.logger.enter();
        if let Some(packer) = self.packer.take() {
            packer.release(&self.backend);
        }
        self.compiler.teardown(&self.backend, &self.library);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Method;
    use crate::properties::{OutputSize, PropertyValue};
    use crate::testing::{Command, MockBackend, MockTexture, ScriptedLibrary, StaticPrograms, scenario_library};
    use std::sync::Arc;

    type Pass = DenoisePass<MockBackend, Arc<ScriptedLibrary>, StaticPrograms>;

    const DATA: CompileData = CompileData { default_dims: (64, 64) };

    fn pass(backend: &MockBackend, library: &Arc<ScriptedLibrary>, properties: &Properties) -> Pass {
        DenoisePass::new(backend.clone(), Arc::clone(library), StaticPrograms::new(), properties, tracing::info_span!("denoise-pass-test")).unwrap()
    }

    fn channel_textures(backend: &MockBackend) -> Vec<(&'static str, MockTexture)> {
        DenoisingMethod::RelaxDiffuseSpecular
            .channels()
            .iter()
            .map(|channel| (channel.name, backend.channel_texture(channel.format.unwrap_or(wgpu::TextureFormat::Rgba16Float))))
            .collect()
    }

    fn bindings<'a>(textures: &'a [(&'static str, MockTexture)]) -> ChannelBindings<'a, MockTexture> {
        let mut channels = ChannelBindings::new();
        for (name, texture) in textures {
            channels.insert(*name, texture);
        }
        channels
    }

    #[test]
    fn test_execute_before_compile_fails() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        let textures = channel_textures(&backend);

        let err = pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration { stage: Stage::Dispatch, .. }));
        assert_eq!(library.created.get(), 0);
    }

    #[test]
    fn test_frames_advance_and_reuse_the_instance() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();

        for _ in 0..3 {
            let report = pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
            assert_eq!(report.dispatches, 2);
            assert_eq!(report.bound_resources, 12);
        }

        assert_eq!(library.created.get(), 1);
        assert_eq!(backend.pipeline_states_created(), 2);
        let instance = pass.instance().unwrap();
        let common = instance.library_instance().common.unwrap();
        assert_eq!(common.frame_index, 2);
        assert_eq!(common.resolution, [64, 64]);
        assert!(instance.library_instance().settings.is_some());
    }

    #[test]
    fn test_reflect_follows_method_and_output_size() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut properties = Properties::new();
        properties.insert("method", PropertyValue::String("SpecularDeltaMv".into()));
        properties.insert("outputSize", PropertyValue::String(OutputSize::Half.name().into()));
        let pass = pass(&backend, &library, &properties);

        let reflection = pass.reflect(&CompileData { default_dims: (1920, 1080) });
        assert_eq!(reflection.size, (960, 540));
        assert_eq!(reflection.channels, DenoisingMethod::SpecularDeltaMv.channels());
        assert_eq!(pass.library_version(), "4.0.2");
        assert_eq!(pass.properties().get("method"), Some(&PropertyValue::String("SpecularDeltaMv".into())));
    }

    #[test]
    fn test_disabled_pass_only_blits() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();
        pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        let pipeline_states = backend.pipeline_states_created();
        let constant_writes = backend.constant_writes().len();

        pass.set_enabled(false);
        let mut encoder = Vec::new();
        let report = pass.execute(&mut encoder, &bindings(&textures), &CameraFrame::default()).unwrap();

        assert!(report.pass_through);
        assert_eq!(encoder.len(), 2);
        assert!(encoder.iter().all(|command| matches!(command, Command::Blit { .. })));
        assert_eq!(backend.pipeline_states_created(), pipeline_states);
        assert_eq!(backend.constant_writes().len(), constant_writes);
    }

    #[test]
    fn test_disabled_from_start_builds_nothing() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut properties = Properties::new();
        properties.insert("enabled", PropertyValue::Bool(false));
        let mut pass = pass(&backend, &library, &properties);
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();

        pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        assert_eq!(library.created.get(), 0);
        assert!(pass.instance().is_none());
        assert_eq!(backend.constant_buffers_created(), 0);

        pass.set_enabled(true);
        let report = pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        assert_eq!(report.dispatches, 2);
    }

    #[test]
    fn test_runtime_toggle_rebuilds_at_next_frame() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();
        pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        let previous = backend.live_textures();

        pass.request_method(DenoisingMethod::ReblurDiffuseSpecular).unwrap();
        assert_eq!(pass.instance().unwrap().method(), DenoisingMethod::RelaxDiffuseSpecular);

        let report = pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        assert_eq!(report.dispatches, 1);
        assert_eq!(library.destroyed.get(), 1);
        let instance = pass.instance().unwrap();
        assert_eq!(instance.method(), DenoisingMethod::ReblurDiffuseSpecular);
        assert_eq!(instance.library_instance().method, Method::ReblurDiffuseSpecular);
        assert_eq!(instance.library_instance().common.unwrap().frame_index, 0);
        assert!(previous.iter().all(|id| !backend.live_textures().contains(id)));

        let err = pass.request_method(DenoisingMethod::RelaxDiffuse).unwrap_err();
        assert!(matches!(err, DenoiseError::Configuration { .. }));
        assert_eq!(pass.config().method, DenoisingMethod::ReblurDiffuseSpecular);
    }

    #[test]
    fn test_library_dispatch_failure_is_fatal() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();
        library.fail_dispatch.set(true);

        let err = pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap_err();
        assert!(matches!(err, DenoiseError::LibraryCall { stage: Stage::Dispatch, call: "compute_dispatches", .. }));
    }

    #[test]
    fn test_drop_releases_instance() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let textures = channel_textures(&backend);
        {
            let mut pass = pass(&backend, &library, &Properties::new());
            pass.compile(&DATA).unwrap();
            pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
            assert_eq!(backend.live_textures().len(), 5);
        }

        assert!(backend.live_textures().is_empty());
        assert_eq!(library.destroyed.get(), 1);
    }

    #[test]
    fn test_compile_builds_enabled_pass() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut pass = pass(&backend, &library, &Properties::new());
        pass.compile(&DATA).unwrap();

        assert_eq!(library.created.get(), 1);
        assert_eq!(backend.pipeline_states_created(), 2);
        assert_eq!(pass.instance().unwrap().method(), DenoisingMethod::RelaxDiffuseSpecular);

        let textures = channel_textures(&backend);
        pass.execute(&mut Vec::new(), &bindings(&textures), &CameraFrame::default()).unwrap();
        assert_eq!(library.created.get(), 1);
    }

    #[test]
    fn test_compile_surfaces_instance_failure() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        library.fail_create.set(true);
        let mut pass = pass(&backend, &library, &Properties::new());

        let err = pass.compile(&DATA).unwrap_err();
        assert!(matches!(err, DenoiseError::LibraryCall { stage: Stage::InstanceCreation, .. }));
        assert!(pass.instance().is_none());
        assert!(backend.live_textures().is_empty());
    }

    #[test]
    fn test_radiance_prepass_precedes_library_dispatches() {
        let backend = MockBackend::new();
        let library = Arc::new(scenario_library());
        let mut properties = Properties::new();
        properties.insert("maxIntensity", PropertyValue::Float(64.0));
        let mut pass = pass(&backend, &library, &properties);
        let textures = channel_textures(&backend);
        pass.compile(&DATA).unwrap();
        let writes_before = backend.constant_writes().len();

        let mut encoder = Vec::new();
        let report = pass.execute(&mut encoder, &bindings(&textures), &CameraFrame::default()).unwrap();
        assert_eq!(report.prepass_dispatches, 1);
        assert_eq!(report.dispatches, 2);

        let prepass = encoder.iter().position(|command| matches!(command, Command::PackRadiance { .. })).unwrap();
        let first_dispatch = encoder.iter().position(|command| matches!(command, Command::Dispatch { .. })).unwrap();
        assert!(prepass < first_dispatch);

        let Command::PackRadiance { packing, packed, .. } = &encoder[prepass] else {
            unreachable!()
        };
        assert_eq!(*packing, crate::method::RadiancePacking::RelaxDiffuseSpecular);
        let blur = encoder.iter().filter(|command| matches!(command, Command::Dispatch { .. })).nth(1).unwrap();
        let Command::Dispatch { textures: bound, .. } = blur else {
            unreachable!()
        };
        assert!(bound.iter().any(|(binding, id, _)| *binding == 200 && *id == packed[0]));

        let prepass_constants = &backend.constant_writes()[writes_before].2;
        assert_eq!(&prepass_constants[16..20], &64.0f32.to_le_bytes());
    }
}
