//! Recording backend and scripted library used by unit tests

use crate::backend::{Backend, CompiledProgram, PackRadianceDesc, PipelineStateDesc, ProgramIdentity, ProgramSource, ResourceState, SamplerSpec, TextureSpec};
use crate::error::{DenoiseError, Result, Stage};
use crate::layout::{BindingSet, TextureAccess};
use crate::library::{
    BindingOffsets, CommonSettings, ConstantBufferDesc, DescriptorRangeDesc, DescriptorType, DispatchDesc, FilteringLibrary, Format, InstanceAllocator, InstanceCreationDesc, InstanceDesc,
    LibraryDesc, LibraryError, Method, MethodSettings, PipelineDesc, ResourceDesc, ResourceType, StaticSampler, StaticSamplerDesc, TextureDesc,
};
use crate::method::RadiancePacking;
use bytes::{Bytes, BytesMut};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct MockTexture {
    pub id: usize,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
}

impl MockTexture {
    pub fn new(id: usize, width: u32, height: u32, format: wgpu::TextureFormat, mip_level_count: u32) -> Self {
        Self {
            id,
            width,
            height,
            format,
            mip_level_count,
        }
    }
}

#[derive(Debug)]
pub struct MockSampler {
    pub spec: SamplerSpec,
}

#[derive(Debug)]
pub struct MockProgram {
    pub shader: String,
}

#[derive(Debug)]
pub struct MockPipelineState {
    pub id: usize,
    pub label: String,
    pub sampler_bindings: Vec<u32>,
    pub range_count: usize,
}

#[derive(Debug)]
pub struct MockBuffer {
    pub id: usize,
    pub size: u64,
}

/// A command recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier { texture: usize, mip: u32, state: ResourceState },
    Dispatch { pipeline_state: usize, textures: Vec<(u32, usize, TextureAccess)>, constants: (usize, u64, u64), grid: (u32, u32) },
    PackRadiance { packing: RadiancePacking, sources: Vec<usize>, packed: Vec<usize>, constants: (usize, u64, u64) },
    Blit { source: usize, destination: usize },
    Clear { destination: usize },
}

#[derive(Debug, Default)]
struct MockState {
    next_id: Cell<usize>,
    textures: RefCell<Vec<usize>>,
    destroyed: RefCell<Vec<usize>>,
    pipeline_states: Cell<usize>,
    constant_buffers: Cell<usize>,
    constant_writes: RefCell<Vec<(usize, u64, Vec<u8>)>>,
    fail_pipeline: RefCell<Option<String>>,
}

/// Backend that records commands into a `Vec` instead of a GPU command stream
///
/// Clones share their state, like clones of a device handle.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Rc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> usize {
        let id = self.state.next_id.get() + 1;
        self.state.next_id.set(id);
        id
    }

    /// Ids of textures created and not yet destroyed
    pub fn live_textures(&self) -> Vec<usize> {
        let destroyed = self.state.destroyed.borrow();
        self.state.textures.borrow().iter().copied().filter(|id| !destroyed.contains(id)).collect()
    }

    pub fn pipeline_states_created(&self) -> usize {
        self.state.pipeline_states.get()
    }

    pub fn constant_buffers_created(&self) -> usize {
        self.state.constant_buffers.get()
    }

    pub fn constant_writes(&self) -> Vec<(usize, u64, Vec<u8>)> {
        self.state.constant_writes.borrow().clone()
    }

    /// Makes pipeline-state creation fail for the given label
    pub fn fail_pipeline(&self, label: &str) {
        *self.state.fail_pipeline.borrow_mut() = Some(label.to_string());
    }

    /// A texture standing in for a host-supplied channel
    pub fn channel_texture(&self, format: wgpu::TextureFormat) -> MockTexture {
        MockTexture::new(self.next_id(), 64, 64, format, 1)
    }
}

impl Backend for MockBackend {
    type Texture = MockTexture;
    type Sampler = MockSampler;
    type Program = MockProgram;
    type PipelineState = MockPipelineState;
    type ConstantBuffer = MockBuffer;
    type Encoder = Vec<Command>;

    fn constant_alignment(&self) -> u64 {
        256
    }

    fn create_texture(&self, spec: &TextureSpec<'_>) -> Result<MockTexture> {
        let texture = MockTexture::new(self.next_id(), spec.width, spec.height, spec.format, spec.mip_level_count);
        self.state.textures.borrow_mut().push(texture.id);
        Ok(texture)
    }

    fn destroy_texture(&self, texture: MockTexture) {
        self.state.destroyed.borrow_mut().push(texture.id);
    }

    fn mip_level_count(&self, texture: &MockTexture) -> u32 {
        texture.mip_level_count
    }

    fn create_sampler(&self, spec: &SamplerSpec) -> Result<MockSampler> {
        Ok(MockSampler { spec: *spec })
    }

    fn create_constant_buffer(&self, size: u64) -> Result<MockBuffer> {
        self.state.constant_buffers.set(self.state.constant_buffers.get() + 1);
        Ok(MockBuffer { id: self.next_id(), size })
    }

    fn write_constants(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) {
        assert!(offset + data.len() as u64 <= buffer.size);
        self.state.constant_writes.borrow_mut().push((buffer.id, offset, data.to_vec()));
    }

    fn create_pipeline_state(&self, desc: &PipelineStateDesc<'_, Self>) -> Result<MockPipelineState> {
        if self.state.fail_pipeline.borrow().as_deref() == Some(desc.label) {
            return Err(DenoiseError::backend(Stage::InstanceCreation, format!("pipeline '{}' failed to compile", desc.label)));
        }
        self.state.pipeline_states.set(self.state.pipeline_states.get() + 1);
        Ok(MockPipelineState {
            id: self.next_id(),
            label: desc.label.to_string(),
            sampler_bindings: desc.samplers.iter().map(|sampler| sampler.binding).collect(),
            range_count: desc.layout.range_count(),
        })
    }

    fn transition(&self, encoder: &mut Vec<Command>, texture: &MockTexture, mip: u32, state: ResourceState) {
        encoder.push(Command::Barrier { texture: texture.id, mip, state });
    }

    fn dispatch(&self, encoder: &mut Vec<Command>, pipeline: &MockPipelineState, bindings: &BindingSet<'_, Self>, grid: (u32, u32)) -> Result<()> {
        let constants = bindings
            .constants()
            .map(|view| (view.buffer.id, view.offset, view.size))
            .ok_or_else(|| DenoiseError::backend(Stage::Dispatch, "constants not bound"))?;
        encoder.push(Command::Dispatch {
            pipeline_state: pipeline.id,
            textures: bindings.textures().map(|(binding, view)| (binding, view.texture.id, view.access)).collect(),
            constants,
            grid,
        });
        Ok(())
    }

    fn pack_radiance(&self, encoder: &mut Vec<Command>, desc: &PackRadianceDesc<'_, Self>) -> Result<()> {
        let mut sources = vec![desc.diffuse.source.id];
        let mut packed = vec![desc.diffuse.packed.id];
        if let Some(specular) = &desc.specular {
            sources.push(specular.source.id);
            packed.push(specular.packed.id);
        }
        sources.extend(desc.view_z.iter().chain(desc.normal_roughness.iter()).map(|texture| texture.id));

        encoder.push(Command::PackRadiance {
            packing: desc.packing,
            sources,
            packed,
            constants: (desc.constants.buffer.id, desc.constants.offset, desc.constants.size),
        });
        Ok(())
    }

    fn blit_texture(&self, encoder: &mut Vec<Command>, source: &MockTexture, destination: &MockTexture) -> Result<()> {
        encoder.push(Command::Blit {
            source: source.id,
            destination: destination.id,
        });
        Ok(())
    }

    fn clear_texture(&self, encoder: &mut Vec<Command>, texture: &MockTexture) {
        encoder.push(Command::Clear { destination: texture.id });
    }
}

/// Program source that hands out programs with adjustable identities
#[derive(Debug, Default)]
pub struct StaticPrograms {
    identities: HashMap<String, u64>,
    failing: Option<String>,
    pub requests: usize,
}

impl StaticPrograms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a hot-reload of `shader` producing a different program
    pub fn set_identity(&mut self, shader: &str, identity: u64) {
        self.identities.insert(shader.to_string(), identity);
    }

    /// Makes loading `shader` fail the way a missing source file does
    pub fn fail_program(&mut self, shader: &str) {
        self.failing = Some(shader.to_string());
    }
}

impl ProgramSource<MockBackend> for StaticPrograms {
    fn program(&mut self, _backend: &MockBackend, pipeline: &PipelineDesc) -> Result<CompiledProgram<MockProgram>> {
        self.requests += 1;
        if self.failing.as_deref() == Some(pipeline.shader_file_name.as_str()) {
            return Err(DenoiseError::configuration(Stage::InstanceCreation, format!("cannot load shader '{}'", pipeline.shader_file_name)));
        }
        let identity = self.identities.get(&pipeline.shader_file_name).copied().unwrap_or(1);
        Ok(CompiledProgram {
            identity: ProgramIdentity(identity),
            program: Arc::new(MockProgram {
                shader: pipeline.shader_file_name.clone(),
            }),
        })
    }
}

#[derive(Debug)]
pub struct ScriptedInstance {
    pub method: Method,
    pub desc: InstanceDesc,
    pub settings: Option<MethodSettings>,
    pub common: Option<CommonSettings>,
    allocator: Arc<dyn InstanceAllocator>,
    scratch: Option<BytesMut>,
}

/// Library returning fixed instance descriptions and dispatch lists per method
#[derive(Debug)]
pub struct ScriptedLibrary {
    desc: LibraryDesc,
    instances: HashMap<Method, InstanceDesc>,
    dispatches: RefCell<HashMap<Method, Vec<DispatchDesc>>>,
    pub fail_create: Cell<bool>,
    pub fail_dispatch: Cell<bool>,
    pub created: Cell<usize>,
    pub destroyed: Cell<usize>,
}

impl ScriptedLibrary {
    pub fn new(methods: Vec<(Method, InstanceDesc, Vec<DispatchDesc>)>) -> Self {
        let mut instances = HashMap::new();
        let mut dispatches = HashMap::new();
        for (method, instance, list) in methods {
            instances.insert(method, instance);
            dispatches.insert(method, list);
        }
        Self {
            desc: LibraryDesc {
                version_major: 4,
                version_minor: 0,
                version_build: 2,
                methods: instances.keys().copied().collect(),
                binding_offsets: BindingOffsets::default(),
            },
            instances,
            dispatches: RefCell::new(dispatches),
            fail_create: Cell::new(false),
            fail_dispatch: Cell::new(false),
            created: Cell::new(0),
            destroyed: Cell::new(0),
        }
    }

    /// Replaces the dispatch list returned for `method`
    pub fn set_dispatches(&self, method: Method, list: Vec<DispatchDesc>) {
        self.dispatches.borrow_mut().insert(method, list);
    }
}

impl FilteringLibrary for ScriptedLibrary {
    type Instance = ScriptedInstance;

    fn library_desc(&self) -> &LibraryDesc {
        &self.desc
    }

    fn create_instance(&self, desc: InstanceCreationDesc) -> std::result::Result<ScriptedInstance, LibraryError> {
        if self.fail_create.get() {
            return Err(LibraryError::InvalidArgument("scripted failure".into()));
        }
        let method = desc.method.method;
        let instance_desc = self.instances.get(&method).cloned().ok_or_else(|| LibraryError::Unsupported(method.to_string()))?;
        self.created.set(self.created.get() + 1);

        let scratch = desc.allocator.allocate(128);
        Ok(ScriptedInstance {
            method,
            desc: instance_desc,
            settings: None,
            common: None,
            allocator: desc.allocator,
            scratch: Some(scratch),
        })
    }

    fn instance_desc<'a>(&self, instance: &'a ScriptedInstance) -> &'a InstanceDesc {
        &instance.desc
    }

    fn set_method_settings(&self, instance: &mut ScriptedInstance, settings: &MethodSettings) -> std::result::Result<(), LibraryError> {
        if settings.method() != instance.method {
            return Err(LibraryError::InvalidArgument(format!("settings for {} given to {}", settings.method(), instance.method)));
        }
        instance.settings = Some(*settings);
        Ok(())
    }

    fn compute_dispatches(&self, instance: &mut ScriptedInstance, settings: &CommonSettings) -> std::result::Result<Vec<DispatchDesc>, LibraryError> {
        if self.fail_dispatch.get() {
            return Err(LibraryError::InvalidArgument("scripted failure".into()));
        }
        instance.common = Some(*settings);
        Ok(self.dispatches.borrow().get(&instance.method).cloned().unwrap_or_default())
    }

    fn destroy_instance(&self, mut instance: ScriptedInstance) {
        if let Some(scratch) = instance.scratch.take() {
            instance.allocator.free(scratch);
        }
        self.destroyed.set(self.destroyed.get() + 1);
    }
}

fn range(descriptor_type: DescriptorType, base_register_index: u32, descriptor_num: u32) -> DescriptorRangeDesc {
    DescriptorRangeDesc {
        descriptor_type,
        base_register_index,
        descriptor_num,
    }
}

fn read(resource_type: ResourceType, index_in_pool: u16) -> ResourceDesc {
    ResourceDesc {
        resource_type,
        state_needed: DescriptorType::Texture,
        index_in_pool,
        mip_offset: 0,
        mip_num: 1,
    }
}

fn write(resource_type: ResourceType, index_in_pool: u16) -> ResourceDesc {
    ResourceDesc {
        state_needed: DescriptorType::StorageTexture,
        ..read(resource_type, index_in_pool)
    }
}

fn pool_texture(format: Format, mip_num: u32) -> TextureDesc {
    TextureDesc {
        format,
        width: 64,
        height: 64,
        mip_num,
    }
}

/// Two pipelines with range counts [2, 3], two permanent and one transient pool texture
pub fn scenario_instance_desc() -> InstanceDesc {
    InstanceDesc {
        pipelines: vec![
            PipelineDesc {
                shader_file_name: "Temporal".into(),
                shader_entry_point_name: "main".into(),
                descriptor_ranges: vec![range(DescriptorType::Texture, 0, 4), range(DescriptorType::StorageTexture, 0, 1)],
            },
            PipelineDesc {
                shader_file_name: "Blur".into(),
                shader_entry_point_name: "main".into(),
                descriptor_ranges: vec![
                    range(DescriptorType::Texture, 0, 4),
                    range(DescriptorType::StorageTexture, 0, 2),
                    range(DescriptorType::Texture, 4, 1),
                ],
            },
        ],
        permanent_pool: vec![pool_texture(Format::Rgba16Sfloat, 1), pool_texture(Format::R32Sfloat, 1)],
        transient_pool: vec![pool_texture(Format::Rgba16Sfloat, 2)],
        static_samplers: vec![StaticSamplerDesc {
            sampler: StaticSampler::NearestClamp,
            register_index: 0,
        }],
        constant_buffer: ConstantBufferDesc {
            register_index: 0,
            max_data_size: 1024,
        },
    }
}

/// Dispatches consuming 5 and 7 resources against [`scenario_instance_desc`]
pub fn scenario_dispatches() -> Vec<DispatchDesc> {
    let mut mipped_transient = read(ResourceType::TransientPool, 0);
    mipped_transient.mip_num = 2;

    vec![
        DispatchDesc {
            name: "Temporal".into(),
            pipeline_index: 0,
            resources: vec![
                read(ResourceType::InViewz, 0),
                read(ResourceType::InNormalRoughness, 0),
                read(ResourceType::InMv, 0),
                read(ResourceType::PermanentPool, 0),
                write(ResourceType::TransientPool, 0),
            ],
            constant_buffer_data: Bytes::from_static(&[1; 40]),
            grid_width: 8,
            grid_height: 8,
        },
        DispatchDesc {
            name: "Blur".into(),
            pipeline_index: 1,
            resources: vec![
                read(ResourceType::InDiffRadianceHitdist, 0),
                mipped_transient,
                read(ResourceType::PermanentPool, 1),
                read(ResourceType::InSpecRadianceHitdist, 0),
                write(ResourceType::OutDiffRadianceHitdist, 0),
                write(ResourceType::PermanentPool, 0),
                read(ResourceType::InNormalRoughness, 0),
            ],
            constant_buffer_data: Bytes::from_static(&[2; 24]),
            grid_width: 16,
            grid_height: 4,
        },
    ]
}

/// A smaller method used as the runtime-toggle target
pub fn secondary_instance_desc() -> InstanceDesc {
    InstanceDesc {
        pipelines: vec![PipelineDesc {
            shader_file_name: "Reblur".into(),
            shader_entry_point_name: "main".into(),
            descriptor_ranges: vec![range(DescriptorType::Texture, 0, 1), range(DescriptorType::StorageTexture, 0, 1)],
        }],
        permanent_pool: vec![pool_texture(Format::Rgba16Sfloat, 1)],
        transient_pool: vec![pool_texture(Format::R16Sfloat, 1)],
        static_samplers: vec![],
        constant_buffer: ConstantBufferDesc {
            register_index: 0,
            max_data_size: 256,
        },
    }
}

pub fn secondary_dispatches() -> Vec<DispatchDesc> {
    vec![DispatchDesc {
        name: "Reblur".into(),
        pipeline_index: 0,
        resources: vec![read(ResourceType::PermanentPool, 0), write(ResourceType::OutSpecRadianceHitdist, 0)],
        constant_buffer_data: Bytes::from_static(&[3; 16]),
        grid_width: 4,
        grid_height: 4,
    }]
}

/// Library with the scenario method as ReLAX and the secondary method as ReBLUR
pub fn scenario_library() -> ScriptedLibrary {
    ScriptedLibrary::new(vec![
        (Method::RelaxDiffuseSpecular, scenario_instance_desc(), scenario_dispatches()),
        (Method::ReblurDiffuseSpecular, secondary_instance_desc(), secondary_dispatches()),
    ])
}
