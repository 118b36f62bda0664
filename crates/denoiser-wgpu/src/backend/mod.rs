//! Backend seam
//!
//! The binding layer talks to the graphics API only through [`Backend`]. The
//! trait is shaped around what the dispatch graph needs: pool textures and
//! static samplers, one pipeline-state object per library pipeline, upload
//! memory for constants, single-mip state transitions, and compute dispatches
//! against a fully populated [`BindingSet`]. Two fixed-function helpers sit
//! next to those: the radiance prepass and the disabled-pass blit.

pub mod wgpu;

use crate::error::Result;
use crate::layout::{BindingSet, BindingSetLayout, ConstantView};
use crate::library::PipelineDesc;
use crate::method::RadiancePacking;
use std::fmt;
use std::sync::Arc;

/// Access state a texture subresource must be in before it is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Read-only sampled access
    ShaderResource,
    /// Read-write storage access
    UnorderedAccess,
}

/// Parameters for a pool texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSpec<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: ::wgpu::TextureFormat,
    pub mip_level_count: u32,
}

/// Parameters for a static sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerSpec {
    pub address_mode: ::wgpu::AddressMode,
    /// Minification and magnification filter
    pub filter: ::wgpu::FilterMode,
    pub mipmap_filter: ::wgpu::FilterMode,
}

impl SamplerSpec {
    /// True when any filter interpolates between texels
    pub fn is_filtering(&self) -> bool {
        self.filter == ::wgpu::FilterMode::Linear || self.mipmap_filter == ::wgpu::FilterMode::Linear
    }
}

/// A static sampler together with the binding it occupies
pub struct PoolSampler<'a, B: Backend> {
    pub binding: u32,
    pub sampler: &'a B::Sampler,
    /// Whether the sampler interpolates, see [`SamplerSpec::is_filtering`]
    pub filtering: bool,
}

/// Everything needed to build a pipeline-state object
pub struct PipelineStateDesc<'a, B: Backend> {
    pub label: &'a str,
    pub program: &'a B::Program,
    pub layout: &'a BindingSetLayout,
    pub samplers: &'a [PoolSampler<'a, B>],
}

/// A host channel and the pass-owned texture its packed form is written to
pub struct PackTarget<'a, T> {
    pub source: &'a T,
    pub packed: &'a T,
}

/// Inputs and outputs of one radiance prepass
///
/// `specular` is present exactly when the packing has a specular signal, and
/// the guides exactly when it normalizes hit distances.
pub struct PackRadianceDesc<'a, B: Backend> {
    pub packing: RadiancePacking,
    pub constants: ConstantView<'a, B::ConstantBuffer>,
    pub diffuse: PackTarget<'a, B::Texture>,
    pub specular: Option<PackTarget<'a, B::Texture>>,
    pub view_z: Option<&'a B::Texture>,
    pub normal_roughness: Option<&'a B::Texture>,
}

/// Value identifying one compiled version of a pipeline's program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramIdentity(pub u64);

impl fmt::Display for ProgramIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A compiled program tagged with its identity
#[derive(Debug)]
pub struct CompiledProgram<P> {
    pub identity: ProgramIdentity,
    pub program: Arc<P>,
}

impl<P> Clone for CompiledProgram<P> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            program: Arc::clone(&self.program),
        }
    }
}

/// A graphics backend capable of executing the library's dispatch graph
pub trait Backend: Sized {
    type Texture: Clone + fmt::Debug;
    type Sampler: fmt::Debug;
    type Program: fmt::Debug;
    type PipelineState: fmt::Debug;
    type ConstantBuffer: fmt::Debug;
    type Encoder;

    /// Required alignment of constant-buffer binding offsets
    fn constant_alignment(&self) -> u64;

    /// Creates a 2D texture with sampled and storage access
    fn create_texture(&self, spec: &TextureSpec<'_>) -> Result<Self::Texture>;

    /// Destroys a texture created by `create_texture`
    fn destroy_texture(&self, texture: Self::Texture);

    /// Number of mip levels of `texture`
    fn mip_level_count(&self, texture: &Self::Texture) -> u32;

    fn create_sampler(&self, spec: &SamplerSpec) -> Result<Self::Sampler>;

    /// Creates host-writable memory readable as constants
    fn create_constant_buffer(&self, size: u64) -> Result<Self::ConstantBuffer>;

    /// Writes `data` at `offset`; the write is visible to work recorded afterwards
    fn write_constants(&self, buffer: &Self::ConstantBuffer, offset: u64, data: &[u8]);

    /// Builds a pipeline-state object for a program and binding-set layout
    fn create_pipeline_state(&self, desc: &PipelineStateDesc<'_, Self>) -> Result<Self::PipelineState>;

    /// Records a state transition for a single mip of `texture`
    fn transition(&self, encoder: &mut Self::Encoder, texture: &Self::Texture, mip: u32, state: ResourceState);

    /// Records a compute dispatch with a complete binding set
    fn dispatch(&self, encoder: &mut Self::Encoder, pipeline: &Self::PipelineState, bindings: &BindingSet<'_, Self>, grid: (u32, u32)) -> Result<()>;

    /// Records the radiance prepass over the packed targets
    fn pack_radiance(&self, encoder: &mut Self::Encoder, desc: &PackRadianceDesc<'_, Self>) -> Result<()>;

    /// Records a copy of `source` into all of `destination`
    ///
    /// The source is resampled to the destination's extent and converted to its format.
    fn blit_texture(&self, encoder: &mut Self::Encoder, source: &Self::Texture, destination: &Self::Texture) -> Result<()>;

    /// Records a clear of every subresource of `texture` to zero
    fn clear_texture(&self, encoder: &mut Self::Encoder, texture: &Self::Texture);
}

/// Supplies compiled programs for library pipelines
///
/// Implementations may cache; a program whose source is unchanged must keep
/// its identity so cached pipeline states stay valid.
pub trait ProgramSource<B: Backend> {
    fn program(&mut self, backend: &B, pipeline: &PipelineDesc) -> Result<CompiledProgram<B::Program>>;
}
