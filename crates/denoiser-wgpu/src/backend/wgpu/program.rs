//! WGSL programs for the wgpu backend
//!
//! The library's descriptor ranges only say whether a binding is read-only or
//! read-write. Sample types and storage formats come from the WGSL itself,
//! reflected with naga when the program is loaded. A float texture is only
//! filterable when the entry point samples it; load-only textures accept
//! unfilterable formats such as `R32Float`.

use super::WgpuBackend;
use crate::backend::{CompiledProgram, ProgramIdentity, ProgramSource};
use crate::error::{DenoiseError, Result, Stage};
use crate::library::PipelineDesc;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io;
use std::sync::Arc;

/// What a program declares at one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingReflection {
    Sampler,
    Uniform,
    Sampled { sample_type: wgpu::TextureSampleType },
    Storage { format: wgpu::TextureFormat, access: wgpu::StorageTextureAccess },
}

/// Resource bindings declared by a shader module, keyed by `(group, binding)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReflection {
    bindings: HashMap<(u32, u32), BindingReflection>,
    /// `(image, sampler)` binding pairs the entry point samples with
    sampling: Vec<((u32, u32), (u32, u32))>,
}

impl ProgramReflection {
    /// Collects every bound global of `module` as seen by one entry point
    ///
    /// Images with a storage format wgpu cannot express are left out.
    ///
    /// # Arguments
    /// * `module` - The parsed module
    /// * `entry` - Validation info of the entry point the pipeline uses
    pub fn from_module(module: &naga::Module, entry: &naga::valid::FunctionInfo) -> Self {
        let binding_of = |handle: naga::Handle<naga::GlobalVariable>| module.global_variables[handle].binding.as_ref().map(|binding| (binding.group, binding.binding));
        let mut sampling: Vec<_> = entry
            .sampling_set
            .iter()
            .filter_map(|key| Some((binding_of(key.image)?, binding_of(key.sampler)?)))
            .collect();
        sampling.sort_unstable();

        let mut bindings = HashMap::new();

        for (_, variable) in module.global_variables.iter() {
            let Some(binding) = &variable.binding else {
                continue;
            };

            let key = (binding.group, binding.binding);
            let reflection = match &module.types[variable.ty].inner {
                naga::TypeInner::Sampler { .. } => BindingReflection::Sampler,
                naga::TypeInner::Image { class, .. } => match *class {
                    naga::ImageClass::Sampled { kind, .. } => {
                        let sample_type = match kind {
                            naga::ScalarKind::Float => wgpu::TextureSampleType::Float {
                                filterable: sampling.iter().any(|(image, _)| *image == key),
                            },
                            naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                            naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                            _ => continue,
                        };
                        BindingReflection::Sampled { sample_type }
                    }
                    naga::ImageClass::Depth { .. } => BindingReflection::Sampled {
                        sample_type: wgpu::TextureSampleType::Depth,
                    },
                    naga::ImageClass::Storage { format, access } => {
                        let Some(format) = storage_format(format) else {
                            continue;
                        };
                        BindingReflection::Storage {
                            format,
                            access: storage_access(access),
                        }
                    }
                    #[allow(unreachable_patterns)]
                    _ => continue,
                },
                _ if variable.space == naga::AddressSpace::Uniform => BindingReflection::Uniform,
                _ => continue,
            };

            bindings.insert(key, reflection);
        }

        Self { bindings, sampling }
    }

    pub fn get(&self, group: u32, binding: u32) -> Option<BindingReflection> {
        self.bindings.get(&(group, binding)).copied()
    }

    /// Sampler bindings the image at `(group, binding)` is sampled with
    pub fn samplers_of(&self, group: u32, binding: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.sampling.iter().filter(move |(image, _)| *image == (group, binding)).map(|(_, sampler)| *sampler)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

fn storage_access(access: naga::StorageAccess) -> wgpu::StorageTextureAccess {
    let load = access.contains(naga::StorageAccess::LOAD);
    let store = access.contains(naga::StorageAccess::STORE);
    match (load, store) {
        (true, true) => wgpu::StorageTextureAccess::ReadWrite,
        (true, false) => wgpu::StorageTextureAccess::ReadOnly,
        _ => wgpu::StorageTextureAccess::WriteOnly,
    }
}

fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    use naga::StorageFormat as S;
    use wgpu::TextureFormat as T;

    Some(match format {
        S::R8Unorm => T::R8Unorm,
        S::R8Snorm => T::R8Snorm,
        S::R8Uint => T::R8Uint,
        S::R8Sint => T::R8Sint,
        S::R16Uint => T::R16Uint,
        S::R16Sint => T::R16Sint,
        S::R16Float => T::R16Float,
        S::Rg8Unorm => T::Rg8Unorm,
        S::Rg8Snorm => T::Rg8Snorm,
        S::Rg8Uint => T::Rg8Uint,
        S::Rg8Sint => T::Rg8Sint,
        S::R32Uint => T::R32Uint,
        S::R32Sint => T::R32Sint,
        S::R32Float => T::R32Float,
        S::Rg16Uint => T::Rg16Uint,
        S::Rg16Sint => T::Rg16Sint,
        S::Rg16Float => T::Rg16Float,
        S::Rgba8Unorm => T::Rgba8Unorm,
        S::Rgba8Snorm => T::Rgba8Snorm,
        S::Rgba8Uint => T::Rgba8Uint,
        S::Rgba8Sint => T::Rgba8Sint,
        S::Bgra8Unorm => T::Bgra8Unorm,
        S::Rgb10a2Uint => T::Rgb10a2Uint,
        S::Rgb10a2Unorm => T::Rgb10a2Unorm,
        S::Rg32Uint => T::Rg32Uint,
        S::Rg32Sint => T::Rg32Sint,
        S::Rg32Float => T::Rg32Float,
        S::Rgba16Uint => T::Rgba16Uint,
        S::Rgba16Sint => T::Rgba16Sint,
        S::Rgba16Float => T::Rgba16Float,
        S::Rgba32Uint => T::Rgba32Uint,
        S::Rgba32Sint => T::Rgba32Sint,
        S::Rgba32Float => T::Rgba32Float,
        S::R16Unorm => T::R16Unorm,
        S::R16Snorm => T::R16Snorm,
        S::Rg16Unorm => T::Rg16Unorm,
        S::Rg16Snorm => T::Rg16Snorm,
        S::Rgba16Unorm => T::Rgba16Unorm,
        S::Rgba16Snorm => T::Rgba16Snorm,
        _ => return None,
    })
}

/// Identity of a program: its source text and entry point
pub fn program_identity(source: &str, entry_point: &str) -> ProgramIdentity {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    entry_point.hash(&mut hasher);
    ProgramIdentity(hasher.finish())
}

/// Parses and validates WGSL and checks that `entry_point` is a compute entry point
///
/// # Returns
/// The bindings of the module as reflected for `entry_point`
pub fn parse_program(name: &str, source: &str, entry_point: &str) -> Result<ProgramReflection> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| DenoiseError::configuration(Stage::InstanceCreation, format!("{name}: {}", err.emit_to_string(source))))?;

    let Some(index) = module.entry_points.iter().position(|entry| entry.name == entry_point && entry.stage == naga::ShaderStage::Compute) else {
        return Err(DenoiseError::configuration(Stage::InstanceCreation, format!("{name} has no compute entry point '{entry_point}'")));
    };

    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|err| DenoiseError::configuration(Stage::InstanceCreation, format!("{name}: {}", err.into_inner())))?;

    Ok(ProgramReflection::from_module(&module, info.get_entry_point(index)))
}

/// A compiled WGSL compute program
#[derive(Debug)]
pub struct WgslProgram {
    pub(crate) module: wgpu::ShaderModule,
    pub(crate) entry_point: String,
    pub(crate) reflection: ProgramReflection,
}

impl WgslProgram {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn reflection(&self) -> &ProgramReflection {
        &self.reflection
    }
}

struct CachedProgram {
    compiled: CompiledProgram<WgslProgram>,
    stale: bool,
}

/// Program source loading WGSL by shader file name
///
/// Programs are cached by shader file and entry point. After [`reload`],
/// sources are read again on the next request; a source that did not change
/// keeps its identity and its module.
///
/// [`reload`]: WgslProgramLibrary::reload
pub struct WgslProgramLibrary<F> {
    loader: F,
    cache: HashMap<(String, String), CachedProgram>,
}

impl<F> WgslProgramLibrary<F>
where
    F: FnMut(&str) -> io::Result<String>,
{
    /// # Arguments
    /// * `loader` - Returns the WGSL source for a shader file name
    pub fn new(loader: F) -> Self {
        Self { loader, cache: HashMap::new() }
    }

    /// Marks every cached program for re-reading at its next request
    pub fn reload(&mut self) {
        tracing::debug!(programs = self.cache.len(), "Reloading WGSL programs");
        for cached in self.cache.values_mut() {
            cached.stale = true;
        }
    }

    fn load(&mut self, backend: &WgpuBackend, pipeline: &PipelineDesc) -> Result<CompiledProgram<WgslProgram>> {
        let name = pipeline.shader_file_name.as_str();
        let entry_point = pipeline.shader_entry_point_name.as_str();
        let key = (name.to_string(), entry_point.to_string());

        let source = (self.loader)(name).map_err(|err| DenoiseError::configuration(Stage::InstanceCreation, format!("cannot load shader '{name}': {err}")))?;
        let identity = program_identity(&source, entry_point);

        if let Some(cached) = self.cache.get_mut(&key) {
            if cached.compiled.identity == identity {
                cached.stale = false;
                return Ok(cached.compiled.clone());
            }
        }

        let reflection = parse_program(name, &source, entry_point)?;
        let module = backend.device().create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        tracing::debug!(shader = %name, entry_point = %entry_point, %identity, bindings = reflection.len(), "Compiled WGSL program");

        let compiled = CompiledProgram {
            identity,
            program: Arc::new(WgslProgram {
                module,
                entry_point: entry_point.to_string(),
                reflection,
            }),
        };
        self.cache.insert(key, CachedProgram { compiled: compiled.clone(), stale: false });
        Ok(compiled)
    }
}

impl<F> ProgramSource<WgpuBackend> for WgslProgramLibrary<F>
where
    F: FnMut(&str) -> io::Result<String>,
{
    fn program(&mut self, backend: &WgpuBackend, pipeline: &PipelineDesc) -> Result<CompiledProgram<WgslProgram>> {
        let key = (pipeline.shader_file_name.clone(), pipeline.shader_entry_point_name.clone());
        match self.cache.get(&key) {
            Some(cached) if !cached.stale => Ok(cached.compiled.clone()),
            _ => self.load(backend, pipeline),
        }
    }
}
