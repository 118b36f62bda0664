//! Manifest-driven filtering library
//!
//! This crate implements the filtering-library interface from a YAML
//! manifest. Each method declares its pipelines, texture pools and dispatch
//! schedule; instances resolve them at a resolution and replay the schedule
//! every frame with freshly packed constants. The bundled reference manifest
//! covers every method.

mod instance;
pub mod manifest;

pub use instance::{ConstantBlock, METHOD_PARAMETER_COUNT, ManifestInstance, default_method_settings};
pub use manifest::{LibraryManifest, ManifestError, ManifestValidationError, ScaleFactor};

use denoiser_wgpu::library::{CommonSettings, DispatchDesc, FilteringLibrary, InstanceCreationDesc, InstanceDesc, LibraryDesc, LibraryError, MethodSettings};

/// The reference manifest shipped with the crate
pub const REFERENCE_MANIFEST: &str = include_str!("../manifests/reference.yaml");

/// A filtering library backed by a validated manifest
#[derive(Debug, Clone)]
pub struct ManifestLibrary {
    desc: LibraryDesc,
    manifest: LibraryManifest,
}

impl ManifestLibrary {
    /// Validates `manifest` and wraps it as a library
    pub fn new(manifest: LibraryManifest) -> Result<Self, ManifestValidationError> {
        manifest.validate(ConstantBlock::SIZE)?;

        let desc = LibraryDesc {
            version_major: manifest.version.major,
            version_minor: manifest.version.minor,
            version_build: manifest.version.build,
            methods: manifest.methods.iter().map(|method| method.method).collect(),
            binding_offsets: manifest.binding_offsets,
        };

        Ok(Self { desc, manifest })
    }

    /// Parses and validates a library from YAML content
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the manifest
    pub fn from_yaml(yaml_content: &str) -> Result<Self, ManifestError> {
        Ok(Self::new(LibraryManifest::from_yaml(yaml_content)?)?)
    }

    /// Parses and validates a library from a YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ManifestError> {
        Ok(Self::new(LibraryManifest::from_file(path)?)?)
    }

    /// Loads the bundled reference manifest
    pub fn reference() -> Result<Self, ManifestError> {
        Self::from_yaml(REFERENCE_MANIFEST)
    }

    pub fn manifest(&self) -> &LibraryManifest {
        &self.manifest
    }
}

impl FilteringLibrary for ManifestLibrary {
    type Instance = ManifestInstance;

    fn library_desc(&self) -> &LibraryDesc {
        &self.desc
    }

    fn create_instance(&self, desc: InstanceCreationDesc) -> Result<ManifestInstance, LibraryError> {
        let Some(manifest) = self.manifest.method(desc.method.method) else {
            return Err(LibraryError::Unsupported(format!("method {} is not declared by this library", desc.method.method)));
        };

        let instance = ManifestInstance::new(
            manifest,
            u32::from(desc.method.full_resolution_width),
            u32::from(desc.method.full_resolution_height),
            desc.allocator,
        )?;
        tracing::debug!(
            method = %desc.method.method,
            width = desc.method.full_resolution_width,
            height = desc.method.full_resolution_height,
            permanent = instance.desc().permanent_pool.len(),
            transient = instance.desc().transient_pool.len(),
            "Created manifest instance"
        );
        Ok(instance)
    }

    fn instance_desc<'a>(&self, instance: &'a ManifestInstance) -> &'a InstanceDesc {
        instance.desc()
    }

    fn set_method_settings(&self, instance: &mut ManifestInstance, settings: &MethodSettings) -> Result<(), LibraryError> {
        instance.set_settings(settings)
    }

    fn compute_dispatches(&self, instance: &mut ManifestInstance, settings: &CommonSettings) -> Result<Vec<DispatchDesc>, LibraryError> {
        instance.dispatches(settings)
    }

    fn destroy_instance(&self, instance: ManifestInstance) {
        drop(instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use denoiser_wgpu::library::{Format, Method, MethodDesc, ReblurSettings, RelaxDiffuseSettings, ResourceType, SystemAllocator};
    use std::sync::Arc;

    fn create(library: &ManifestLibrary, method: Method, allocator: &Arc<SystemAllocator>) -> Result<ManifestInstance, LibraryError> {
        library.create_instance(InstanceCreationDesc {
            method: MethodDesc {
                method,
                full_resolution_width: 1920,
                full_resolution_height: 1080,
            },
            allocator: allocator.clone(),
        })
    }

    #[test]
    fn test_reference_manifest_declares_every_method() {
        let library = ManifestLibrary::reference().unwrap();
        let desc = library.library_desc();

        assert_eq!(desc.version(), "4.4.0");
        for method in [
            Method::RelaxDiffuseSpecular,
            Method::RelaxDiffuse,
            Method::ReblurDiffuseSpecular,
            Method::SpecularReflectionMv,
            Method::SpecularDeltaMv,
        ] {
            assert!(desc.supports(method), "{method} missing");
        }
    }

    #[test]
    fn test_constant_block_fits_uniform_layout() {
        assert_eq!(ConstantBlock::SIZE % 16, 0);
        assert_eq!(ConstantBlock::SIZE, 352);
    }

    #[test]
    fn test_instance_resolves_pools_at_resolution() {
        let library = ManifestLibrary::reference().unwrap();
        let allocator = Arc::new(SystemAllocator::new());
        let instance = create(&library, Method::RelaxDiffuseSpecular, &allocator).unwrap();
        let desc = library.instance_desc(&instance);

        assert_eq!(desc.pipelines.len(), 4);
        assert_eq!(desc.pipelines[1].shader_file_name, "Relax_TemporalAccumulation");
        assert_eq!(desc.pipelines[1].descriptor_count(), 9);
        assert_eq!(desc.permanent_pool.len(), 2);
        assert_eq!(desc.transient_pool[0].format, Format::R32Uint);
        assert_eq!((desc.transient_pool[0].width, desc.transient_pool[0].height), (120, 68));
        assert_eq!((desc.transient_pool[1].width, desc.transient_pool[1].height), (1920, 1080));
        assert_eq!(desc.static_samplers.len(), 2);
        assert_eq!(allocator.outstanding_bytes(), ConstantBlock::SIZE * 4);

        library.destroy_instance(instance);
        assert_eq!(allocator.outstanding_bytes(), 0);
    }

    #[test]
    fn test_compute_dispatches_packs_constants() {
        let library = ManifestLibrary::reference().unwrap();
        let allocator = Arc::new(SystemAllocator::new());
        let mut instance = create(&library, Method::ReblurDiffuseSpecular, &allocator).unwrap();

        let settings = CommonSettings {
            frame_index: 7,
            resolution: [1920, 1080],
            is_motion_vector_in_world_space: true,
            ..CommonSettings::default()
        };
        let dispatches = library.compute_dispatches(&mut instance, &settings).unwrap();

        assert_eq!(dispatches.len(), 4);
        assert_eq!(dispatches[1].name, "HistoryMips");
        assert_eq!((dispatches[1].grid_width, dispatches[1].grid_height), (60, 34));
        assert_eq!((dispatches[2].grid_width, dispatches[2].grid_height), (240, 135));
        assert_eq!(dispatches[2].resources[4].resource_type, ResourceType::PermanentPool);
        assert_eq!(dispatches[2].resources[4].mip_num, 4);

        for (index, dispatch) in dispatches.iter().enumerate() {
            assert_eq!(dispatch.constant_buffer_data.len(), ConstantBlock::SIZE);
            let block: ConstantBlock = bytemuck::pod_read_unaligned(&dispatch.constant_buffer_data);
            assert_eq!(block.dispatch_index, index as u32);
            assert_eq!(block.frame_index, 7);
            assert_eq!(block.motion_in_world_space, 1);
            assert_eq!(block.resolution, [1920, 1080]);
            assert_eq!(block.method_parameters[0], ReblurSettings::default().hit_distance_parameters.a);
        }
    }

    #[test]
    fn test_method_settings_are_applied() {
        let library = ManifestLibrary::reference().unwrap();
        let allocator = Arc::new(SystemAllocator::new());
        let mut instance = create(&library, Method::RelaxDiffuse, &allocator).unwrap();

        let tuned = RelaxDiffuseSettings {
            prepass_blur_radius: 4.0,
            ..RelaxDiffuseSettings::default()
        };
        library.set_method_settings(&mut instance, &MethodSettings::RelaxDiffuse(tuned)).unwrap();

        let dispatches = library.compute_dispatches(&mut instance, &CommonSettings::default()).unwrap();
        let block: ConstantBlock = bytemuck::pod_read_unaligned(&dispatches[0].constant_buffer_data);
        assert_eq!(block.method_parameters[0], 4.0);
        assert_eq!(block.method_id, 1);

        let err = library.set_method_settings(&mut instance, &MethodSettings::SpecularDeltaMv).unwrap_err();
        assert!(matches!(err, LibraryError::InvalidArgument(_)));
    }

    #[test]
    fn test_undeclared_method_is_unsupported() {
        let yaml = REFERENCE_MANIFEST.split("\n  - method: RELAX_DIFFUSE\n").next().unwrap();
        let library = ManifestLibrary::from_yaml(yaml).unwrap();
        assert!(!library.library_desc().supports(Method::RelaxDiffuse));

        let allocator = Arc::new(SystemAllocator::new());
        let err = create(&library, Method::RelaxDiffuse, &allocator).unwrap_err();
        assert!(matches!(err, LibraryError::Unsupported(_)));
        assert_eq!(allocator.outstanding_bytes(), 0);
    }

    #[test]
    fn test_small_constant_buffer_is_rejected() {
        let yaml = REFERENCE_MANIFEST.replacen("max_data_size: 512", "max_data_size: 64", 1);
        let err = ManifestLibrary::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ManifestError::Validation(ManifestValidationError::ConstantBufferTooSmall { max: 64, .. })));
    }
}
