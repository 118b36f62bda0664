//! Interface to the external filtering library
//!
//! The library describes its work declaratively and never sees the concrete
//! backend. This module holds the trait the binding layer drives and the data
//! types that cross the boundary.

mod allocator;
mod desc;
mod settings;

use std::sync::Arc;

pub use allocator::{InstanceAllocator, SystemAllocator};
pub use desc::{
    BindingOffsets, ConstantBufferDesc, DescriptorRangeDesc, DescriptorType, DispatchDesc, Format, InstanceDesc, LibraryDesc, LibraryError, Method, MethodDesc, PipelineDesc, ResourceDesc,
    ResourceType, StaticSampler, StaticSamplerDesc, TextureDesc,
};
pub use settings::{CommonSettings, HitDistanceParameters, MethodSettings, ReblurSettings, RelaxDiffuseSettings, RelaxDiffuseSpecularSettings};

/// Parameters for creating a library instance
#[derive(Debug, Clone)]
pub struct InstanceCreationDesc {
    pub method: MethodDesc,
    /// Host memory for the instance, dropped together with it
    pub allocator: Arc<dyn InstanceAllocator>,
}

/// A filtering library that produces a dispatch graph each frame
pub trait FilteringLibrary {
    /// Library-side state for one method at one resolution
    type Instance;

    /// Capability and version metadata
    fn library_desc(&self) -> &LibraryDesc;

    /// Creates an instance for a single method
    fn create_instance(&self, desc: InstanceCreationDesc) -> Result<Self::Instance, LibraryError>;

    /// Pipelines, pools and samplers declared by `instance`
    fn instance_desc<'a>(&self, instance: &'a Self::Instance) -> &'a InstanceDesc;

    /// Replaces the tuning values of the instance's method
    fn set_method_settings(&self, instance: &mut Self::Instance, settings: &MethodSettings) -> Result<(), LibraryError>;

    /// Computes the ordered dispatch list for the current frame
    fn compute_dispatches(&self, instance: &mut Self::Instance, settings: &CommonSettings) -> Result<Vec<DispatchDesc>, LibraryError>;

    /// Destroys `instance` and releases everything it allocated
    fn destroy_instance(&self, instance: Self::Instance);
}

/// A library shared between several passes
impl<L: FilteringLibrary + ?Sized> FilteringLibrary for Arc<L> {
    type Instance = L::Instance;

    fn library_desc(&self) -> &LibraryDesc {
        (**self).library_desc()
    }

    fn create_instance(&self, desc: InstanceCreationDesc) -> Result<Self::Instance, LibraryError> {
        (**self).create_instance(desc)
    }

    fn instance_desc<'a>(&self, instance: &'a Self::Instance) -> &'a InstanceDesc {
        (**self).instance_desc(instance)
    }

    fn set_method_settings(&self, instance: &mut Self::Instance, settings: &MethodSettings) -> Result<(), LibraryError> {
        (**self).set_method_settings(instance, settings)
    }

    fn compute_dispatches(&self, instance: &mut Self::Instance, settings: &CommonSettings) -> Result<Vec<DispatchDesc>, LibraryError> {
        (**self).compute_dispatches(instance, settings)
    }

    fn destroy_instance(&self, instance: Self::Instance) {
        (**self).destroy_instance(instance)
    }
}
