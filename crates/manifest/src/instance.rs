//! Manifest-driven library instances
//!
//! An instance resolves its method's manifest at one resolution and replays
//! the dispatch schedule every frame. Each dispatch receives the same
//! constant block apart from its dispatch index.

use crate::manifest::MethodManifest;
use bytemuck::{Pod, Zeroable};
use bytes::{Bytes, BytesMut};
use denoiser_wgpu::library::{CommonSettings, DispatchDesc, InstanceAllocator, InstanceDesc, LibraryError, Method, MethodSettings, PipelineDesc};
use std::sync::Arc;

/// Number of method tuning values carried in the constant block
pub const METHOD_PARAMETER_COUNT: usize = 12;

/// Constants uploaded for every dispatch
///
/// Matrices are column-major, as handed over in [`CommonSettings`]. The
/// layout is a multiple of 16 bytes so it can back a WGSL uniform directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ConstantBlock {
    pub view_to_clip: [f32; 16],
    pub view_to_clip_prev: [f32; 16],
    pub world_to_view: [f32; 16],
    pub world_to_view_prev: [f32; 16],
    pub camera_jitter: [f32; 2],
    pub motion_vector_scale: [f32; 2],
    pub resolution: [u32; 2],
    pub denoising_range: f32,
    pub disocclusion_threshold: f32,
    pub frame_index: u32,
    pub motion_in_world_space: u32,
    pub dispatch_index: u32,
    pub method_id: u32,
    pub method_parameters: [f32; METHOD_PARAMETER_COUNT],
}

impl ConstantBlock {
    /// Size of the block in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    fn new(common: &CommonSettings, method: &MethodSettings) -> Self {
        Self {
            view_to_clip: common.view_to_clip_matrix,
            view_to_clip_prev: common.view_to_clip_matrix_prev,
            world_to_view: common.world_to_view_matrix,
            world_to_view_prev: common.world_to_view_matrix_prev,
            camera_jitter: common.camera_jitter,
            motion_vector_scale: common.motion_vector_scale,
            resolution: common.resolution,
            denoising_range: common.denoising_range,
            disocclusion_threshold: common.disocclusion_threshold,
            frame_index: common.frame_index,
            motion_in_world_space: u32::from(common.is_motion_vector_in_world_space),
            dispatch_index: 0,
            method_id: method_id(method.method()),
            method_parameters: method_parameters(method),
        }
    }
}

fn method_id(method: Method) -> u32 {
    match method {
        Method::RelaxDiffuseSpecular => 0,
        Method::RelaxDiffuse => 1,
        Method::ReblurDiffuseSpecular => 2,
        Method::SpecularReflectionMv => 3,
        Method::SpecularDeltaMv => 4,
    }
}

/// Tuning values the shaders read, padded with zeros
fn method_parameters(settings: &MethodSettings) -> [f32; METHOD_PARAMETER_COUNT] {
    let values: Vec<f32> = match settings {
        MethodSettings::RelaxDiffuseSpecular(s) => vec![
            s.diffuse_prepass_blur_radius,
            s.specular_prepass_blur_radius,
            s.diffuse_max_accumulated_frame_num as f32,
            s.specular_max_accumulated_frame_num as f32,
            s.diffuse_phi_luminance,
            s.specular_phi_luminance,
            s.diffuse_lobe_angle_fraction,
            s.specular_lobe_angle_fraction,
            s.roughness_fraction,
            s.depth_threshold,
            s.atrous_iteration_num as f32,
            s.min_luminance_weight,
        ],
        MethodSettings::RelaxDiffuse(s) => vec![
            s.prepass_blur_radius,
            s.diffuse_max_accumulated_frame_num as f32,
            s.diffuse_max_fast_accumulated_frame_num as f32,
            s.diffuse_phi_luminance,
            s.diffuse_lobe_angle_fraction,
            s.history_fix_edge_stopping_normal_power,
            s.history_fix_max_radius,
            s.history_fix_frame_num as f32,
            s.history_clamping_color_box_sigma_scale,
            s.depth_threshold,
            s.atrous_iteration_num as f32,
            s.min_luminance_weight,
        ],
        MethodSettings::ReblurDiffuseSpecular(s) => vec![
            s.hit_distance_parameters.a,
            s.hit_distance_parameters.b,
            s.hit_distance_parameters.c,
            s.hit_distance_parameters.d,
            s.max_accumulated_frame_num as f32,
            s.max_fast_accumulated_frame_num as f32,
            s.history_fix_frame_num as f32,
            s.diffuse_prepass_blur_radius,
            s.specular_prepass_blur_radius,
            s.min_blur_radius,
            s.max_blur_radius,
            s.plane_distance_sensitivity,
        ],
        MethodSettings::SpecularReflectionMv | MethodSettings::SpecularDeltaMv => Vec::new(),
    };

    let mut parameters = [0.0; METHOD_PARAMETER_COUNT];
    for (slot, value) in parameters.iter_mut().zip(values) {
        *slot = value;
    }
    parameters
}

/// Settings a freshly created instance starts with
pub fn default_method_settings(method: Method) -> MethodSettings {
    match method {
        Method::RelaxDiffuseSpecular => MethodSettings::RelaxDiffuseSpecular(Default::default()),
        Method::RelaxDiffuse => MethodSettings::RelaxDiffuse(Default::default()),
        Method::ReblurDiffuseSpecular => MethodSettings::ReblurDiffuseSpecular(Default::default()),
        Method::SpecularReflectionMv => MethodSettings::SpecularReflectionMv,
        Method::SpecularDeltaMv => MethodSettings::SpecularDeltaMv,
    }
}

/// A method manifest resolved at one resolution
#[derive(Debug)]
pub struct ManifestInstance {
    manifest: MethodManifest,
    desc: InstanceDesc,
    width: u32,
    height: u32,
    settings: MethodSettings,
    allocator: Arc<dyn InstanceAllocator>,
    /// Per-frame constant staging, sized to one block per dispatch
    staging: Option<BytesMut>,
}

impl ManifestInstance {
    /// Resolves `manifest` at `width` x `height`
    ///
    /// # Arguments
    /// * `manifest` - The method's validated manifest
    /// * `allocator` - Host memory for the instance's constant staging
    pub fn new(manifest: &MethodManifest, width: u32, height: u32, allocator: Arc<dyn InstanceAllocator>) -> Result<Self, LibraryError> {
        if width == 0 || height == 0 {
            return Err(LibraryError::InvalidArgument(format!("{}: resolution {width}x{height} is empty", manifest.method)));
        }

        let desc = InstanceDesc {
            pipelines: manifest
                .pipelines
                .iter()
                .map(|pipeline| PipelineDesc {
                    shader_file_name: pipeline.shader.clone(),
                    shader_entry_point_name: pipeline.entry_point.clone(),
                    descriptor_ranges: pipeline.ranges.clone(),
                })
                .collect(),
            permanent_pool: manifest.permanent_pool.iter().map(|texture| texture.resolve(width, height)).collect(),
            transient_pool: manifest.transient_pool.iter().map(|texture| texture.resolve(width, height)).collect(),
            static_samplers: manifest.static_samplers.clone(),
            constant_buffer: manifest.constant_buffer,
        };

        let staging = allocator.allocate(ConstantBlock::SIZE * manifest.dispatches.len());

        Ok(Self {
            manifest: manifest.clone(),
            desc,
            width,
            height,
            settings: default_method_settings(manifest.method),
            allocator,
            staging: Some(staging),
        })
    }

    pub fn desc(&self) -> &InstanceDesc {
        &self.desc
    }

    pub fn method(&self) -> Method {
        self.manifest.method
    }

    pub fn settings(&self) -> &MethodSettings {
        &self.settings
    }

    /// Replaces the method settings; the variant must match the instance's method
    pub fn set_settings(&mut self, settings: &MethodSettings) -> Result<(), LibraryError> {
        if settings.method() != self.manifest.method {
            return Err(LibraryError::InvalidArgument(format!("{} settings passed to a {} instance", settings.method(), self.manifest.method)));
        }
        self.settings = *settings;
        Ok(())
    }

    /// Produces this frame's dispatch list
    pub fn dispatches(&mut self, common: &CommonSettings) -> Result<Vec<DispatchDesc>, LibraryError> {
        let Some(staging) = self.staging.take() else {
            return Err(LibraryError::InvalidArgument(format!("{} instance has no constant staging", self.manifest.method)));
        };

        let required = ConstantBlock::SIZE * self.manifest.dispatches.len();
        let mut staging = if staging.len() == required { staging } else { self.allocator.reallocate(staging, required) };

        let mut block = ConstantBlock::new(common, &self.settings);
        let mut dispatches = Vec::with_capacity(self.manifest.dispatches.len());
        for (index, (dispatch, chunk)) in self.manifest.dispatches.iter().zip(staging.chunks_exact_mut(ConstantBlock::SIZE)).enumerate() {
            block.dispatch_index = index as u32;
            chunk.copy_from_slice(bytemuck::bytes_of(&block));

            let (grid_width, grid_height) = dispatch.grid.resolve(self.width, self.height);
            dispatches.push(DispatchDesc {
                name: dispatch.name.clone(),
                pipeline_index: dispatch.pipeline,
                resources: dispatch.resources.clone(),
                constant_buffer_data: Bytes::copy_from_slice(chunk),
                grid_width,
                grid_height,
            });
        }

        self.staging = Some(staging);
        Ok(dispatches)
    }
}

impl Drop for ManifestInstance {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.allocator.free(staging);
        }
    }
}
