//! Frame-level and per-method settings passed to the filtering library

use super::desc::Method;
use serde::{Deserialize, Serialize};

/// Settings shared by every method, rebuilt each frame
///
/// Matrices are stored column-major, which is the layout the library reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommonSettings {
    pub view_to_clip_matrix: [f32; 16],
    pub view_to_clip_matrix_prev: [f32; 16],
    pub world_to_view_matrix: [f32; 16],
    pub world_to_view_matrix_prev: [f32; 16],
    /// Sub-pixel jitter in `[-0.5, 0.5]`, `sample_uv = pixel_uv + camera_jitter`
    pub camera_jitter: [f32; 2],
    pub motion_vector_scale: [f32; 2],
    pub resolution: [u32; 2],
    pub denoising_range: f32,
    /// Relative depth threshold as a fraction, not a percentage
    pub disocclusion_threshold: f32,
    pub frame_index: u32,
    pub is_motion_vector_in_world_space: bool,
}

impl Default for CommonSettings {
    fn default() -> Self {
        let identity = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        Self {
            view_to_clip_matrix: identity,
            view_to_clip_matrix_prev: identity,
            world_to_view_matrix: identity,
            world_to_view_matrix_prev: identity,
            camera_jitter: [0.0; 2],
            motion_vector_scale: [1.0; 2],
            resolution: [0; 2],
            denoising_range: 500_000.0,
            disocclusion_threshold: 0.01,
            frame_index: 0,
            is_motion_vector_in_world_space: false,
        }
    }
}

/// Tuning values for the joint diffuse and specular ReLAX filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaxDiffuseSpecularSettings {
    pub diffuse_prepass_blur_radius: f32,
    pub specular_prepass_blur_radius: f32,
    pub diffuse_max_accumulated_frame_num: u32,
    pub specular_max_accumulated_frame_num: u32,
    pub diffuse_max_fast_accumulated_frame_num: u32,
    pub specular_max_fast_accumulated_frame_num: u32,
    pub diffuse_phi_luminance: f32,
    pub specular_phi_luminance: f32,
    pub diffuse_lobe_angle_fraction: f32,
    pub specular_lobe_angle_fraction: f32,
    pub roughness_fraction: f32,
    pub diffuse_history_rejection_normal_threshold: f32,
    pub specular_variance_boost: f32,
    pub specular_lobe_angle_slack: f32,
    pub disocclusion_fix_edge_stopping_normal_power: f32,
    pub disocclusion_fix_max_radius: f32,
    pub disocclusion_fix_num_frames_to_fix: u32,
    pub history_clamping_color_box_sigma_scale: f32,
    pub spatial_variance_estimation_history_threshold: u32,
    pub atrous_iteration_num: u32,
    pub min_luminance_weight: f32,
    pub depth_threshold: f32,
    pub roughness_edge_stopping_relaxation: f32,
    pub normal_edge_stopping_relaxation: f32,
    pub luminance_edge_stopping_relaxation: f32,
    pub enable_anti_firefly: bool,
    pub enable_reprojection_test_skipping_without_motion: bool,
    pub enable_specular_virtual_history_clamping: bool,
    pub enable_roughness_edge_stopping: bool,
    pub enable_material_test_for_diffuse: bool,
    pub enable_material_test_for_specular: bool,
}

impl Default for RelaxDiffuseSpecularSettings {
    fn default() -> Self {
        Self {
            diffuse_prepass_blur_radius: 16.0,
            specular_prepass_blur_radius: 16.0,
            diffuse_max_accumulated_frame_num: 31,
            specular_max_accumulated_frame_num: 31,
            diffuse_max_fast_accumulated_frame_num: 2,
            specular_max_fast_accumulated_frame_num: 2,
            diffuse_phi_luminance: 2.0,
            specular_phi_luminance: 1.0,
            diffuse_lobe_angle_fraction: 0.8,
            specular_lobe_angle_fraction: 0.5,
            roughness_fraction: 0.5,
            diffuse_history_rejection_normal_threshold: 0.0,
            specular_variance_boost: 1.0,
            specular_lobe_angle_slack: 10.0,
            disocclusion_fix_edge_stopping_normal_power: 8.0,
            disocclusion_fix_max_radius: 32.0,
            disocclusion_fix_num_frames_to_fix: 4,
            history_clamping_color_box_sigma_scale: 2.0,
            spatial_variance_estimation_history_threshold: 4,
            atrous_iteration_num: 6,
            min_luminance_weight: 0.0,
            depth_threshold: 0.02,
            roughness_edge_stopping_relaxation: 0.3,
            normal_edge_stopping_relaxation: 0.3,
            luminance_edge_stopping_relaxation: 1.0,
            enable_anti_firefly: true,
            enable_reprojection_test_skipping_without_motion: false,
            enable_specular_virtual_history_clamping: false,
            enable_roughness_edge_stopping: true,
            enable_material_test_for_diffuse: false,
            enable_material_test_for_specular: false,
        }
    }
}

/// Tuning values for the diffuse-only ReLAX filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelaxDiffuseSettings {
    pub prepass_blur_radius: f32,
    pub diffuse_max_accumulated_frame_num: u32,
    pub diffuse_max_fast_accumulated_frame_num: u32,
    pub diffuse_phi_luminance: f32,
    pub diffuse_lobe_angle_fraction: f32,
    pub history_fix_edge_stopping_normal_power: f32,
    pub history_fix_max_radius: f32,
    pub history_fix_frame_num: u32,
    pub history_clamping_color_box_sigma_scale: f32,
    pub spatial_variance_estimation_history_threshold: u32,
    pub atrous_iteration_num: u32,
    pub min_luminance_weight: f32,
    pub depth_threshold: f32,
    pub enable_anti_firefly: bool,
    pub enable_reprojection_test_skipping_without_motion: bool,
    pub enable_material_test: bool,
}

impl Default for RelaxDiffuseSettings {
    fn default() -> Self {
        Self {
            prepass_blur_radius: 16.0,
            diffuse_max_accumulated_frame_num: 31,
            diffuse_max_fast_accumulated_frame_num: 2,
            diffuse_phi_luminance: 2.0,
            diffuse_lobe_angle_fraction: 0.8,
            history_fix_edge_stopping_normal_power: 8.0,
            history_fix_max_radius: 32.0,
            history_fix_frame_num: 4,
            history_clamping_color_box_sigma_scale: 2.0,
            spatial_variance_estimation_history_threshold: 4,
            atrous_iteration_num: 6,
            min_luminance_weight: 0.0,
            depth_threshold: 0.02,
            enable_anti_firefly: true,
            enable_reprojection_test_skipping_without_motion: false,
            enable_material_test: false,
        }
    }
}

/// Hit distance normalization `(A + viewZ * B) * lerp(1, C, exp2(D * roughness^2))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitDistanceParameters {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl Default for HitDistanceParameters {
    fn default() -> Self {
        Self { a: 3.0, b: 0.1, c: 20.0, d: -25.0 }
    }
}

/// Tuning values for the ReBLUR filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReblurSettings {
    pub hit_distance_parameters: HitDistanceParameters,
    pub max_accumulated_frame_num: u32,
    pub max_fast_accumulated_frame_num: u32,
    pub history_fix_frame_num: u32,
    pub diffuse_prepass_blur_radius: f32,
    pub specular_prepass_blur_radius: f32,
    pub min_blur_radius: f32,
    pub max_blur_radius: f32,
    pub lobe_angle_fraction: f32,
    pub roughness_fraction: f32,
    pub plane_distance_sensitivity: f32,
    pub enable_anti_firefly: bool,
    pub enable_reference_accumulation: bool,
}

impl Default for ReblurSettings {
    fn default() -> Self {
        Self {
            hit_distance_parameters: HitDistanceParameters::default(),
            max_accumulated_frame_num: 31,
            max_fast_accumulated_frame_num: 6,
            history_fix_frame_num: 3,
            diffuse_prepass_blur_radius: 30.0,
            specular_prepass_blur_radius: 50.0,
            min_blur_radius: 1.0,
            max_blur_radius: 30.0,
            lobe_angle_fraction: 0.15,
            roughness_fraction: 0.15,
            plane_distance_sensitivity: 0.005,
            enable_anti_firefly: false,
            enable_reference_accumulation: false,
        }
    }
}

/// Settings for the active method, tagged by method
///
/// The motion-vector methods carry no tuning values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MethodSettings {
    RelaxDiffuseSpecular(RelaxDiffuseSpecularSettings),
    RelaxDiffuse(RelaxDiffuseSettings),
    ReblurDiffuseSpecular(ReblurSettings),
    SpecularReflectionMv,
    SpecularDeltaMv,
}

impl MethodSettings {
    /// The library method these settings apply to
    pub fn method(&self) -> Method {
        match self {
            Self::RelaxDiffuseSpecular(_) => Method::RelaxDiffuseSpecular,
            Self::RelaxDiffuse(_) => Method::RelaxDiffuse,
            Self::ReblurDiffuseSpecular(_) => Method::ReblurDiffuseSpecular,
            Self::SpecularReflectionMv => Method::SpecularReflectionMv,
            Self::SpecularDeltaMv => Method::SpecularDeltaMv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_settings_tag() {
        assert_eq!(MethodSettings::RelaxDiffuse(RelaxDiffuseSettings::default()).method(), Method::RelaxDiffuse);
        assert_eq!(MethodSettings::SpecularDeltaMv.method(), Method::SpecularDeltaMv);
    }

    #[test]
    fn test_common_settings_default_matrices_are_identity() {
        let settings = CommonSettings::default();
        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert_eq!(settings.world_to_view_matrix[col * 4 + row], expected);
            }
        }
    }
}
