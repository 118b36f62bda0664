//! Per-frame common settings
//!
//! Camera matrices arrive row-major and the library reads them column-major.
//! The conversion is an explicit transpose, never a reinterpretation of memory.

use crate::library::CommonSettings;

/// Depth range beyond which pixels are not denoised
pub const DENOISING_RANGE: f32 = 10_000.0;

/// A 4x4 matrix stored row-major
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix4 {
    pub rows: [[f32; 4]; 4],
}

impl Matrix4 {
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0], [0.0, 0.0, 0.0, 1.0]],
    };

    pub fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn transpose(&self) -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in self.rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                rows[c][r] = *value;
            }
        }
        Self { rows }
    }

    /// Flattens into the column-major layout the library expects
    pub fn to_column_major(&self) -> [f32; 16] {
        let transposed = self.transpose();
        *bytemuck::cast_ref::<[[f32; 4]; 4], [f32; 16]>(&transposed.rows)
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Camera state supplied by the host each frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraFrame {
    /// World-to-view matrix
    pub view: Matrix4,
    /// View-to-clip matrix without jitter
    pub projection_no_jitter: Matrix4,
    /// Sub-pixel jitter in pixels, `[x, y]`
    pub jitter: [f32; 2],
}

/// Per-run values that feed the common settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParameters {
    pub resolution: (u32, u32),
    /// Disocclusion threshold in percent
    pub disocclusion_threshold: f32,
    pub world_space_motion: bool,
}

/// Builds the library's common settings and keeps the previous frame's camera
#[derive(Debug, Clone, Default)]
pub struct FrameSettingsBuilder {
    frame_index: u32,
    previous_view: Matrix4,
    previous_projection: Matrix4,
}

impl FrameSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts history at frame 0
    pub fn reset(&mut self) {
        self.frame_index = 0;
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Builds this frame's settings and advances to the next frame
    ///
    /// On frame 0 the previous matrices equal the current ones.
    pub fn build(&mut self, camera: &CameraFrame, parameters: &FrameParameters) -> CommonSettings {
        if self.frame_index == 0 {
            self.previous_view = camera.view;
            self.previous_projection = camera.projection_no_jitter;
        }

        let settings = CommonSettings {
            view_to_clip_matrix: camera.projection_no_jitter.to_column_major(),
            view_to_clip_matrix_prev: self.previous_projection.to_column_major(),
            world_to_view_matrix: camera.view.to_column_major(),
            world_to_view_matrix_prev: self.previous_view.to_column_major(),
            camera_jitter: [-camera.jitter[0], camera.jitter[1]],
            resolution: [parameters.resolution.0, parameters.resolution.1],
            denoising_range: DENOISING_RANGE,
            disocclusion_threshold: parameters.disocclusion_threshold * 0.01,
            frame_index: self.frame_index,
            is_motion_vector_in_world_space: parameters.world_space_motion,
            ..CommonSettings::default()
        };

        self.previous_view = camera.view;
        self.previous_projection = camera.projection_no_jitter;
        self.frame_index = self.frame_index.wrapping_add(1);

        settings
    }
}
