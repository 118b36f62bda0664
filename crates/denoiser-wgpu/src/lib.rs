//! Binding layer between a ray-tracing denoising library and wgpu
//!
//! The filtering library describes its work declaratively: the pipelines it
//! needs, the textures it pools, and a per-frame list of compute dispatches
//! that name resources by semantic role. This crate turns that description
//! into backend objects, resolves roles against the host's textures, uploads
//! constants and records the dispatches into a command encoder.
//!
//! [`DenoisePass`] is the entry point a render graph drives. Everything below
//! it is generic over [`Backend`]; [`backend::wgpu::WgpuBackend`] is the
//! production implementation.

pub mod arena;
pub mod backend;
pub mod compiler;
pub mod error;
pub mod format;
pub mod frame_dispatcher;
pub mod frame_settings;
pub mod layout;
pub mod library;
pub mod method;
pub mod pass;
pub mod pipeline_cache;
pub mod pool;
pub mod prepass;
pub mod properties;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::wgpu::{WgpuBackend, WgslProgramLibrary};
pub use backend::{Backend, ProgramSource};
pub use compiler::{CompilerStatus, MethodInstance, PipelineCompiler};
pub use error::{DenoiseError, Result, Stage};
pub use frame_dispatcher::{ChannelBindings, FrameDispatcher, FrameReport};
pub use frame_settings::{CameraFrame, Matrix4};
pub use library::FilteringLibrary;
pub use method::DenoisingMethod;
pub use pass::{CompileData, DenoisePass, Reflection};
pub use properties::{DenoiserConfig, OutputSize, Properties, PropertyValue};
