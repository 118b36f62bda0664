//! Binding-set layouts and binding-set instances
//!
//! A layout is built once per library pipeline: range 0 is always the
//! constant buffer, followed by one range per declared descriptor range.
//! A binding set is a per-dispatch instance of a layout, populated with
//! concrete texture views and a constant allocation.

use crate::backend::Backend;
use crate::error::{DenoiseError, Result};
use crate::library::{BindingOffsets, ConstantBufferDesc, DescriptorType, PipelineDesc};

/// Kind of resource a binding range holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    ReadOnlyTexture,
    ReadWriteTexture,
}

impl From<DescriptorType> for BindingKind {
    fn from(descriptor_type: DescriptorType) -> Self {
        match descriptor_type {
            DescriptorType::Texture => Self::ReadOnlyTexture,
            DescriptorType::StorageTexture => Self::ReadWriteTexture,
        }
    }
}

/// One range of a binding-set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRange {
    pub kind: BindingKind,
    /// First register index the library assigned to this range
    pub base_register: u32,
    pub count: u32,
    /// Backend binding number of the first descriptor in the range
    pub binding_base: u32,
    /// Index of the first texture slot in the binding set; zero for the constant range
    pub first_slot: usize,
}

impl BindingRange {
    /// Backend binding number for the descriptor at `offset` within the range
    pub fn binding(&self, offset: u32) -> u32 {
        self.binding_base + offset
    }
}

/// Schema of the bindings consumed by one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSetLayout {
    ranges: Vec<BindingRange>,
    texture_slots: usize,
}

impl BindingSetLayout {
    /// Builds the layout for a library pipeline
    ///
    /// # Arguments
    /// * `pipeline` - The library's pipeline description
    /// * `constant_buffer` - The constant buffer shared by every pipeline of the instance
    /// * `offsets` - Per-kind binding offsets declared by the library
    pub fn from_pipeline(pipeline: &PipelineDesc, constant_buffer: &ConstantBufferDesc, offsets: &BindingOffsets) -> Self {
        let mut ranges = Vec::with_capacity(pipeline.descriptor_ranges.len() + 1);
        ranges.push(BindingRange {
            kind: BindingKind::ConstantBuffer,
            base_register: constant_buffer.register_index,
            count: 1,
            binding_base: offsets.constant_buffer + constant_buffer.register_index,
            first_slot: 0,
        });

        let mut texture_slots = 0;
        for range in &pipeline.descriptor_ranges {
            let offset = match range.descriptor_type {
                DescriptorType::Texture => offsets.texture,
                DescriptorType::StorageTexture => offsets.storage_texture,
            };
            ranges.push(BindingRange {
                kind: range.descriptor_type.into(),
                base_register: range.base_register_index,
                count: range.descriptor_num,
                binding_base: offset + range.base_register_index,
                first_slot: texture_slots,
            });
            texture_slots += range.descriptor_num as usize;
        }

        Self { ranges, texture_slots }
    }

    /// Number of ranges, including the constant-buffer range
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[BindingRange] {
        &self.ranges
    }

    pub fn range(&self, index: usize) -> Option<&BindingRange> {
        self.ranges.get(index)
    }

    /// Texture ranges paired with their range index
    pub fn texture_ranges(&self) -> impl Iterator<Item = (usize, &BindingRange)> {
        self.ranges.iter().enumerate().skip(1)
    }

    /// Binding number of the constant buffer
    pub fn constant_binding(&self) -> u32 {
        self.ranges[0].binding_base
    }

    /// Total number of texture descriptors across all ranges
    pub fn texture_slot_count(&self) -> usize {
        self.texture_slots
    }
}

/// How a texture is viewed when bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureAccess {
    ReadOnly { base_mip: u32, mip_count: u32 },
    ReadWrite { mip: u32 },
}

/// A texture and the subresources it exposes to a dispatch
#[derive(Debug)]
pub struct TextureView<'a, T> {
    pub texture: &'a T,
    pub access: TextureAccess,
}

/// A region of a constant buffer bound at range 0
#[derive(Debug)]
pub struct ConstantView<'a, C> {
    pub buffer: &'a C,
    pub offset: u64,
    pub size: u64,
}

/// A binding-set instance for one dispatch
pub struct BindingSet<'a, B: Backend> {
    label: &'a str,
    layout: &'a BindingSetLayout,
    constants: Option<ConstantView<'a, B::ConstantBuffer>>,
    textures: Vec<Option<TextureView<'a, B::Texture>>>,
}

impl<'a, B: Backend> BindingSet<'a, B> {
    pub fn new(label: &'a str, layout: &'a BindingSetLayout) -> Self {
        let mut textures = Vec::with_capacity(layout.texture_slot_count());
        textures.resize_with(layout.texture_slot_count(), || None);
        Self {
            label,
            layout,
            constants: None,
            textures,
        }
    }

    pub fn label(&self) -> &'a str {
        self.label
    }

    pub fn layout(&self) -> &'a BindingSetLayout {
        self.layout
    }

    /// Binds the constant allocation at range 0
    pub fn bind_constants(&mut self, view: ConstantView<'a, B::ConstantBuffer>) {
        self.constants = Some(view);
    }

    /// Binds a texture view at `offset` within texture range `range`
    ///
    /// The view's access must match the range kind, and the offset must be
    /// inside the range.
    pub fn bind_texture(&mut self, range: usize, offset: u32, view: TextureView<'a, B::Texture>) -> Result<()> {
        let Some(binding_range) = self.layout.range(range).filter(|_| range > 0) else {
            return Err(self.mismatch(format!("texture range {range} does not exist")));
        };

        let compatible = matches!(
            (binding_range.kind, view.access),
            (BindingKind::ReadOnlyTexture, TextureAccess::ReadOnly { .. }) | (BindingKind::ReadWriteTexture, TextureAccess::ReadWrite { .. })
        );
        if !compatible {
            return Err(self.mismatch(format!("range {range} of kind {:?} cannot hold a {:?} view", binding_range.kind, view.access)));
        }
        if offset >= binding_range.count {
            return Err(self.mismatch(format!("offset {offset} is outside range {range} of {} descriptors", binding_range.count)));
        }

        self.textures[binding_range.first_slot + offset as usize] = Some(view);
        Ok(())
    }

    /// Returns true once the constants and every texture slot are bound
    pub fn is_complete(&self) -> bool {
        self.constants.is_some() && self.textures.iter().all(Option::is_some)
    }

    pub fn constants(&self) -> Option<&ConstantView<'a, B::ConstantBuffer>> {
        self.constants.as_ref()
    }

    /// Bound texture views with their backend binding numbers, in layout order
    pub fn textures(&self) -> impl Iterator<Item = (u32, &TextureView<'a, B::Texture>)> {
        self.layout.texture_ranges().flat_map(move |(_, range)| {
            (0..range.count).filter_map(move |offset| self.textures[range.first_slot + offset as usize].as_ref().map(|view| (range.binding(offset), view)))
        })
    }

    fn mismatch(&self, detail: String) -> DenoiseError {
        DenoiseError::LayoutMismatch {
            dispatch: self.label.to_string(),
            detail,
        }
    }
}
