//! Backend objects backing the library's texture pools and static samplers

use crate::backend::{Backend, PoolSampler, SamplerSpec, TextureSpec};
use crate::error::Result;
use crate::format::translate_format;
use crate::library::{BindingOffsets, InstanceDesc, StaticSampler, TextureDesc};

/// Maps a library sampler onto backend addressing and filtering
///
/// Clamp variants clamp to edge, the rest mirror. Nearest variants point-sample,
/// the rest filter linearly. Mip selection is always nearest.
pub fn sampler_spec(sampler: StaticSampler) -> SamplerSpec {
    let address_mode = match sampler {
        StaticSampler::NearestClamp | StaticSampler::LinearClamp => wgpu::AddressMode::ClampToEdge,
        StaticSampler::NearestMirroredRepeat | StaticSampler::LinearMirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    };
    let filter = match sampler {
        StaticSampler::NearestClamp | StaticSampler::NearestMirroredRepeat => wgpu::FilterMode::Nearest,
        StaticSampler::LinearClamp | StaticSampler::LinearMirroredRepeat => wgpu::FilterMode::Linear,
    };

    SamplerSpec {
        address_mode,
        filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
    }
}

/// Samplers and pool textures owned by one method instance
///
/// Slots are indexed permanent-first: slot `k < permanent_count` is permanent
/// texture `k`, anything above is transient texture `k - permanent_count`.
pub struct ResourcePool<B: Backend> {
    samplers: Vec<(u32, SamplerSpec, B::Sampler)>,
    permanent: Vec<B::Texture>,
    transient: Vec<B::Texture>,
}

impl<B: Backend> Default for ResourcePool<B> {
    fn default() -> Self {
        Self {
            samplers: Vec::new(),
            permanent: Vec::new(),
            transient: Vec::new(),
        }
    }
}

impl<B: Backend> ResourcePool<B> {
    /// Allocates every sampler and pool texture an instance declares
    ///
    /// On failure, textures created so far are destroyed before returning.
    pub fn allocate(backend: &B, desc: &InstanceDesc, offsets: &BindingOffsets) -> Result<Self> {
        let mut pool = Self::default();
        if let Err(err) = pool.fill(backend, desc, offsets) {
            pool.release(backend);
            return Err(err);
        }

        tracing::debug!(
            samplers = pool.samplers.len(),
            permanent = pool.permanent.len(),
            transient = pool.transient.len(),
            "Allocated resource pool"
        );
        Ok(pool)
    }

    /// Destroys the current objects, then allocates a fresh set for `desc`
    pub fn reallocate(&mut self, backend: &B, desc: &InstanceDesc, offsets: &BindingOffsets) -> Result<()> {
        self.release(backend);
        *self = Self::allocate(backend, desc, offsets)?;
        Ok(())
    }

    /// Destroys every texture and drops every sampler
    pub fn release(&mut self, backend: &B) {
        for texture in self.permanent.drain(..).chain(self.transient.drain(..)) {
            backend.destroy_texture(texture);
        }
        self.samplers.clear();
    }

    fn fill(&mut self, backend: &B, desc: &InstanceDesc, offsets: &BindingOffsets) -> Result<()> {
        for static_sampler in &desc.static_samplers {
            let spec = sampler_spec(static_sampler.sampler);
            let sampler = backend.create_sampler(&spec)?;
            self.samplers.push((offsets.sampler + static_sampler.register_index, spec, sampler));
        }

        for (index, texture) in desc.permanent_pool.iter().enumerate() {
            let texture = create_pool_texture(backend, &format!("Permanent Pool {index}"), texture)?;
            self.permanent.push(texture);
        }
        for (index, texture) in desc.transient_pool.iter().enumerate() {
            let texture = create_pool_texture(backend, &format!("Transient Pool {index}"), texture)?;
            self.transient.push(texture);
        }

        Ok(())
    }

    /// Resolves a unified slot index
    pub fn slot(&self, slot: usize) -> Option<&B::Texture> {
        match slot.checked_sub(self.permanent.len()) {
            None => self.permanent.get(slot),
            Some(transient) => self.transient.get(transient),
        }
    }

    pub fn permanent(&self, index: usize) -> Option<&B::Texture> {
        self.permanent.get(index)
    }

    pub fn transient(&self, index: usize) -> Option<&B::Texture> {
        self.transient.get(index)
    }

    pub fn permanent_count(&self) -> usize {
        self.permanent.len()
    }

    pub fn transient_count(&self) -> usize {
        self.transient.len()
    }

    /// Total number of pool textures
    pub fn texture_count(&self) -> usize {
        self.permanent.len() + self.transient.len()
    }

    /// Samplers with the bindings they occupy
    pub fn samplers(&self) -> Vec<PoolSampler<'_, B>> {
        self.samplers
            .iter()
            .map(|(binding, spec, sampler)| PoolSampler {
                binding: *binding,
                sampler,
                filtering: spec.is_filtering(),
            })
            .collect()
    }
}

fn create_pool_texture<B: Backend>(backend: &B, label: &str, desc: &TextureDesc) -> Result<B::Texture> {
    backend.create_texture(&TextureSpec {
        label,
        width: desc.width,
        height: desc.height,
        format: translate_format(desc.format)?,
        mip_level_count: desc.mip_num.max(1),
    })
}
