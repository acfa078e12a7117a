use crate::texture::TextureHandle;

/// A single render-to-texture target, samplable as `u_buffer<i>`.
///
/// `fbo` is the GL framebuffer name the CLI renders into; the engine only
/// carries it alongside the texture.
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    pub fbo: u32,
    pub texture: TextureHandle,
}

/// A ping-pong pair of render targets, samplable as `u_doubleBuffer<i>`.
///
/// The read (`src`) and write (`dst`) roles swap every evaluation cycle;
/// the texture contents persist across the swap.
#[derive(Debug, Clone, Copy)]
pub struct PingPong {
    targets: [Buffer; 2],
    src: usize,
}

impl PingPong {
    pub fn new(a: Buffer, b: Buffer) -> Self {
        Self { targets: [a, b], src: 0 }
    }

    /// The side shaders sample this cycle.
    pub fn src(&self) -> &Buffer {
        &self.targets[self.src]
    }

    /// The side being rendered into this cycle.
    pub fn dst(&self) -> &Buffer {
        &self.targets[1 - self.src]
    }

    /// Swap the read/write roles. Called once per evaluation.
    pub fn swap(&mut self) {
        self.src = 1 - self.src;
    }
}

/// A multi-level convolution chain (downsample then upsample passes),
/// exposing only its final composited result as `u_pyramid<i>`.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub down: Vec<Buffer>,
    pub up: Vec<Buffer>,
}

impl Pyramid {
    pub fn new(down: Vec<Buffer>, up: Vec<Buffer>) -> Self {
        Self { down, up }
    }

    pub fn depth(&self) -> usize {
        self.down.len()
    }

    /// The final composited texture. The last upsample level when the
    /// chain has run, otherwise the coarsest downsample level.
    pub fn result(&self) -> Option<TextureHandle> {
        self.up
            .last()
            .or_else(|| self.down.last())
            .map(|b| b.texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: u32) -> Buffer {
        Buffer {
            fbo: id,
            texture: TextureHandle::new(id, 8, 8),
        }
    }

    #[test]
    fn ping_pong_swaps_roles_and_keeps_contents() {
        let mut pp = PingPong::new(target(1), target(2));
        assert_eq!(pp.src().texture.id, 1);
        assert_eq!(pp.dst().texture.id, 2);

        pp.swap();
        assert_eq!(pp.src().texture.id, 2);
        assert_eq!(pp.dst().texture.id, 1);

        pp.swap();
        assert_eq!(pp.src().texture.id, 1);
    }

    #[test]
    fn pyramid_result_prefers_upsample_chain() {
        let pyramid = Pyramid::new(vec![target(1), target(2)], vec![target(3), target(4)]);
        assert_eq!(pyramid.result().map(|t| t.id), Some(4));

        let down_only = Pyramid::new(vec![target(1), target(2)], Vec::new());
        assert_eq!(down_only.result().map(|t| t.id), Some(2));
    }
}
