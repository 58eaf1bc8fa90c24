//! Per-frame transform data read by the vertex stage.

use ash::vk;
use glam::{Mat4, Vec3};

/// Rotation speed of the demo model, radians per second.
pub const ROTATION_SPEED: f32 = std::f32::consts::FRAC_PI_2;

const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);
const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10.0;

/// Model, view and projection matrices in std140-compatible layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UniformFrameData {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformFrameData {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Transforms after `elapsed` seconds for a target of `extent`.
    ///
    /// The model spins about +Z, the camera looks at the origin from
    /// (2, 2, 2) with +Z up, and the projection's Y axis is flipped so that
    /// +Y points up in Vulkan clip space.
    pub fn at(elapsed: f32, extent: vk::Extent2D) -> Self {
        let aspect = if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        };

        let mut proj = Mat4::perspective_rh(FOV_Y, aspect, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self {
            model: Mat4::from_rotation_z(elapsed * ROTATION_SPEED),
            view: Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z),
            proj,
        }
    }
}
