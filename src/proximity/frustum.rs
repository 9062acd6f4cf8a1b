use glam::{Vec3, Vec4};

/// Camera state as polled once per oracle cycle.
#[derive(Debug, Clone, Copy)]
pub struct CameraPose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect_ratio: f32,
    pub near_clip: f32,
    pub far_clip: f32,
}

impl CameraPose {
    pub fn looking(position: Vec3, forward: Vec3) -> Self {
        Self {
            position,
            forward,
            up: Vec3::Z,
            fov_y: std::f32::consts::FRAC_PI_2,
            aspect_ratio: 4.0 / 3.0,
            near_clip: 0.1,
            far_clip: 256.0,
        }
    }
}

/// Six half-space planes, stored as `(n.x, n.y, n.z, d)` with the normal
/// pointing into the frustum, so `n.dot(p) + d` is the signed interior
/// distance.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

fn plane(normal: Vec3, point_on_plane: Vec3) -> Vec4 {
    let n = normal.normalize();
    n.extend(-n.dot(point_on_plane))
}

impl Frustum {
    pub fn from_pose(pose: &CameraPose) -> Self {
        let forward = pose.forward.normalize();
        let right = forward.cross(pose.up).normalize();
        let up = right.cross(forward);

        let tan_v = (pose.fov_y * 0.5).tan();
        let tan_h = tan_v * pose.aspect_ratio;

        // Side planes pass through the camera position. `forward * tan - axis`
        // is perpendicular to the boundary direction `forward + axis * tan`
        // and points inward regardless of basis handedness.
        let planes = [
            plane(forward, pose.position + forward * pose.near_clip),
            plane(-forward, pose.position + forward * pose.far_clip),
            plane(forward * tan_v - up, pose.position),
            plane(forward * tan_v + up, pose.position),
            plane(forward * tan_h - right, pose.position),
            plane(forward * tan_h + right, pose.position),
        ];

        Self { planes }
    }

    /// An entity is in view unless one plane reports its bounding sphere
    /// fully outside.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(center) + p.w >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose() -> CameraPose {
        CameraPose {
            position: Vec3::ZERO,
            forward: Vec3::X,
            up: Vec3::Z,
            fov_y: std::f32::consts::FRAC_PI_2,
            aspect_ratio: 1.0,
            near_clip: 0.5,
            far_clip: 100.0,
        }
    }

    #[test]
    fn sphere_ahead_is_inside() {
        let frustum = Frustum::from_pose(&pose());
        assert!(frustum.contains_sphere(Vec3::new(10.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn sphere_behind_the_camera_is_outside() {
        let frustum = Frustum::from_pose(&pose());
        assert!(!frustum.contains_sphere(Vec3::new(-10.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn sphere_beyond_the_far_clip_is_outside() {
        let frustum = Frustum::from_pose(&pose());
        assert!(!frustum.contains_sphere(Vec3::new(150.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn sphere_far_off_to_the_side_is_outside() {
        // 90 degree vertical fov, aspect 1: the side planes sit at 45 degrees.
        let frustum = Frustum::from_pose(&pose());
        assert!(!frustum.contains_sphere(Vec3::new(10.0, 30.0, 0.0), 1.0));
        assert!(!frustum.contains_sphere(Vec3::new(10.0, 0.0, 30.0), 1.0));
    }

    #[test]
    fn sphere_intersecting_a_plane_counts_as_inside() {
        let frustum = Frustum::from_pose(&pose());
        // Center exactly on the 45 degree right plane boundary.
        assert!(frustum.contains_sphere(Vec3::new(10.0, 10.0, 0.0), 0.5));
        // Slightly past it, but the radius still reaches in.
        assert!(frustum.contains_sphere(Vec3::new(10.0, 11.0, 0.0), 2.0));
        assert!(!frustum.contains_sphere(Vec3::new(10.0, 14.0, 0.0), 0.5));
    }
}
