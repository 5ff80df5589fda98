use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// A world-space axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in points {
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// The bounding box of this box after an affine transform.
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self::from_points(self.corners().iter().map(|&c| m.transform_point3(c)))
    }

    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn bounding_sphere(&self) -> Sphere {
        Sphere::new(self.center(), 0.5 * (self.max - self.min).length())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// The six clip planes of a projection-view matrix, with normals pointing inwards.
///
/// Planes are extracted with the Gribb-Hartmann method and assume an OpenGL clip volume (`-w <= z <= w`).
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_projection_view(pv: &Mat4) -> Self {
        let r0 = pv.row(0);
        let r1 = pv.row(1);
        let r2 = pv.row(2);
        let r3 = pv.row(3);
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2].map(|p| {
            let n = p.xyz().length();
            if n > 0.0 {
                p / n
            } else {
                p
            }
        });
        Self { planes }
    }

    /// Conservative: may report an intersection for boxes just outside a frustum corner.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let n = plane.xyz();
            // The box corner furthest along the plane normal.
            let p = Vec3::select(n.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            n.dot(p) + plane.w >= 0.0
        })
    }
}

/// Converts world-space lengths into on-screen pixel lengths for a given projection-view matrix and viewport width.
#[derive(Clone, Copy, Debug)]
pub struct ScreenScale {
    w_row: Vec4,
    x_gradient: f32,
    w_gradient: f32,
    half_viewport_width: f32,
}

/// Clip-space `w` below which a point is treated as touching the eye plane.
const MIN_CLIP_W: f32 = 1e-6;

impl ScreenScale {
    pub fn new(pv: &Mat4, viewport_width: u32) -> Self {
        let x_row = pv.row(0);
        let w_row = pv.row(3);
        Self {
            w_row,
            x_gradient: x_row.xyz().length(),
            w_gradient: w_row.xyz().length(),
            half_viewport_width: 0.5 * viewport_width as f32,
        }
    }

    /// The smallest clip-space `w` of any point in `sphere`. This is the view depth for perspective projections.
    pub fn nearest_w(&self, sphere: &Sphere) -> f32 {
        self.w_row.dot(sphere.center.extend(1.0)) - sphere.radius * self.w_gradient
    }

    /// Upper bound on the number of pixels covered by `world_length` anywhere inside `sphere`. Returns infinity if
    /// the sphere reaches the eye plane.
    pub fn max_pixels(&self, world_length: f32, sphere: &Sphere) -> f32 {
        let w = self.nearest_w(sphere);
        if w <= MIN_CLIP_W {
            return f32::INFINITY;
        }
        world_length * self.x_gradient * self.half_viewport_width / w
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
