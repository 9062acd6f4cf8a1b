use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use glam::{Quat, Vec3};

use crate::assets::{AssetId, AssetKind};
use crate::render::RenderHandle;

/// Simulator-assigned, region-scoped identity. Reused by the server after an
/// entity is destroyed, so it must never serve as a long-term key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalHandle(pub u32);

impl LocalHandle {
    pub const WORLD_ROOT: LocalHandle = LocalHandle(0);

    pub fn is_world_root(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Globally unique, lifetime-stable identity. Cache key for decoded assets
/// and the index for name/property replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StableId(pub u128);

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// Last known kinematic state. All fields carry absolute values, so applying
/// updates in any relative order converges (last-applied-wins per field).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    /// Parent-relative for child entities, world-absolute for roots.
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
        }
    }
}

impl Kinematics {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Determines which asset pipeline, if any, the entity engages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    ClassicPrimitive,
    Sculpt { sculpt_map: AssetId },
    Mesh { mesh_asset: AssetId },
    Avatar,
}

impl EntityKind {
    /// The heavyweight asset this kind depends on, if any. Classic prims and
    /// avatars carry no fetch cost and never hit the pipeline.
    pub fn fetch_dependency(&self) -> Option<(AssetId, AssetKind)> {
        match self {
            EntityKind::Sculpt { sculpt_map } => Some((*sculpt_map, AssetKind::Sculpt)),
            EntityKind::Mesh { mesh_asset } => Some((*mesh_asset, AssetKind::Mesh)),
            EntityKind::ClassicPrimitive | EntityKind::Avatar => None,
        }
    }
}

/// Per-entity asset fetch state machine. Replaces the boolean-flag polling of
/// older viewers with something the dispatcher can inspect directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// No asset dependency, or not engaged yet.
    NotRequested,
    /// Handed to the proximity oracle, waiting to enter the camera frustum.
    AwaitingVisibility,
    /// Forwarded to the decode collaborator, result pending.
    Requested,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub point: u8,
    /// HUD entities live in camera/anchor space, not world space.
    pub is_hud: bool,
}

/// The shape-defining fields that feed the construction fingerprint. A change
/// here forces a visual rebuild; kinematic changes do not.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescription {
    pub profile_curve: u8,
    pub path_curve: u8,
    pub scale: Vec3,
    pub twist: f32,
    pub taper: f32,
    pub texture_fingerprint: u64,
}

impl Default for ShapeDescription {
    fn default() -> Self {
        Self {
            profile_curve: 0,
            path_curve: 0,
            scale: Vec3::ONE,
            twist: 0.0,
            taper: 0.0,
            texture_fingerprint: 0,
        }
    }
}

impl ShapeDescription {
    /// Conservative bounding sphere radius for frustum admission.
    pub fn bounding_radius(&self) -> f32 {
        (self.scale.length() * 0.5).max(0.25)
    }

    fn hash_into(&self, hasher: &mut impl Hasher) {
        self.profile_curve.hash(hasher);
        self.path_curve.hash(hasher);
        for component in self.scale.to_array() {
            component.to_bits().hash(hasher);
        }
        self.twist.to_bits().hash(hasher);
        self.taper.to_bits().hash(hasher);
        self.texture_fingerprint.hash(hasher);
    }
}

/// Partial shape delta carried by block updates. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapePatch {
    pub profile_curve: Option<u8>,
    pub path_curve: Option<u8>,
    pub scale: Option<Vec3>,
    pub twist: Option<f32>,
    pub taper: Option<f32>,
    pub texture_fingerprint: Option<u64>,
}

impl From<ShapeDescription> for ShapePatch {
    fn from(shape: ShapeDescription) -> Self {
        Self {
            profile_curve: Some(shape.profile_curve),
            path_curve: Some(shape.path_curve),
            scale: Some(shape.scale),
            twist: Some(shape.twist),
            taper: Some(shape.taper),
            texture_fingerprint: Some(shape.texture_fingerprint),
        }
    }
}

impl ShapePatch {
    pub fn apply_to(&self, shape: &mut ShapeDescription) {
        if let Some(profile_curve) = self.profile_curve {
            shape.profile_curve = profile_curve;
        }
        if let Some(path_curve) = self.path_curve {
            shape.path_curve = path_curve;
        }
        if let Some(scale) = self.scale {
            shape.scale = scale;
        }
        if let Some(twist) = self.twist {
            shape.twist = twist;
        }
        if let Some(taper) = self.taper {
            shape.taper = taper;
        }
        if let Some(texture_fingerprint) = self.texture_fingerprint {
            shape.texture_fingerprint = texture_fingerprint;
        }
    }
}

/// One world object: primitive, avatar or attachment.
#[derive(Debug, Clone)]
pub struct Entity {
    pub local: LocalHandle,
    pub stable_id: StableId,
    pub region: RegionId,
    /// `WORLD_ROOT` means world-rooted, anything else references another
    /// entity's local handle. Stored as an index, never a pointer.
    pub parent: LocalHandle,
    pub kinematics: Kinematics,
    pub kind: EntityKind,
    pub shape: ShapeDescription,
    pub construction_fingerprint: u64,
    pub attachment: Option<AttachmentInfo>,
    pub fetch_state: FetchState,
    /// False while the declared parent has not been registered yet; such an
    /// entity accepts updates but is not positioned in world space.
    pub placed: bool,
    /// Owned by the rendering collaborator, held here only to invalidate it.
    pub render_handle: Option<RenderHandle>,
    pub name: Option<String>,
    pub properties: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(
        local: LocalHandle,
        stable_id: StableId,
        region: RegionId,
        parent: LocalHandle,
        kind: EntityKind,
        kinematics: Kinematics,
        shape: ShapeDescription,
    ) -> Self {
        let fetch_state = if kind.fetch_dependency().is_some() {
            FetchState::AwaitingVisibility
        } else {
            FetchState::NotRequested
        };

        let mut entity = Self {
            local,
            stable_id,
            region,
            parent,
            kinematics,
            kind,
            shape,
            construction_fingerprint: 0,
            attachment: None,
            fetch_state,
            placed: parent.is_world_root(),
            render_handle: None,
            name: None,
            properties: BTreeMap::new(),
        };
        entity.refresh_fingerprint();
        entity
    }

    /// Recomputes the fingerprint over the shape-defining fields and returns
    /// whether it changed, i.e. whether a re-render is required.
    pub fn refresh_fingerprint(&mut self) -> bool {
        let mut hasher = DefaultHasher::new();
        match &self.kind {
            EntityKind::ClassicPrimitive => 0u8.hash(&mut hasher),
            EntityKind::Sculpt { sculpt_map } => {
                1u8.hash(&mut hasher);
                sculpt_map.hash(&mut hasher);
            }
            EntityKind::Mesh { mesh_asset } => {
                2u8.hash(&mut hasher);
                mesh_asset.hash(&mut hasher);
            }
            EntityKind::Avatar => 3u8.hash(&mut hasher),
        }
        self.shape.hash_into(&mut hasher);

        let fingerprint = hasher.finish();
        let changed = fingerprint != self.construction_fingerprint;
        self.construction_fingerprint = fingerprint;
        changed
    }

    pub fn is_hud(&self) -> bool {
        self.attachment.map(|a| a.is_hud).unwrap_or(false)
    }
}

/// Immutable kinematic snapshot published for the proximity oracle. The
/// oracle only ever reads these, never the registry itself.
#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub parent: LocalHandle,
    pub local_position: Vec3,
    pub bounding_radius: f32,
    pub placed: bool,
    pub is_hud: bool,
    /// Still waiting for frustum admission (state `AwaitingVisibility`).
    pub wants_admission: bool,
}

impl EntitySnapshot {
    pub fn of(entity: &Entity) -> Self {
        Self {
            parent: entity.parent,
            local_position: entity.kinematics.position,
            bounding_radius: entity.shape.bounding_radius(),
            placed: entity.placed,
            is_hud: entity.is_hud(),
            wants_admission: entity.placed && entity.fetch_state == FetchState::AwaitingVisibility,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_shape_changes() {
        let mut entity = Entity::new(
            LocalHandle(7),
            StableId(0xAB),
            RegionId(1),
            LocalHandle::WORLD_ROOT,
            EntityKind::ClassicPrimitive,
            Kinematics::default(),
            ShapeDescription::default(),
        );

        assert!(!entity.refresh_fingerprint(), "unchanged shape must not flag a rebuild");

        entity.shape.scale = Vec3::new(2.0, 1.0, 1.0);
        assert!(entity.refresh_fingerprint());
        assert!(!entity.refresh_fingerprint());
    }

    #[test]
    fn fingerprint_ignores_kinematics() {
        let mut entity = Entity::new(
            LocalHandle(7),
            StableId(0xAB),
            RegionId(1),
            LocalHandle::WORLD_ROOT,
            EntityKind::ClassicPrimitive,
            Kinematics::default(),
            ShapeDescription::default(),
        );

        entity.kinematics.position = Vec3::new(10.0, -3.0, 22.0);
        entity.kinematics.velocity = Vec3::X;
        assert!(!entity.refresh_fingerprint());
    }

    #[test]
    fn mesh_entities_start_awaiting_visibility() {
        let entity = Entity::new(
            LocalHandle(1),
            StableId(1),
            RegionId(1),
            LocalHandle::WORLD_ROOT,
            EntityKind::Mesh {
                mesh_asset: AssetId(42),
            },
            Kinematics::default(),
            ShapeDescription::default(),
        );
        assert_eq!(entity.fetch_state, FetchState::AwaitingVisibility);

        let prim = Entity::new(
            LocalHandle(2),
            StableId(2),
            RegionId(1),
            LocalHandle::WORLD_ROOT,
            EntityKind::ClassicPrimitive,
            Kinematics::default(),
            ShapeDescription::default(),
        );
        assert_eq!(prim.fetch_state, FetchState::NotRequested);
    }

    #[test]
    fn shape_patch_only_touches_set_fields() {
        let mut shape = ShapeDescription::default();
        let patch = ShapePatch {
            scale: Some(Vec3::splat(3.0)),
            twist: Some(0.5),
            ..ShapePatch::default()
        };
        patch.apply_to(&mut shape);

        assert_eq!(shape.scale, Vec3::splat(3.0));
        assert_eq!(shape.twist, 0.5);
        assert_eq!(shape.profile_curve, 0);
        assert_eq!(shape.taper, 0.0);
    }
}
