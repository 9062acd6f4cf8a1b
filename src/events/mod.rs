use glam::{Quat, Vec3};

use crate::scene::entity::{AttachmentInfo, EntityKind, Kinematics, LocalHandle, RegionId, ShapeDescription, ShapePatch, StableId};

pub mod dispatcher;
pub mod queues;

/// The per-object wire events delivered by the network transport, one struct
/// per category. Delivery is at-least-once and unordered across categories;
/// within one category FIFO order is preserved end to end.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub local: LocalHandle,
    pub stable_id: StableId,
    pub region: RegionId,
    pub parent: LocalHandle,
    pub kind: EntityKind,
    pub kinematics: Kinematics,
    pub shape: ShapeDescription,
    pub attachment: Option<AttachmentInfo>,
}

#[derive(Debug, Clone)]
pub struct FullUpdate {
    pub local: LocalHandle,
    pub kinematics: Kinematics,
    pub shape: ShapeDescription,
}

/// Lightweight kinematic-only update. Cheap, high-frequency, safe to cap.
#[derive(Debug, Clone, Copy)]
pub struct TerseUpdate {
    pub local: LocalHandle,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
}

impl TerseUpdate {
    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockUpdate {
    pub local: LocalHandle,
    pub patch: ShapePatch,
}

#[derive(Debug, Clone, Copy)]
pub struct Kill {
    pub region: RegionId,
    pub local: LocalHandle,
}

#[derive(Debug, Clone)]
pub struct AvatarUpdate {
    pub local: LocalHandle,
    pub stable_id: StableId,
    pub region: RegionId,
    pub is_new: bool,
    pub kinematics: Kinematics,
}

#[derive(Debug, Clone)]
pub struct NameReply {
    pub stable_id: StableId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PropertyReply {
    pub stable_id: StableId,
    pub properties: Vec<(String, String)>,
}
