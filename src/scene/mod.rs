pub mod entity;
pub mod lifecycle;
pub mod orphans;
pub mod registry;
