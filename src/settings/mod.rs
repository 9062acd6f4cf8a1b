use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "Skyglass")]
#[command(version = concat!(env!("VERGEN_GIT_BRANCH"), "/", env!("VERGEN_GIT_SHA")))]
#[command(about = "An open source virtual world viewer core")]
pub struct CliArgs {
    /// Cadence of the background visibility loop.
    #[arg(long, env = "SKYGLASS_POLL_INTERVAL_MS", default_value_t = 100)]
    pub proximity_poll_interval_ms: u64,

    /// Far clip of the admission frustum, in meters.
    #[arg(long, env = "SKYGLASS_VIEW_DISTANCE", default_value_t = 256.0)]
    pub view_distance: f32,

    /// Capacity of the shared decoded-asset cache.
    #[arg(long, env = "SKYGLASS_ASSET_CACHE_CAPACITY", default_value_t = 512)]
    pub asset_cache_capacity: usize,

    #[arg(long, env = "SKYGLASS_NEW_OBJECT_CAP", default_value_t = 64)]
    pub new_object_cap: usize,

    #[arg(long, env = "SKYGLASS_FULL_UPDATE_CAP", default_value_t = 64)]
    pub full_update_cap: usize,

    /// Terse updates are the highest-volume category; anything beyond the cap
    /// is simply processed next frame.
    #[arg(long, env = "SKYGLASS_TERSE_UPDATE_CAP", default_value_t = 128)]
    pub terse_update_cap: usize,

    #[arg(long, env = "SKYGLASS_BLOCK_UPDATE_CAP", default_value_t = 64)]
    pub block_update_cap: usize,

    #[command(subcommand)]
    pub operation_mode: OperationMode,
}

#[derive(Subcommand, Debug)]
pub enum OperationMode {
    /// Drive the scheduler from a synthetic event population instead of a
    /// live simulator connection.
    Simulate {
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
        /// Rough number of root objects the producers aim for.
        #[arg(long, default_value_t = 200)]
        population: u32,
        #[arg(long, default_value_t = 2)]
        producer_threads: u32,
    },
}

impl CliArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.proximity_poll_interval_ms)
    }
}

/// Per-frame drain limits for the heavyweight event categories. The cheap
/// categories (kills, avatar moves, name/property replies) are always drained
/// fully.
#[derive(Debug, Clone, Copy)]
pub struct DrainCaps {
    pub new_objects: usize,
    pub full_updates: usize,
    pub terse_updates: usize,
    pub block_updates: usize,
}

impl Default for DrainCaps {
    fn default() -> Self {
        Self {
            new_objects: 64,
            full_updates: 64,
            terse_updates: 128,
            block_updates: 64,
        }
    }
}

impl From<&CliArgs> for DrainCaps {
    fn from(args: &CliArgs) -> Self {
        Self {
            new_objects: args.new_object_cap,
            full_updates: args.full_update_cap,
            terse_updates: args.terse_update_cap,
            block_updates: args.block_update_cap,
        }
    }
}
