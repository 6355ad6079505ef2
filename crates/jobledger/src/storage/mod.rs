pub mod mounts;
pub mod reconciler;

pub use mounts::{Mountpoints, JOB_MOUNT};
pub use reconciler::{flatten_directory, ResultEntry, ResultKind};
