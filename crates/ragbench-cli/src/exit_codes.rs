//! Process exit codes. Scripts driving treatment sweeps branch on these.

pub const SUCCESS: i32 = 0;
/// The run finished but some requests errored or some answers stayed unscored.
pub const RUN_INCOMPLETE: i32 = 1;
/// Bad configuration or a failure that stopped the run.
pub const CONFIG_ERROR: i32 = 2;
