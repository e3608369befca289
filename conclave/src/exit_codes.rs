//! Stable exit codes for conclave CLI invocations.

/// Run completed successfully (approved, consensus, or all agents done).
pub const OK: i32 = 0;
/// Invalid configuration, missing goal, lock conflict, or other failure.
pub const ERROR: i32 = 1;
/// Run is blocked on human input; re-invoke unchanged to resume.
pub const HITL: i32 = 10;
/// Iteration/turn budget exhausted without resolution.
pub const MAX_TURNS: i32 = 11;
