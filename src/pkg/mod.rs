// Purpose: Module packaging building blocks: descriptor parsing, zip layout, hashing, cache paths.
// Inputs/Outputs: Used by the CLI to turn a local checkout into a module-cache download zip.
// Invariants: Only pack writes files; the other modules read or compute.
// Gotchas: modzip and ziphash must stay in lockstep with the go command's checksum rules.

pub mod cache;
pub mod modfile;
pub mod modzip;
pub mod pack;
pub mod version;
pub mod ziphash;
