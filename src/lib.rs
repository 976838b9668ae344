// Purpose: Define the crate surface for the module zip packager.
// Inputs/Outputs: Exposes the CLI driver and the pkg building blocks to the binary and tests.
// Invariants: The binary only goes through `cli`; everything else lives under `pkg`.

pub mod cli;
pub mod pkg;
