// Purpose: Binary entry for the module zip packager.
// Inputs/Outputs: Forwards argv to the CLI module and exits with its status code.
// Invariants: All flag handling and diagnostics stay in cli/mod.rs.

fn main() {
    let code = gomod_zip::cli::run_cli(std::env::args_os());
    std::process::exit(code);
}
