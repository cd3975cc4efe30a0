//! Startup self-check: resolves every registered tool's command on `PATH`
//! and reports missing executables before the server starts serving traffic.
//! Read-only — never changes the process exit-code contract on its own.

use gateway_runtime::registry::tools;
use gateway_runtime::supervisor::is_on_path;

/// Returns `true` if every registered tool's command resolved on `PATH`.
pub fn run() -> bool {
    println!("Checking registered tools...\n");

    let mut all_ok = true;
    for desc in tools::all() {
        print!("- {} ({})... ", desc.name, desc.command);
        if is_on_path(&desc.command) {
            println!("found");
        } else {
            println!("not found");
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("All registered tools resolved on PATH.");
    } else {
        println!("Some tools are missing. Requests routed to them will fail until installed.");
    }
    all_ok
}
