//! The agentd binary.

use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let code = agentd::commandline::dispatch(&args);
    ExitCode::from((code & 0xFF) as u8)
}
