mod infra;
mod runtime;

use std::process::ExitCode;

fn main() -> ExitCode {
    match runtime::run_from_args() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("motor-bench: {err}");
            ExitCode::FAILURE
        }
    }
}
