use std::process::ExitCode;

fn main() -> ExitCode {
    sheetsplit::cli::run()
}
