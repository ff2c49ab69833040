use std::process::ExitCode;

fn main() -> ExitCode {
    servyy_cli::run()
}
