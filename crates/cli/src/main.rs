use std::process::ExitCode;

fn main() -> ExitCode {
    majordome_cli::run()
}
