use std::process::ExitCode;

fn main() -> ExitCode {
    purser_cli::run()
}
