use std::process::ExitCode;

fn main() -> ExitCode {
    taskpay_cli::run()
}
