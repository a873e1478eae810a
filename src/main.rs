use std::process;
use taskline::TasklineError;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("TASKLINE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match taskline::cli::run() {
        Ok(()) => {}
        Err(TasklineError::Usage(message)) => {
            eprintln!("{}", message);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
