use clap::Parser;
use destilar::cli::{log, Cli, LogLevel};

fn main() {
    let config = Cli::parse().into_config();

    match destilar::run(config) {
        Ok(report) => {
            log(
                LogLevel::Info,
                &format!(
                    "done: best valid {:?}, test {:.4}, {} checkpoint(s)",
                    report.best_valid,
                    report.test_metric,
                    report.checkpoints.len()
                ),
            );
        }
        Err(err) => {
            log(LogLevel::Error, &err.to_string());
            std::process::exit(if err.is_user_error() { 2 } else { 1 });
        }
    }
}
