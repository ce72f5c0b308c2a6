use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        std::env::set_var("RUST_LOG", log_level);
    }
    env_logger::init();

    match vsphere_collector_service::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("collector exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
