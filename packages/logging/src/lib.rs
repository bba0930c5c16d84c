#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub use log;

pub use free_log_client;

#[cfg(feature = "free_log")]
pub use free_log::*;

#[cfg(feature = "free_log")]
mod free_log {
    use free_log_client::FreeLogLayer;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error(transparent)]
        Logs(#[from] free_log_client::LogsInitError),
        #[error(transparent)]
        BuildLogsConfig(#[from] free_log_client::BuildLogsConfigError),
        #[error(transparent)]
        BuildFileWriterConfig(#[from] free_log_client::BuildFileWriterConfigError),
    }

    /// Initializes logging for a `UserManager` process.
    ///
    /// When a `filename` is given, logs are additionally written to that file
    /// under the `UserManager` logs directory. The env filter is taken from
    /// `USERMANAGER_LOG`, falling back to `RUST_LOG`.
    ///
    /// # Errors
    ///
    /// * If the logs config fails to build
    /// * If the logging layer fails to initialize
    pub fn init(filename: Option<&str>) -> Result<FreeLogLayer, InitError> {
        #[cfg(debug_assertions)]
        const DEFAULT_LOG_LEVEL: &str = "usermanager=trace";
        #[cfg(not(debug_assertions))]
        const DEFAULT_LOG_LEVEL: &str = "usermanager=info";

        let mut logs_config = free_log_client::LogsConfig::builder();

        if let Some(filename) = filename {
            if let Some(log_dir) = usermanager_config::make_logs_dir_path() {
                logs_config = logs_config.with_file_writer(
                    free_log_client::FileWriterConfig::builder()
                        .file_path(log_dir.join(filename))
                        .log_level(free_log_client::Level::Debug),
                )?;
            } else {
                log::warn!("Could not get logs dir to put the logs into");
            }
        }

        let env_filter = std::env::var("USERMANAGER_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let layer = free_log_client::init(logs_config.env_filter(&env_filter))?;

        Ok(layer)
    }
}

#[cfg(feature = "macros")]
#[macro_export]
macro_rules! debug_or_trace {
    (($($debug:tt)+), ($($trace:tt)+)) => {
        if $crate::log::log_enabled!(log::Level::Trace) {
            $crate::log::trace!($($trace)*);
        } else {
            $crate::log::debug!($($debug)*);
        }
    }
}
