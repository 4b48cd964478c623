use crate::config::Config;
use crate::request_log::RequestLog;
use crate::upstream::UpstreamClient;

/// Built once at startup and handed to handlers through the depot.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub upstream: UpstreamClient,
    pub request_log: RequestLog,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, String> {
        let upstream = UpstreamClient::new(&config)?;
        let request_log = RequestLog::new(config.log_dir.clone());
        Ok(Self {
            config,
            upstream,
            request_log,
        })
    }
}
