use chrono::{SecondsFormat, Utc};
use salvo::http::StatusCode;
use tracing_subscriber::EnvFilter;

pub fn to_salvo_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

pub fn now_timestamp_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn init_tracing(log_level: &str) {
    let normalized = log_level
        .split_whitespace()
        .next()
        .unwrap_or("info")
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalized));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::{now_timestamp_string, to_salvo_status};

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let stamp = now_timestamp_string();
        assert!(stamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    #[test]
    fn maps_upstream_status_codes() {
        assert_eq!(
            to_salvo_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY).as_u16(),
            422
        );
    }
}
