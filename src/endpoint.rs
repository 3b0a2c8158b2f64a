use uuid::Uuid;
use crate::config::IngestConfig;
use crate::types::SessionCredentials;

/// Builds the ingest URL:
/// `scheme://host:port/ws/ingest/{sessionId}/{publisherId}?token={authToken}`.
///
/// The scheme is `wss` for a secure origin, `ws` otherwise. When an override
/// base is configured it wins; if the override already carries a ws scheme it
/// is used verbatim, otherwise the derived scheme is prefixed.
pub fn build_ingest_url(
    config: &IngestConfig,
    credentials: &SessionCredentials,
    publisher_id: &Uuid,
) -> String {
    let token = urlencoding::encode(&credentials.auth_token);
    let path = format!(
        "/ws/ingest/{}/{}?token={}",
        credentials.session_id, publisher_id, token
    );

    if let Some(override_base) = config
        .override_base
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
    {
        let base = if override_base.starts_with("ws") {
            override_base.to_string()
        } else {
            let scheme = if config.secure { "wss" } else { "ws" };
            format!("{}://{}", scheme, override_base.trim_start_matches("//"))
        };
        return format!("{}{}", base.trim_end_matches('/'), path);
    }

    let scheme = if config.secure { "wss" } else { "ws" };
    let host = if config.host.is_empty() {
        "localhost"
    } else {
        &config.host
    };
    let port = config
        .port
        .unwrap_or(if config.secure { 443 } else { 8080 });

    format!("{}://{}:{}{}", scheme, host, port, path)
}

/// Builds the playback manifest URL: `{dasherBase}/dash/{sessionId}/manifest.mpd`.
pub fn manifest_url(dasher_base: &str, session_id: &str) -> String {
    format!(
        "{}/dash/{}/manifest.mpd",
        dasher_base.trim_end_matches('/'),
        session_id
    )
}
