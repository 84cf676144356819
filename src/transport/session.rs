//! Transport session builder.
//!
//! Produces ready-to-use connections for both channels: the shared HTTP
//! client (proxy-aware) for the chunked paths, and manually dialed
//! WebSocket connections for the duplex path. Also owns the header
//! surfaces: the credential cookie pair, the optional clearance cookie,
//! and the per-request anti-bot telemetry value.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite::client::IntoClientRequest, MaybeTlsStream,
    WebSocketStream,
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::{impersonate::ImpersonationProfile, tunnel, tunnel::ProxySpec};
use crate::{
    config::GenerationConfig,
    credentials::Credential,
    error::{ClientError, ClientResult},
};

pub(crate) type DuplexChannel = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// User agent sent on the duplex channel.
const DUPLEX_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default fingerprint surface for chunked requests (overridden per
/// impersonation profile).
const CHUNKED_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
const CHUNKED_SEC_CH_UA: &str =
    "\"Google Chrome\";v=\"133\", \"Chromium\";v=\"133\", \"Not(A:Brand\";v=\"24\"";

/// Observability baggage the web client attaches to every request.
const BAGGAGE: &str = "sentry-environment=production,sentry-release=d6add6fb0460641fd482d767a335ef72b9b6abb8,sentry-public_key=b311e0f2690c81f25e2c4cf6d4f7ce1c";

pub struct SessionBuilder {
    config: Arc<GenerationConfig>,
    http: reqwest::Client,
    proxy: Option<ProxySpec>,
}

impl SessionBuilder {
    pub fn new(config: Arc<GenerationConfig>) -> ClientResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.attempt_deadline);
        if let Some(proxy_url) = &config.proxy {
            builder = builder
                .proxy(reqwest::Proxy::all(proxy_url).map_err(|e| ClientError::Proxy(e.to_string()))?);
        }
        let http = builder.build()?;

        let proxy = config
            .proxy
            .as_deref()
            .map(ProxySpec::parse)
            .transpose()?;

        Ok(Self {
            config,
            http,
            proxy,
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn cookie_value(&self, credential: &Credential, with_clearance: bool) -> String {
        let token = credential.token();
        let mut cookie = format!("sso={token}; sso-rw={token}");
        if with_clearance {
            if let Some(clearance) = &self.config.cf_clearance {
                cookie.push_str(&format!("; cf_clearance={clearance}"));
            }
        }
        cookie
    }

    /// Header set for the duplex channel.
    pub(crate) fn duplex_headers(&self, credential: &Credential) -> Vec<(&'static str, String)> {
        vec![
            ("Cookie", self.cookie_value(credential, false)),
            ("Origin", self.config.origin.clone()),
            ("User-Agent", DUPLEX_USER_AGENT.to_string()),
            ("Accept-Language", "en-US,en;q=0.9".to_string()),
            ("Cache-Control", "no-cache".to_string()),
            ("Pragma", "no-cache".to_string()),
        ]
    }

    /// Header set for chunked requests. The request id and the telemetry
    /// value are regenerated on every call.
    pub(crate) fn chunked_headers(
        &self,
        credential: &Credential,
        referer: &str,
        profile: Option<&ImpersonationProfile>,
    ) -> ClientResult<HeaderMap> {
        let user_agent = profile.map_or(CHUNKED_USER_AGENT, |p| p.user_agent);
        let sec_ch_ua = profile.map_or(CHUNKED_SEC_CH_UA, |p| p.sec_ch_ua);

        let mut headers = HeaderMap::new();
        let entries: [(&str, String); 19] = [
            ("cookie", self.cookie_value(credential, true)),
            ("origin", self.config.origin.clone()),
            ("referer", referer.to_string()),
            ("user-agent", user_agent.to_string()),
            ("accept", "*/*".to_string()),
            ("content-type", "application/json".to_string()),
            ("accept-language", "en-US,en;q=0.9".to_string()),
            ("baggage", BAGGAGE.to_string()),
            ("sec-ch-ua", sec_ch_ua.to_string()),
            ("sec-ch-ua-mobile", "?0".to_string()),
            ("sec-ch-ua-platform", "\"Windows\"".to_string()),
            ("sec-ch-ua-arch", "x86".to_string()),
            ("sec-ch-ua-bitness", "64".to_string()),
            ("sec-fetch-dest", "empty".to_string()),
            ("sec-fetch-mode", "cors".to_string()),
            ("sec-fetch-site", "same-origin".to_string()),
            ("priority", "u=1, i".to_string()),
            ("x-xai-request-id", Uuid::new_v4().to_string()),
            ("x-statsig-id", statsig_value()),
        ];
        for (name, value) in entries {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| ClientError::Config(format!("invalid header value for {name}")))?;
            headers.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ClientError::Config(format!("invalid header name {name}")))?,
                value,
            );
        }
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
        headers.insert(reqwest::header::PRAGMA, HeaderValue::from_static("no-cache"));
        Ok(headers)
    }

    /// Dial the duplex endpoint (direct or tunneled) and complete the
    /// TLS + WebSocket handshake.
    pub(crate) async fn connect_duplex(&self, credential: &Credential) -> ClientResult<DuplexChannel> {
        let url = Url::parse(&self.config.duplex_url)
            .map_err(|e| ClientError::Config(format!("invalid duplex url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Config("duplex url missing host".to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let stream = tunnel::dial(&host, port, self.proxy.as_ref()).await?;

        let mut request = self.config.duplex_url.as_str().into_client_request()?;
        for (name, value) in self.duplex_headers(credential) {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| ClientError::Config(format!("invalid header value for {name}")))?;
            request.headers_mut().insert(name, value);
        }

        let (channel, response) = client_async_tls_with_config(request, stream, None, None).await?;
        debug!(host = %host, status = %response.status(), "duplex channel established");
        Ok(channel)
    }
}

/// Randomized-but-plausible anti-bot telemetry value, regenerated per
/// request: base64 of one of the two client-side error shapes the web app
/// produces.
pub(crate) fn statsig_value() -> String {
    let mut rng = rand::rng();
    let message = if rng.random_bool(0.5) {
        let tag = random_tag(&mut rng, b"abcdefghijklmnopqrstuvwxyz0123456789", 5);
        format!("e:TypeError: Cannot read properties of null (reading 'children['{tag}']')")
    } else {
        let tag = random_tag(&mut rng, b"abcdefghijklmnopqrstuvwxyz", 10);
        format!("e:TypeError: Cannot read properties of undefined (reading '{tag}')")
    };
    BASE64.encode(message)
}

fn random_tag(rng: &mut impl Rng, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::impersonate::PROFILES;

    fn session(config: GenerationConfig) -> SessionBuilder {
        SessionBuilder::new(Arc::new(config)).unwrap()
    }

    #[test]
    fn test_cookie_pair() {
        let session = session(GenerationConfig::default());
        let credential = Credential::new("tok");
        assert_eq!(session.cookie_value(&credential, false), "sso=tok; sso-rw=tok");
    }

    #[test]
    fn test_clearance_cookie_appended() {
        let config = GenerationConfig {
            cf_clearance: Some("clear123".to_string()),
            ..GenerationConfig::default()
        };
        let session = session(config);
        let credential = Credential::new("tok");
        assert_eq!(
            session.cookie_value(&credential, true),
            "sso=tok; sso-rw=tok; cf_clearance=clear123"
        );
        // The duplex channel never sends the clearance cookie.
        assert_eq!(session.cookie_value(&credential, false), "sso=tok; sso-rw=tok");
    }

    #[test]
    fn test_chunked_headers_fresh_per_request() {
        let session = session(GenerationConfig::default());
        let credential = Credential::new("tok");
        let first = session
            .chunked_headers(&credential, "https://grok.com/", None)
            .unwrap();
        let second = session
            .chunked_headers(&credential, "https://grok.com/", None)
            .unwrap();
        assert_ne!(
            first.get("x-xai-request-id").unwrap(),
            second.get("x-xai-request-id").unwrap()
        );
        assert_eq!(first.get("origin").unwrap(), "https://grok.com");
    }

    #[test]
    fn test_chunked_headers_honor_profile() {
        let session = session(GenerationConfig::default());
        let credential = Credential::new("tok");
        let headers = session
            .chunked_headers(&credential, "https://grok.com/imagine", Some(&PROFILES[0]))
            .unwrap();
        let user_agent = headers.get("user-agent").unwrap().to_str().unwrap();
        assert!(user_agent.contains("Chrome/136"));
    }

    #[test]
    fn test_statsig_value_shape() {
        for _ in 0..8 {
            let value = statsig_value();
            let decoded = BASE64.decode(value).unwrap();
            let decoded = String::from_utf8(decoded).unwrap();
            assert!(decoded.starts_with("e:TypeError: Cannot read properties of"));
        }
    }

    #[test]
    fn test_invalid_proxy_url_rejected() {
        let config = GenerationConfig {
            proxy: Some("ftp://nope".to_string()),
            ..GenerationConfig::default()
        };
        assert!(SessionBuilder::new(Arc::new(config)).is_err());
    }
}
