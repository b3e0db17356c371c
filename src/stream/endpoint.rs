//! Session endpoint addressing and handshake credential placement.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use url::Url;

use crate::stream::client::ClientError;

/// Local development chat endpoint; rooms live under it as path segments.
pub const LOCAL_CHAT_ENDPOINT: &str = "ws://localhost:8000/ws";

/// Address of the logical channel (for example a chat room) a client binds to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEndpoint {
    url: Url,
}

impl SessionEndpoint {
    /// Parses a `ws://` or `wss://` endpoint.
    pub fn parse(endpoint: &str) -> Result<Self, ClientError> {
        let url = Url::parse(endpoint.trim_end())?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(ClientError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Builds the endpoint of a room under `base`.
    ///
    /// `for_room("ws://localhost:8000/ws", "global")` addresses
    /// `ws://localhost:8000/ws/global`.
    pub fn for_room(base: &str, room_id: &str) -> Result<Self, ClientError> {
        let mut endpoint = Self::parse(base)?;
        endpoint
            .url
            .path_segments_mut()
            .map_err(|_| ClientError::UnsupportedScheme(endpoint_scheme(base)))?
            .pop_if_empty()
            .push(room_id);
        Ok(endpoint)
    }

    /// Returns the endpoint URL without any credential attached.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns the URL dialed for the handshake.
    ///
    /// With query placement the credential is appended as a query pair; any
    /// query already present on the endpoint is preserved.
    pub fn handshake_url(&self, credential: &Credential, placement: &CredentialPlacement) -> Url {
        let mut url = self.url.clone();
        if let CredentialPlacement::Query { name } = placement {
            url.query_pairs_mut().append_pair(name, credential.expose());
        }
        url
    }

    pub(crate) fn handshake_request(
        &self,
        credential: &Credential,
        placement: &CredentialPlacement,
    ) -> Result<Request, ClientError> {
        let mut request = self
            .handshake_url(credential, placement)
            .as_str()
            .into_client_request()?;
        if let CredentialPlacement::BearerHeader = placement {
            let value = format!("Bearer {}", credential.expose()).parse()?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

fn endpoint_scheme(endpoint: &str) -> String {
    endpoint.split(':').next().unwrap_or_default().to_string()
}

/// Opaque bearer token presented during the handshake.
///
/// The client never refreshes it; a fresh credential needs a fresh client.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Wraps a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into()))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<SecretString> for Credential {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Where the credential is carried in the handshake request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialPlacement {
    /// `<endpoint>?<name>=<credential>`.
    Query {
        /// Query parameter name.
        name: String,
    },
    /// `Authorization: Bearer <credential>`.
    BearerHeader,
}

impl Default for CredentialPlacement {
    fn default() -> Self {
        Self::Query {
            name: "token".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;

    use super::{Credential, CredentialPlacement, SessionEndpoint, LOCAL_CHAT_ENDPOINT};
    use crate::stream::client::ClientError;

    #[test]
    fn rejects_non_websocket_schemes() {
        let err = SessionEndpoint::parse("http://localhost:8000/ws").expect_err("http scheme");
        assert!(matches!(err, ClientError::UnsupportedScheme(scheme) if scheme == "http"));
        assert!(matches!(
            SessionEndpoint::parse("not a url"),
            Err(ClientError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        let endpoint = SessionEndpoint::parse("wss://chat.example/ws/lobby  \n").expect("endpoint");
        assert_eq!(endpoint.as_str(), "wss://chat.example/ws/lobby");
    }

    #[test]
    fn room_is_appended_as_last_segment() {
        let endpoint = SessionEndpoint::for_room(LOCAL_CHAT_ENDPOINT, "global").expect("endpoint");
        assert_eq!(endpoint.as_str(), "ws://localhost:8000/ws/global");

        let endpoint = SessionEndpoint::for_room("ws://localhost:8000/ws/", "team a").expect("endpoint");
        assert_eq!(endpoint.as_str(), "ws://localhost:8000/ws/team%20a");
    }

    #[test]
    fn credential_goes_into_token_query_by_default() {
        let endpoint = SessionEndpoint::parse("ws://localhost:8000/ws/global").expect("endpoint");
        let url = endpoint.handshake_url(&Credential::new("abc.def"), &CredentialPlacement::default());
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/global?token=abc.def");
        assert_eq!(endpoint.as_str(), "ws://localhost:8000/ws/global");
    }

    #[test]
    fn existing_query_is_preserved() {
        let endpoint = SessionEndpoint::parse("ws://localhost/ws?compress=false").expect("endpoint");
        let url = endpoint.handshake_url(
            &Credential::new("t"),
            &CredentialPlacement::Query {
                name: "access_token".to_string(),
            },
        );
        assert_eq!(url.as_str(), "ws://localhost/ws?compress=false&access_token=t");
    }

    #[test]
    fn bearer_header_placement_keeps_url_clean() {
        let endpoint = SessionEndpoint::parse("ws://localhost/ws").expect("endpoint");
        let request = endpoint
            .handshake_request(&Credential::new("secret"), &CredentialPlacement::BearerHeader)
            .expect("request");
        assert_eq!(request.uri().to_string(), "ws://localhost/ws");
        assert_eq!(
            request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer secret")
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let rendered = format!("{:?}", Credential::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }
}
