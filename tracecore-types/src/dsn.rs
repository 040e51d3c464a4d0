//! DSN parsing: `PROTO://PUBLICKEY@HOST[:PORT]/PROJECT_ID`.

use std::fmt;

use url::Url;

use crate::error::Error;

/// Parsed components of a DSN, per spec.md §6.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dsn {
    pub protocol: String,
    pub public_key: String,
    pub host: String,
    pub port: Option<u16>,
    pub project_id: String,
    pub path: Option<String>,
}

impl Dsn {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let url = Url::parse(raw).map_err(|e| Error::InvalidDsn(e.to_string()))?;

        let protocol = url.scheme().to_owned();
        if protocol.is_empty() {
            return Err(Error::InvalidDsn("missing protocol".into()));
        }

        let public_key = url.username().to_owned();
        if public_key.is_empty() {
            return Err(Error::InvalidDsn("missing public key".into()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidDsn("missing host".into()))?
            .to_owned();

        let port = url.port();

        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let project_id = segments
            .pop()
            .ok_or_else(|| Error::InvalidDsn("missing project id".into()))?
            .to_owned();

        let path = if segments.is_empty() {
            None
        } else {
            Some(format!("/{}", segments.join("/")))
        };

        Ok(Dsn {
            protocol,
            public_key,
            host,
            port,
            project_id,
            path,
        })
    }

    /// The envelope-endpoint URL this DSN posts to, per spec.md §6.
    pub fn envelope_endpoint(&self) -> String {
        let port = self
            .port
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        let path = self.path.as_deref().unwrap_or("");
        format!(
            "{}://{}{}{}/api/{}/envelope/",
            self.protocol, self.host, port, path, self.project_id
        )
    }
}

impl fmt::Display for Dsn {
    /// Renders the DSN without the (never-present in modern DSNs) secret key,
    /// as required for envelope headers in spec.md §6.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = self
            .port
            .map(|p| format!(":{}", p))
            .unwrap_or_default();
        let path = self.path.as_deref().unwrap_or("");
        write!(
            f,
            "{}://{}@{}{}{}/{}",
            self.protocol, self.public_key, self.host, port, path, self.project_id
        )
    }
}
