//! Authentication challenges and credentials.

use std::fmt::{self, Write as _};

use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::response::Response;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationMethod {
    HttpBasic,
    HttpDigest,
    Negotiate,
    Ntlm,
    Unknown(String),
}

impl AuthenticationMethod {
    fn from_scheme(scheme: &str) -> Self {
        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Self::HttpBasic,
            "digest" => Self::HttpDigest,
            "negotiate" => Self::Negotiate,
            "ntlm" => Self::Ntlm,
            _ => Self::Unknown(scheme.to_string()),
        }
    }

    /// Basic and Digest challenges go to the task, everything else to the session.
    #[must_use]
    pub fn is_task_level(&self) -> bool {
        matches!(self, Self::HttpBasic | Self::HttpDigest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    pub host: String,
    pub port: u16,
    pub realm: Option<String>,
    pub authentication_method: AuthenticationMethod,
}

impl ProtectionSpace {
    /// Parses a `WWW-Authenticate` value such as `Basic realm="Fake Realm"`.
    #[must_use]
    pub fn from_www_authenticate(host: &str, port: u16, header: &str) -> Self {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        let realm = auth_params(params)
            .into_iter()
            .find_map(|(key, value)| (key == "realm").then_some(value));

        Self {
            host: host.to_string(),
            port,
            realm,
            authentication_method: AuthenticationMethod::from_scheme(scheme),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPersistence {
    None,
    ForSession,
    Permanent,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
    pub persistence: CredentialPersistence,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            persistence: CredentialPersistence::ForSession,
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: CredentialPersistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// `Authorization` header value for HTTP Basic.
    #[must_use]
    pub fn basic_authorization(&self) -> String {
        let raw = format!("{}:{}", self.user, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"***")
            .field("persistence", &self.persistence)
            .finish()
    }
}

/// Splits `key=value` auth-params; quoted values may contain commas.
///
/// Keys come back lowercased.
#[must_use]
pub fn auth_params(params: &str) -> Vec<(String, String)> {
    let mut parsed = Vec::new();
    let mut rest = params.trim();

    while let Some((key, after)) = rest.split_once('=') {
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        parsed.push((key, value.trim().to_string()));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    parsed
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// `None` for algorithms this crate cannot answer, including the `-sess` variants.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }

    /// Lowercase hex digest of `input`.
    #[must_use]
    pub fn hash_hex(self, input: &str) -> String {
        match self {
            Self::Md5 => hex(&Md5::digest(input.as_bytes())),
            Self::Sha256 => hex(&Sha256::digest(input.as_bytes())),
        }
    }
}

/// Parameters of a `Digest` challenge (RFC 7616).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// The server offered `qop=auth`.
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// `None` for other schemes, a missing nonce or an unsupported algorithm.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let params = auth_params(params);
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let algorithm = match param("algorithm") {
            Some(token) => DigestAlgorithm::from_token(&token)?,
            None => DigestAlgorithm::Md5,
        };

        Some(Self {
            realm: param("realm").unwrap_or_default(),
            nonce: param("nonce")?,
            opaque: param("opaque"),
            algorithm,
            qop_auth: param("qop").is_some_and(|qop| {
                qop.split(',')
                    .any(|option| option.trim().eq_ignore_ascii_case("auth"))
            }),
        })
    }

    /// `Authorization` value answering this challenge for `method uri`.
    ///
    /// `nonce_count` is the number of requests sent with this nonce, this one included.
    #[must_use]
    pub fn authorization(
        &self,
        credential: &Credential,
        method: &str,
        uri: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let hash = |input: String| self.algorithm.hash_hex(&input);
        let ha1 = hash(format!(
            "{}:{}:{}",
            credential.user, self.realm, credential.password
        ));
        let ha2 = hash(format!("{method}:{uri}"));

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", algorithm={}",
            credential.user,
            self.realm,
            self.nonce,
            self.algorithm.token()
        );
        if self.qop_auth {
            let nc = format!("{nonce_count:08x}");
            let response = hash(format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce));
            let _ = write!(
                header,
                ", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""
            );
        } else {
            let response = hash(format!("{ha1}:{}:{ha2}", self.nonce));
            let _ = write!(header, ", response=\"{response}\"");
        }
        if let Some(opaque) = &self.opaque {
            let _ = write!(header, ", opaque=\"{opaque}\"");
        }
        header
    }
}

/// Credentials bound to the scheme they answer.
#[derive(Debug, Clone)]
pub(crate) enum ChallengeAnswer {
    Basic(Credential),
    Digest {
        credential: Credential,
        challenge: DigestChallenge,
        nonce_count: u32,
    },
}

impl ChallengeAnswer {
    /// Header value for the next request; digest answers count each use of their nonce.
    pub(crate) fn authorization(&mut self, method: &str, uri: &str) -> String {
        match self {
            Self::Basic(credential) => credential.basic_authorization(),
            Self::Digest {
                credential,
                challenge,
                nonce_count,
            } => {
                *nonce_count += 1;
                let cnonce = format!("{:016x}", fastrand::u64(..));
                challenge.authorization(credential, method, uri, *nonce_count, &cnonce)
            }
        }
    }
}

/// A server-issued request for credentials.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub protection_space: ProtectionSpace,
    /// Challenges already answered for this task.
    pub previous_failure_count: usize,
    pub proposed_credential: Option<Credential>,
    pub failure_response: Option<Response>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeDisposition {
    UseCredential,
    PerformDefaultHandling,
    CancelAuthenticationChallenge,
    RejectProtectionSpace,
}

/// What a challenge hook completes with.
pub type ChallengeResolution = (ChallengeDisposition, Option<Credential>);
