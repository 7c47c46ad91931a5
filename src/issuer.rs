use crate::access_log::{AccessLog, AccessLogEntry};
use crate::clock::Clock;
use crate::error::{InvalidRequest, IssueError};
use crate::rate_limit::{RateLimitStore, RateLimits};
use crate::resource::{AudioLibrary, ResourceId};
use crate::session::{ClientInfo, SessionContext};
use crate::signer::{SignatureError, UrlSigner};
use anyhow::{Context, Result, anyhow};
use axum::http::StatusCode;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the issuer needs, fixed at construction
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    pub secret_key: String,
    pub ttl_secs: u64,
    pub limits: RateLimits,
    pub audio_dir: PathBuf,
    pub base_url: String,
    pub file_extension: String,
}

/// Successful issuance.
///
/// Only `url`, `expires_at` and `expires_in` go over the wire; the rest is kept
/// for callers that want the raw token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: String,
    pub expires_in: u64,
    #[serde(skip)]
    pub filename: String,
    #[serde(skip)]
    pub token: String,
    #[serde(skip)]
    pub expires_unix: i64,
}

/// Issues and verifies time-limited signed URLs for audio tracks
pub struct Issuer {
    signer: UrlSigner,
    library: AudioLibrary,
    limits: RateLimits,
    ttl_secs: i64,
    base_url: String,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    access_log: AccessLog,
}

impl Issuer {
    pub fn new(
        config: IssuerConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        access_log: AccessLog,
    ) -> Result<Self> {
        if config.secret_key.is_empty() {
            return Err(anyhow!("Secret key cannot be empty"));
        }
        let signer = UrlSigner::new(config.secret_key.as_bytes())
            .map_err(|_| anyhow!("Invalid signing key"))?;
        let ttl_secs = i64::try_from(config.ttl_secs).context("Token TTL out of range")?;

        let library = AudioLibrary::open(&config.audio_dir, &config.file_extension)
            .with_context(|| format!("Failed to open audio dir {}", config.audio_dir.display()))?;

        let mut base_url = config.base_url;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        info!(
            audio_dir = %library.root().display(),
            %base_url,
            ttl_secs,
            per_hour = config.limits.per_hour,
            per_day = config.limits.per_day,
            "Signed URL issuer ready"
        );

        Ok(Self {
            signer,
            library,
            limits: config.limits,
            ttl_secs,
            base_url,
            store,
            clock,
            access_log,
        })
    }

    pub fn library(&self) -> &AudioLibrary {
        &self.library
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issue a signed URL for `track_id`.
    ///
    /// Checks run cheapest first: identifier, rate limit, then the filesystem.
    /// A request that fails the identifier check does not touch the counters;
    /// one that fails the file lookup has already used its slot.
    pub async fn issue_signed_url(
        &self,
        track_id: Option<&str>,
        session: &SessionContext,
        client: &ClientInfo,
    ) -> Result<SignedUrl, IssueError> {
        let raw = track_id.ok_or(InvalidRequest::MissingResourceId)?;
        let id = ResourceId::parse(raw)
            .inspect_err(|error| debug!(%error, track_id = raw, "Rejected track_id"))?;

        let now = self.clock.now();
        if let Err(exceeded) = self
            .store
            .check_and_increment(&session.id, now, &self.limits)
        {
            warn!(
                session = %session.tag(),
                window = %exceeded.window,
                retry_after_secs = exceeded.retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(IssueError::RateLimited(exceeded));
        }

        let resolved = match self.library.resolve(&id).await {
            Ok(resolved) => resolved,
            Err(error) => {
                let error = IssueError::from(error);
                self.log_access(now, &id, session, client, error.to_err_code())
                    .await;
                return Err(error);
            }
        };

        let expires_unix = now.timestamp() + self.ttl_secs;
        let expires_at = Utc
            .timestamp_opt(expires_unix, 0)
            .single()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, false))
            .ok_or_else(|| IssueError::Internal(std::io::Error::other("expiry out of range")))?;

        let token = self.signer.sign(&resolved.filename, expires_unix);
        let url = format!(
            "{}{}?token={token}&expires={expires_unix}",
            self.base_url, resolved.filename
        );

        self.log_access(now, &id, session, client, StatusCode::OK)
            .await;

        Ok(SignedUrl {
            url,
            expires_at,
            expires_in: self.ttl_secs as u64,
            filename: resolved.filename,
            token,
            expires_unix,
        })
    }

    /// Verify a token for `filename`, reporting why it failed
    pub fn check_signed_url(
        &self,
        filename: &str,
        token: &str,
        expires_unix: i64,
    ) -> Result<(), SignatureError> {
        self.signer
            .verify(filename, token, expires_unix, self.clock.unix())
    }

    /// True iff the token matches `filename + expires_unix` and has not expired
    pub fn verify_signed_url(&self, filename: &str, token: &str, expires_unix: i64) -> bool {
        self.check_signed_url(filename, token, expires_unix).is_ok()
    }

    async fn log_access(
        &self,
        now: DateTime<Utc>,
        id: &ResourceId,
        session: &SessionContext,
        client: &ClientInfo,
        status: StatusCode,
    ) {
        let entry = AccessLogEntry::new(
            now,
            session.user_id.as_deref(),
            id.as_str(),
            client.ip.as_deref(),
            client.user_agent.as_deref(),
            status.as_u16(),
        );
        self.access_log.record(&entry).await;
    }
}
