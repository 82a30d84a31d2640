use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::{
    JwtConfig, MAX_ACCESS_TOKEN_MINUTES, MAX_REFRESH_TOKEN_DAYS, MIN_JWT_SECRET_BYTES,
};
use crate::models::{Identity, RefreshToken};
use crate::services::{RefreshTokenStore, ServiceError};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Issues HS256 access tokens and persisted, rotating refresh tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_lifetime: Duration,
    remember_me_access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
    remember_me_refresh_token_lifetime: Duration,
}

fn minutes(name: &str, value: i64) -> Result<Duration, anyhow::Error> {
    if !(1..=MAX_ACCESS_TOKEN_MINUTES).contains(&value) {
        return Err(anyhow::anyhow!(
            "{} must be between 1 and {} minutes",
            name,
            MAX_ACCESS_TOKEN_MINUTES
        ));
    }
    Duration::try_minutes(value).ok_or_else(|| anyhow::anyhow!("{} is out of range", name))
}

fn days(name: &str, value: i64) -> Result<Duration, anyhow::Error> {
    if !(1..=MAX_REFRESH_TOKEN_DAYS).contains(&value) {
        return Err(anyhow::anyhow!(
            "{} must be between 1 and {} days",
            name,
            MAX_REFRESH_TOKEN_DAYS
        ));
    }
    Duration::try_days(value).ok_or_else(|| anyhow::anyhow!("{} is out of range", name))
}

/// Claims carried by an access token.
///
/// There is no random `jti`: two tokens for the same identity signed at the
/// same second are byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (identity ID)
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// A signed access token and the instant it stops being accepted.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A freshly persisted refresh token. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

impl JwtService {
    /// Build the service from configuration.
    ///
    /// A missing or short signing secret, or a lifetime outside its bounds, is a
    /// startup error.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        if config.secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(anyhow::anyhow!(
                "JWT signing secret must be at least {} bytes",
                MIN_JWT_SECRET_BYTES
            ));
        }

        let secret = config.secret.as_bytes();

        tracing::info!(issuer = %config.issuer, "JWT service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_lifetime: minutes("access token lifetime", config.access_token_minutes)?,
            remember_me_access_token_lifetime: minutes(
                "remember-me access token lifetime",
                config.remember_me_access_token_minutes,
            )?,
            refresh_token_lifetime: days("refresh token lifetime", config.refresh_token_days)?,
            remember_me_refresh_token_lifetime: days(
                "remember-me refresh token lifetime",
                config.remember_me_refresh_token_days,
            )?,
        })
    }

    pub fn access_token_lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_access_token_lifetime
        } else {
            self.access_token_lifetime
        }
    }

    pub fn refresh_token_lifetime(&self, remember_me: bool) -> Duration {
        if remember_me {
            self.remember_me_refresh_token_lifetime
        } else {
            self.refresh_token_lifetime
        }
    }

    /// Sign an access token for `identity`.
    pub fn issue_access_token(
        &self,
        identity: &Identity,
        remember_me: bool,
    ) -> Result<AccessToken, anyhow::Error> {
        self.issue_access_token_at(identity, remember_me, Utc::now())
    }

    /// Sign an access token as if the clock read `now`.
    pub fn issue_access_token_at(
        &self,
        identity: &Identity,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<AccessToken, anyhow::Error> {
        let exp = now
            .checked_add_signed(self.access_token_lifetime(remember_me))
            .ok_or_else(|| anyhow::anyhow!("Access token expiry out of range"))?;

        let claims = AccessTokenClaims {
            sub: identity.id.to_string(),
            email: identity.email.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        // Expiry is reported at the same second granularity the token carries
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(exp);

        Ok(AccessToken { token, expires_at })
    }

    /// Generate an opaque refresh token for `identity` and persist its record.
    pub async fn issue_refresh_token<S>(
        &self,
        store: &S,
        identity: &Identity,
        remember_me: bool,
    ) -> Result<IssuedRefreshToken, ServiceError>
    where
        S: RefreshTokenStore + ?Sized,
    {
        let (token, record) = RefreshToken::issue(
            identity.id,
            self.refresh_token_lifetime(remember_me),
            Utc::now(),
        )?;

        store.insert_refresh_token(&record).await?;

        tracing::debug!(
            identity_id = %identity.id,
            refresh_token_id = %record.id,
            expires_at = %record.expires_at,
            "Refresh token issued"
        );

        Ok(IssuedRefreshToken { token, record })
    }

    /// Verify signature, issuer, audience and expiry of an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }
}
