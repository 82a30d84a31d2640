use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        auth::{AuthResponse, CurrentUserResponse, LoginRequest, RegisterRequest},
        MessageResponse,
    },
    models::{Identity, NewIdentity, NewProfile},
    services::{IdentityStore, JwtService, ProfileStore, RefreshTokenStore, ServiceError, Session},
};

/// Login, refresh-token rotation, logout and registration.
///
/// Every operation runs against the caller's [`Session`], so the surrounding
/// unit of work decides whether its writes share one transaction.
#[derive(Clone)]
pub struct AuthService {
    jwt: JwtService,
}

impl AuthService {
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt }
    }

    pub async fn login(
        &self,
        session: &dyn Session,
        req: LoginRequest,
    ) -> Result<AuthResponse, ServiceError> {
        req.validate()?;

        let identity = match session.find_identity_by_email(&req.email).await? {
            Some(identity) => identity,
            None => {
                tracing::warn!("Login failed: unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
        };

        if !session.check_password(&identity, &req.password).await? {
            tracing::warn!(identity_id = %identity.id, "Login failed: password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }

        let response = self.issue_tokens(session, &identity, req.remember_me).await?;

        tracing::info!(
            identity_id = %identity.id,
            remember_me = req.remember_me,
            "User logged in"
        );

        Ok(response)
    }

    /// Exchange an active refresh token for a new access/refresh pair.
    pub async fn refresh(
        &self,
        session: &dyn Session,
        token: &str,
    ) -> Result<AuthResponse, ServiceError> {
        self.refresh_at(session, token, Utc::now()).await
    }

    /// [`AuthService::refresh`] with an explicit clock reading.
    pub async fn refresh_at(
        &self,
        session: &dyn Session,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthResponse, ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::InvalidRefreshToken);
        }

        let (record, identity) = session
            .find_refresh_token(token)
            .await?
            .ok_or(ServiceError::InvalidRefreshToken)?;

        if !record.is_active_at(now) {
            tracing::warn!(
                identity_id = %identity.id,
                refresh_token_id = %record.id,
                is_used = record.is_used,
                is_revoked = record.is_revoked,
                "Refresh rejected: token not active"
            );
            return Err(ServiceError::InvalidRefreshToken);
        }

        // Conditional update: only one concurrent caller can win the token
        if !session.mark_refresh_token_used(record.id, now).await? {
            tracing::warn!(
                identity_id = %identity.id,
                refresh_token_id = %record.id,
                "Refresh rejected: token consumed concurrently"
            );
            return Err(ServiceError::InvalidRefreshToken);
        }

        let response = self.issue_tokens(session, &identity, true).await?;

        tracing::info!(
            identity_id = %identity.id,
            rotated_from = %record.id,
            "Refresh token rotated"
        );

        Ok(response)
    }

    /// Revoke every active refresh token of the identity.
    pub async fn logout(&self, session: &dyn Session, identity_id: Uuid) -> Result<u64, ServiceError> {
        let revoked = session.revoke_refresh_tokens(identity_id, Utc::now()).await?;

        tracing::info!(identity_id = %identity_id, revoked, "User logged out");

        Ok(revoked)
    }

    /// Create an identity and its profile. No tokens are issued.
    pub async fn register(
        &self,
        session: &dyn Session,
        req: RegisterRequest,
    ) -> Result<MessageResponse, ServiceError> {
        req.validate()?;

        let user = req.user;
        let new_identity = NewIdentity {
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            profile: NewProfile {
                first_name: user.first_name,
                last_name: user.last_name,
                email: user.email,
                phone_number: user.phone_number,
                zip_code: user.zip_code,
            },
        };

        let (identity, profile) = session.create_identity(new_identity, &req.password).await?;

        tracing::info!(
            identity_id = %identity.id,
            user_profile_id = %profile.id,
            "User registered"
        );

        Ok(MessageResponse::new("User registered successfully"))
    }

    pub async fn current_user(
        &self,
        session: &dyn Session,
        identity_id: Uuid,
    ) -> Result<CurrentUserResponse, ServiceError> {
        let identity = session
            .find_identity_by_id(identity_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        let profile = session
            .find_profile_by_identity(identity_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User profile not found".to_string()))?;

        Ok(CurrentUserResponse {
            id: identity.id,
            user_profile_id: profile.id,
            email: identity.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
        })
    }

    async fn issue_tokens(
        &self,
        session: &dyn Session,
        identity: &Identity,
        remember_me: bool,
    ) -> Result<AuthResponse, ServiceError> {
        let access = self.jwt.issue_access_token(identity, remember_me)?;
        let refresh = self
            .jwt
            .issue_refresh_token(session, identity, remember_me)
            .await?;

        Ok(AuthResponse {
            access_token: access.token,
            access_expiry: access.expires_at,
            refresh_token: refresh.token,
            refresh_expiry: refresh.record.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::dtos::user::UserDto;
    use crate::models::RefreshToken;
    use crate::services::{DataSource, MemoryDataSource, UnitOfWork};
    use chrono::Duration;

    struct Fixture {
        data: MemoryDataSource,
        auth: AuthService,
        jwt: JwtService,
    }

    fn fixture() -> Fixture {
        let jwt = JwtService::new(&test_config().jwt).unwrap();
        Fixture {
            data: MemoryDataSource::default(),
            auth: AuthService::new(jwt.clone()),
            jwt,
        }
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            user: UserDto {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: email.to_string(),
                phone_number: None,
                zip_code: None,
            },
            password: password.to_string(),
        }
    }

    fn login_request(email: &str, password: &str, remember_me: bool) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            remember_me,
        }
    }

    async fn registered(fx: &Fixture) -> Identity {
        let session = fx.data.session();
        fx.auth
            .register(session.as_ref(), register_request("a@x.com", "correct1"))
            .await
            .unwrap();
        session.find_identity_by_email("a@x.com").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_login_issues_short_lived_pair() {
        let fx = fixture();
        let identity = registered(&fx).await;
        let session = fx.data.session();

        let before = Utc::now();
        let response = fx
            .auth
            .login(session.as_ref(), login_request("a@x.com", "correct1", false))
            .await
            .unwrap();

        let claims = fx.jwt.validate_access_token(&response.access_token).unwrap();
        assert_eq!(claims.sub, identity.id.to_string());

        let refresh_lifetime = response.refresh_expiry - before;
        assert!(refresh_lifetime >= Duration::days(7) - Duration::seconds(5));
        assert!(refresh_lifetime <= Duration::days(7) + Duration::seconds(5));
        assert_eq!(fx.data.refresh_tokens_for(identity.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_login_email_is_case_insensitive() {
        let fx = fixture();
        registered(&fx).await;

        let result = fx
            .auth
            .login(
                fx.data.session().as_ref(),
                login_request("A@X.com", "correct1", true),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_the_same() {
        let fx = fixture();
        registered(&fx).await;
        let session = fx.data.session();

        let wrong = fx
            .auth
            .login(session.as_ref(), login_request("a@x.com", "wrong1", false))
            .await
            .unwrap_err();
        let unknown = fx
            .auth
            .login(session.as_ref(), login_request("b@x.com", "correct1", false))
            .await
            .unwrap_err();

        assert!(matches!(wrong, ServiceError::InvalidCredentials));
        assert!(matches!(unknown, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_malformed_login_is_a_validation_error() {
        let fx = fixture();
        let err = fx
            .auth
            .login(fx.data.session().as_ref(), login_request("not-an-email", "", false))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(ref m) if m.len() == 2));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_refuses_replay() {
        let fx = fixture();
        let identity = registered(&fx).await;
        let session = fx.data.session();

        let login = fx
            .auth
            .login(session.as_ref(), login_request("a@x.com", "correct1", false))
            .await
            .unwrap();

        let rotated = fx
            .auth
            .refresh(session.as_ref(), &login.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, login.refresh_token);

        let tokens = fx.data.refresh_tokens_for(identity.id).unwrap();
        assert!(tokens[0].is_used);
        assert!(!tokens[1].is_used);
        // Rotation issues the long-lived variant
        assert_eq!(tokens[1].expires_at - tokens[1].created_at, Duration::days(30));

        let replay = fx.auth.refresh(session.as_ref(), &login.refresh_token).await;
        assert!(matches!(replay, Err(ServiceError::InvalidRefreshToken)));

        assert!(fx
            .auth
            .refresh(session.as_ref(), &rotated.refresh_token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_or_blank_refresh_token_is_rejected() {
        let fx = fixture();
        let session = fx.data.session();

        for token in ["", "   ", "deadbeef"] {
            let result = fx.auth.refresh(session.as_ref(), token).await;
            assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));
        }
    }

    #[tokio::test]
    async fn test_refresh_token_at_expiry_instant_is_rejected() {
        let fx = fixture();
        let identity = registered(&fx).await;
        let session = fx.data.session();

        let issued = Utc::now();
        let (plaintext, record) =
            RefreshToken::issue(identity.id, Duration::days(7), issued).unwrap();
        session.insert_refresh_token(&record).await.unwrap();

        let at_expiry = fx
            .auth
            .refresh_at(session.as_ref(), &plaintext, record.expires_at)
            .await;
        assert!(matches!(at_expiry, Err(ServiceError::InvalidRefreshToken)));

        let just_before = fx
            .auth
            .refresh_at(
                session.as_ref(),
                &plaintext,
                record.expires_at - Duration::milliseconds(1),
            )
            .await;
        assert!(just_before.is_ok());
    }

    #[tokio::test]
    async fn test_expired_unused_token_is_rejected() {
        let fx = fixture();
        let identity = registered(&fx).await;
        let session = fx.data.session();

        let (plaintext, record) = RefreshToken::issue(
            identity.id,
            Duration::days(7),
            Utc::now() - Duration::days(8),
        )
        .unwrap();
        session.insert_refresh_token(&record).await.unwrap();

        let result = fx.auth.refresh(session.as_ref(), &plaintext).await;
        assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));
        assert!(!fx.data.refresh_tokens_for(identity.id).unwrap()[0].is_used);
    }

    #[tokio::test]
    async fn test_logout_revokes_every_active_token() {
        let fx = fixture();
        let identity = registered(&fx).await;
        let session = fx.data.session();

        let first = fx
            .auth
            .login(session.as_ref(), login_request("a@x.com", "correct1", false))
            .await
            .unwrap();
        let second = fx
            .auth
            .login(session.as_ref(), login_request("a@x.com", "correct1", true))
            .await
            .unwrap();

        assert_eq!(fx.auth.logout(session.as_ref(), identity.id).await.unwrap(), 2);

        for token in [&first.refresh_token, &second.refresh_token] {
            let result = fx.auth.refresh(session.as_ref(), token).await;
            assert!(matches!(result, Err(ServiceError::InvalidRefreshToken)));
        }

        assert!(fx
            .data
            .refresh_tokens_for(identity.id)
            .unwrap()
            .iter()
            .all(|t| t.is_revoked && t.revoked_at.is_some()));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_exactly_one_winner() {
        let fx = fixture();
        registered(&fx).await;

        let login = fx
            .auth
            .login(
                fx.data.session().as_ref(),
                login_request("a@x.com", "correct1", false),
            )
            .await
            .unwrap();

        let attempt = || {
            let auth = fx.auth.clone();
            let data = fx.data.clone();
            let token = login.refresh_token.clone();
            tokio::spawn(async move {
                UnitOfWork::default()
                    .execute(&data, |session| async move {
                        auth.refresh(session.as_ref(), &token).await
                    })
                    .await
            })
        };

        let (a, b) = tokio::join!(attempt(), attempt());
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ServiceError::InvalidRefreshToken))));
    }

    #[tokio::test]
    async fn test_register_short_password_is_a_validation_error() {
        let fx = fixture();
        let err = fx
            .auth
            .register(fx.data.session().as_ref(), register_request("a@x.com", "abc"))
            .await
            .unwrap_err();

        match err {
            ServiceError::Validation(messages) => assert!(messages
                .iter()
                .any(|m| m == "Password must be between 6 and 100 characters")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fx.data.identity_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_policy_and_duplicate_are_creation_errors() {
        let fx = fixture();
        registered(&fx).await;
        let session = fx.data.session();

        let no_digit = fx
            .auth
            .register(session.as_ref(), register_request("b@x.com", "nodigits"))
            .await
            .unwrap_err();
        assert!(matches!(no_digit, ServiceError::Creation(ref m) if m[0].contains("digit")));

        let duplicate = fx
            .auth
            .register(session.as_ref(), register_request("a@x.com", "correct1"))
            .await
            .unwrap_err();
        assert!(
            matches!(duplicate, ServiceError::Creation(ref m) if m[0] == "Username 'a@x.com' is already taken.")
        );
    }

    #[tokio::test]
    async fn test_current_user_combines_identity_and_profile() {
        let fx = fixture();
        let identity = registered(&fx).await;

        let current = fx
            .auth
            .current_user(fx.data.session().as_ref(), identity.id)
            .await
            .unwrap();

        assert_eq!(current.id, identity.id);
        assert_eq!(current.email, "a@x.com");
        assert_eq!(current.first_name, "Ada");

        let missing = fx
            .auth
            .current_user(fx.data.session().as_ref(), Uuid::new_v4())
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }
}
