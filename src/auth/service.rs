use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::{JwtKeys, TokenError},
        oauth::{GoogleOAuth, GoogleProfile},
        password::{hash_password, verify_password},
    },
    error::{ApiError, ApiResult, StoreError},
    mailer::Mailer,
    users::repo::{NewUser, User, UserStore},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.len() < 8 {
        return Err(ApiError::WeakPassword);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// How an OAuth identity mapped onto the credential store.
#[derive(Debug)]
pub enum OAuthLogin {
    Found(User),
    Created(User),
}

impl OAuthLogin {
    pub fn into_user(self) -> User {
        match self {
            OAuthLogin::Found(u) | OAuthLogin::Created(u) => u,
        }
    }
}

/// The authentication flows as one constructed object: credential check,
/// token issuance, OAuth identity resolution and the password flows.
/// Shared via `AppState`; there is no process-wide registry.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    google: Option<GoogleOAuth>,
    admin_email: Option<String>,
    public_base_url: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        keys: JwtKeys,
        google: Option<GoogleOAuth>,
        admin_email: Option<String>,
        public_base_url: String,
    ) -> Self {
        Self {
            users,
            mailer,
            keys,
            google,
            admin_email,
            public_base_url,
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    fn is_admin_email(&self, email: &str) -> bool {
        self.admin_email.as_deref() == Some(email)
    }

    /// Create an account and log it in. Email uniqueness is the store's
    /// unique index: we insert and map the conflict, never check first.
    pub async fn signup(&self, input: SignupInput) -> ApiResult<(String, User)> {
        let email = normalize_email(&input.email);
        if !is_valid_email(&email) {
            return Err(ApiError::InvalidEmail);
        }
        validate_password(&input.password)?;

        let hash = hash_password(&input.password)?;
        let user = self
            .users
            .insert(NewUser {
                username: input.username,
                email: email.clone(),
                password_hash: Some(hash),
                google_id: None,
                image: None,
                is_admin: self.is_admin_email(&email),
            })
            .await?;

        let token = self.keys.sign_session(user.id, &user.username, &user.email)?;
        if let Err(e) = self.mailer.send_welcome(&user.email, &user.username).await {
            warn!(error = %e, user_id = %user.id, "welcome mail failed");
        }
        info!(user_id = %user.id, "user signed up");
        Ok((token, user))
    }

    /// Unknown email, an OAuth-only account and a wrong password all come
    /// back as the same `InvalidCredentials`; the response never tells an
    /// attacker which accounts exist.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<(String, User)> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(ApiError::InvalidCredentials);
        }

        let user = match self.users.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                warn!("login unknown email");
                return Err(ApiError::InvalidCredentials);
            }
        };
        let ok = match user.password_hash.as_deref() {
            Some(hash) => verify_password(password, hash),
            None => false, // OAuth-only account
        };
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(ApiError::InvalidCredentials);
        }

        let token = self.keys.sign_session(user.id, &user.username, &user.email)?;
        info!(user_id = %user.id, "user logged in");
        Ok((token, user))
    }

    /// Map a provider identity onto the store. A lost insert race resolves
    /// to `Found`, so repeated callbacks with the same provider id always
    /// land on one stored user.
    pub async fn resolve_oauth_user(&self, profile: &GoogleProfile) -> ApiResult<OAuthLogin> {
        let email = normalize_email(&profile.email);
        if let Some(user) = self.users.find_by_email(&email).await? {
            return Ok(OAuthLogin::Found(user));
        }

        let username = profile
            .given_name
            .clone()
            .unwrap_or_else(|| email.split('@').next().unwrap_or(&email).to_string());
        let new = NewUser {
            username,
            email: email.clone(),
            password_hash: None,
            google_id: Some(profile.sub.clone()),
            image: profile.picture.clone(),
            is_admin: self.is_admin_email(&email),
        };
        match self.users.insert(new).await {
            Ok(user) => {
                info!(user_id = %user.id, "user created from oauth profile");
                Ok(OAuthLogin::Created(user))
            }
            Err(StoreError::Duplicate) => {
                // Lost the race against a concurrent callback or signup, or
                // the provider id is already stored under another email (the
                // user changed their address at the provider).
                let user = match self.users.find_by_email(&email).await? {
                    Some(u) => u,
                    None => self
                        .users
                        .find_by_google_id(&profile.sub)
                        .await?
                        .ok_or_else(|| {
                            ApiError::Internal(anyhow::anyhow!(
                                "user vanished after duplicate insert"
                            ))
                        })?,
                };
                Ok(OAuthLogin::Found(user))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn oauth_login(&self, profile: &GoogleProfile) -> ApiResult<(String, User)> {
        let user = self.resolve_oauth_user(profile).await?.into_user();
        let token = self.keys.sign_session(user.id, &user.username, &user.email)?;
        info!(user_id = %user.id, "oauth login");
        Ok((token, user))
    }

    pub fn authorize_redirect(&self) -> ApiResult<String> {
        let google = self.google.as_ref().ok_or(ApiError::OAuthUnavailable)?;
        use rand::{distributions::Alphanumeric, Rng};
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Ok(google.authorize_url(&state)?)
    }

    /// Complete the provider handshake: exchange the code, fetch the
    /// profile and log the identity in.
    pub async fn google_callback(&self, code: &str) -> ApiResult<(String, User)> {
        let google = self.google.as_ref().ok_or(ApiError::OAuthUnavailable)?;
        let access_token = google.exchange_code(code).await?;
        let profile = google.fetch_profile(&access_token).await?;
        self.oauth_login(&profile).await
    }

    /// Request phase of the reset flow. The answer is `Ok` whether or not
    /// the account exists; only the mail (or its absence) differs.
    pub async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let email = normalize_email(email);
        let user = match self.users.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                info!("reset requested for unknown email");
                return Ok(());
            }
        };

        let token = self.keys.sign_reset(user.id)?;
        let link = format!("{}/api/v1/password/reset/{}", self.public_base_url, token);
        if let Err(e) = self
            .mailer
            .send_reset_link(&user.email, &user.username, &link)
            .await
        {
            warn!(error = %e, user_id = %user.id, "reset mail failed");
        }
        info!(user_id = %user.id, "reset link issued");
        Ok(())
    }

    /// Confirm phase. The token is stateless, so an unexpired token can be
    /// replayed until it expires; outstanding session tokens also stay
    /// valid. Expiry is the only revocation mechanism.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> ApiResult<()> {
        let claims = self.keys.verify_reset(token).map_err(|e| match e {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Invalid => ApiError::TokenInvalid,
        })?;
        validate_password(new_password)?;

        let hash = hash_password(new_password)?;
        let user = self.users.update_password_hash(claims.sub, &hash).await?;
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    /// Authenticated change-password: the current password must verify
    /// against the stored hash before the new one is accepted.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ApiError::UserNotFound)?;

        let ok = match user.password_hash.as_deref() {
            Some(hash) => verify_password(old_password, hash),
            None => false, // OAuth-only account has no password to match
        };
        if !ok {
            warn!(user_id = %user.id, "change-password old password mismatch");
            return Err(ApiError::OldPasswordMismatch);
        }
        validate_password(new_password)?;

        let hash = hash_password(new_password)?;
        self.users.update_password_hash(user.id, &hash).await?;
        if let Err(e) = self
            .mailer
            .send_password_changed(&user.email, &user.username)
            .await
        {
            warn!(error = %e, user_id = %user.id, "password-changed mail failed");
        }
        info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::users::repo::MemoryUserStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every send so tests can assert on delivery.
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>, // (kind, email)
    }

    impl RecordingMailer {
        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, kind: &str, email: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((kind.to_string(), email.to_string()));
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_welcome(&self, email: &str, _username: &str) -> anyhow::Result<()> {
            self.record("welcome", email);
            Ok(())
        }
        async fn send_password_changed(&self, email: &str, _username: &str) -> anyhow::Result<()> {
            self.record("password_changed", email);
            Ok(())
        }
        async fn send_account_cancelled(&self, email: &str, _username: &str) -> anyhow::Result<()> {
            self.record("account_cancelled", email);
            Ok(())
        }
        async fn send_reset_link(
            &self,
            email: &str,
            _username: &str,
            link: &str,
        ) -> anyhow::Result<()> {
            self.record("reset_link", email);
            self.record("reset_link_url", link);
            Ok(())
        }
    }

    fn make_service() -> (Arc<AuthService>, Arc<MemoryUserStore>, Arc<RecordingMailer>) {
        let users = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(RecordingMailer::default());
        let keys = JwtKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test".into(),
            audience: "test".into(),
            session_ttl_secs: 3600,
            reset_ttl_secs: 1800,
        });
        let service = Arc::new(AuthService::new(
            users.clone(),
            mailer.clone(),
            keys,
            None,
            Some("admin@example.com".into()),
            "http://localhost:8080".into(),
        ));
        (service, users, mailer)
    }

    fn signup_input(email: &str) -> SignupInput {
        SignupInput {
            username: "khem".into(),
            email: email.into(),
            password: "long-enough-password".into(),
        }
    }

    fn profile(sub: &str, email: &str) -> GoogleProfile {
        GoogleProfile {
            sub: sub.into(),
            email: email.into(),
            given_name: Some("Khem".into()),
            picture: Some("https://lh3.example.com/photo.jpg".into()),
        }
    }

    #[tokio::test]
    async fn login_token_claims_decode_to_the_user() {
        let (service, _, _) = make_service();
        let (_, user) = service.signup(signup_input("khem@example.com")).await.unwrap();

        let (token, _) = service
            .login("khem@example.com", "long-enough-password")
            .await
            .unwrap();
        let claims = service.keys().verify_session(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "khem");
        assert_eq!(claims.email, "khem@example.com");
    }

    #[tokio::test]
    async fn login_normalizes_the_email() {
        let (service, _, _) = make_service();
        service.signup(signup_input("khem@example.com")).await.unwrap();
        assert!(service
            .login("  KHEM@Example.COM ", "long-enough-password")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let (service, _, _) = make_service();
        service.signup(signup_input("khem@example.com")).await.unwrap();

        let unknown = service
            .login("nobody@example.com", "long-enough-password")
            .await
            .unwrap_err();
        let wrong = service
            .login("khem@example.com", "wrong-password")
            .await
            .unwrap_err();
        let malformed = service.login("not-an-email", "whatever").await.unwrap_err();

        assert!(matches!(unknown, ApiError::InvalidCredentials));
        assert!(matches!(wrong, ApiError::InvalidCredentials));
        assert!(matches!(malformed, ApiError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn oauth_only_account_cannot_password_login() {
        let (service, _, _) = make_service();
        service
            .resolve_oauth_user(&profile("108", "khem@example.com"))
            .await
            .unwrap();
        let err = service
            .login("khem@example.com", "long-enough-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn signup_sends_welcome_and_flags_admin() {
        let (service, _, mailer) = make_service();
        let (_, user) = service.signup(signup_input("admin@example.com")).await.unwrap();
        assert!(user.is_admin);
        assert!(mailer
            .sent()
            .contains(&("welcome".into(), "admin@example.com".into())));
    }

    #[tokio::test]
    async fn concurrent_duplicate_signup_has_one_winner() {
        let (service, users, _) = make_service();
        let (a, b) = tokio::join!(
            service.signup(signup_input("khem@example.com")),
            service.signup(signup_input("khem@example.com")),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(loser, ApiError::DuplicateAccount));
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oauth_login_is_idempotent() {
        let (service, users, _) = make_service();
        let p = profile("108", "khem@example.com");

        let first = service.resolve_oauth_user(&p).await.unwrap();
        let second = service.resolve_oauth_user(&p).await.unwrap();
        assert!(matches!(first, OAuthLogin::Created(_)));
        assert!(matches!(second, OAuthLogin::Found(_)));

        let (token_a, user_a) = service.oauth_login(&p).await.unwrap();
        let (token_b, user_b) = service.oauth_login(&p).await.unwrap();
        assert_eq!(user_a.id, user_b.id);
        assert_eq!(
            service.keys().verify_session(&token_a).unwrap().sub,
            service.keys().verify_session(&token_b).unwrap().sub
        );
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_oauth_callbacks_store_one_user() {
        let (service, users, _) = make_service();
        let p = profile("108", "khem@example.com");
        let (a, b) = tokio::join!(service.oauth_login(&p), service.oauth_login(&p));
        let (_, user_a) = a.unwrap();
        let (_, user_b) = b.unwrap();
        assert_eq!(user_a.id, user_b.id);
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oauth_user_with_changed_provider_email_resolves_to_same_account() {
        let (service, users, _) = make_service();
        let created = service
            .resolve_oauth_user(&profile("108", "khem@example.com"))
            .await
            .unwrap()
            .into_user();

        // Same Google identity, new address at the provider. The stored
        // google_id must win over the unmatched email.
        let resolved = service
            .resolve_oauth_user(&profile("108", "khem.raj@example.com"))
            .await
            .unwrap();
        assert!(matches!(&resolved, OAuthLogin::Found(_)));
        assert_eq!(resolved.into_user().id, created.id);
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oauth_created_user_has_provider_fields_and_no_password() {
        let (service, _, _) = make_service();
        let user = service
            .resolve_oauth_user(&profile("108", "khem@example.com"))
            .await
            .unwrap()
            .into_user();
        assert_eq!(user.username, "Khem");
        assert_eq!(user.google_id.as_deref(), Some("108"));
        assert_eq!(user.image.as_deref(), Some("https://lh3.example.com/photo.jpg"));
        assert!(user.password_hash.is_none());
    }

    #[tokio::test]
    async fn reset_request_answers_ok_for_unknown_email_and_sends_nothing() {
        let (service, _, mailer) = make_service();
        service
            .request_password_reset("nobody@example.com")
            .await
            .unwrap();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn reset_flow_end_to_end() {
        let (service, _, mailer) = make_service();
        service.signup(signup_input("khem@example.com")).await.unwrap();

        service
            .request_password_reset("khem@example.com")
            .await
            .unwrap();
        let link = mailer
            .sent()
            .into_iter()
            .find(|(kind, _)| kind == "reset_link_url")
            .map(|(_, link)| link)
            .expect("reset mail sent");
        let token = link.rsplit('/').next().unwrap().to_string();

        service.reset_password(&token, "brand-new-password").await.unwrap();
        assert!(service
            .login("khem@example.com", "brand-new-password")
            .await
            .is_ok());
        let err = service
            .login("khem@example.com", "long-enough-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn reset_rejects_a_session_token_as_invalid() {
        let (service, _, _) = make_service();
        let (token, _) = service.signup(signup_input("khem@example.com")).await.unwrap();
        let err = service
            .reset_password(&token, "brand-new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::TokenInvalid));
    }

    #[tokio::test]
    async fn reset_for_a_deleted_user_is_not_found() {
        let (service, users, _) = make_service();
        let (_, user) = service.signup(signup_input("khem@example.com")).await.unwrap();
        let token = service.keys().sign_reset(user.id).unwrap();
        users.delete(user.id).await.unwrap();
        let err = service
            .reset_password(&token, "brand-new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UserNotFound));
    }

    #[tokio::test]
    async fn change_password_with_wrong_old_password_leaves_hash_unchanged() {
        let (service, users, _) = make_service();
        let (_, user) = service.signup(signup_input("khem@example.com")).await.unwrap();
        let before = users
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;

        let err = service
            .change_password(user.id, "wrong-old-password", "brand-new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OldPasswordMismatch));

        let after = users
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .password_hash;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn change_password_distinguishes_weak_new_password() {
        let (service, _, _) = make_service();
        let (_, user) = service.signup(signup_input("khem@example.com")).await.unwrap();
        let err = service
            .change_password(user.id, "long-enough-password", "short")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::WeakPassword));
    }

    #[tokio::test]
    async fn change_password_happy_path_sends_notification() {
        let (service, _, mailer) = make_service();
        let (_, user) = service.signup(signup_input("khem@example.com")).await.unwrap();
        service
            .change_password(user.id, "long-enough-password", "brand-new-password")
            .await
            .unwrap();
        assert!(service
            .login("khem@example.com", "brand-new-password")
            .await
            .is_ok());
        assert!(mailer
            .sent()
            .contains(&("password_changed".into(), "khem@example.com".into())));
    }

    #[tokio::test]
    async fn change_password_for_missing_user_is_not_found() {
        let (service, _, _) = make_service();
        let err = service
            .change_password(Uuid::new_v4(), "old-password-123", "brand-new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UserNotFound));
    }

    #[tokio::test]
    async fn oauth_endpoints_unavailable_without_provider_config() {
        let (service, _, _) = make_service();
        assert!(matches!(
            service.authorize_redirect().unwrap_err(),
            ApiError::OAuthUnavailable
        ));
        assert!(matches!(
            service.google_callback("code").await.unwrap_err(),
            ApiError::OAuthUnavailable
        ));
    }

    #[test]
    fn email_validation_rules() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@b"));
    }
}
