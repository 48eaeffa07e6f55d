use std::sync::LazyLock;

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{LoginForm, Token, User, UserCreate};
use crate::services::user_service::UserService;

const BAD_CREDENTIALS: &str = "Incorrect credentials";

/// Verified against when the email is unknown, so every login attempt costs
/// one Argon2 verification.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("pyme-reporter-unknown-user").unwrap_or_default());

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// The user's email.
    pub sub: String,
    pub uid: i64,
    pub iat: i64,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// A random 256-bit signing secret, base64 encoded.
pub fn generate_secret() -> AppResult<String> {
    let mut bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal("System RNG unavailable".to_string()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Registration, login and bearer-token verification.
#[derive(Clone)]
pub struct AuthService {
    users: UserService,
    jwt_secret: String,
    token_minutes: i64,
}

impl AuthService {
    pub fn new(users: UserService, jwt_secret: String, token_minutes: i64) -> Self {
        Self {
            users,
            jwt_secret,
            token_minutes,
        }
    }

    /// Uses the configured secret or, when none is set, a per-process random
    /// one (tokens then stop validating after a restart).
    pub fn with_optional_secret(
        users: UserService,
        jwt_secret: Option<String>,
        token_minutes: i64,
    ) -> AppResult<Self> {
        let secret = match jwt_secret {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set; using a random secret for this process");
                generate_secret()?
            }
        };
        Ok(Self::new(users, secret, token_minutes))
    }

    pub fn issue_token(&self, user: &User) -> AppResult<Token> {
        let now = Utc::now();
        let exp = now + chrono::Duration::minutes(self.token_minutes);
        let claims = Claims {
            sub: user.email.clone(),
            uid: user.id,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("JWT error: {}", e)))?;
        Ok(Token::bearer(token))
    }

    pub fn decode_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized("Could not validate credentials".to_string()))
    }

    pub async fn register(&self, input: UserCreate) -> AppResult<Token> {
        let user = self.users.create(input).await?;
        info!(user_id = user.id, "Registered user");
        self.issue_token(&user)
    }

    /// Unknown email, wrong password and inactive account are
    /// indistinguishable to the caller.
    pub async fn login(&self, form: LoginForm) -> AppResult<Token> {
        let user = self.users.get_by_email(&form.username).await?;
        let hashed = user
            .as_ref()
            .map_or(DUMMY_HASH.as_str(), |u| u.hashed_password.as_str());
        let password_ok = verify_password(&form.password, hashed);
        let user = user
            .filter(|u| password_ok && u.is_active)
            .ok_or_else(|| AppError::Unauthorized(BAD_CREDENTIALS.to_string()))?;
        info!(user_id = user.id, "User logged in");
        self.issue_token(&user)
    }

    /// Resolves a bearer token to an active user.
    pub async fn authenticate(&self, token: &str) -> AppResult<User> {
        let claims = self.decode_token(token)?;
        let unauthorized = || AppError::Unauthorized("Could not validate credentials".to_string());

        let user = match self.users.get(claims.uid).await {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => return Err(unauthorized()),
            Err(e) => return Err(e),
        };
        if user.email != claims.sub {
            return Err(unauthorized());
        }
        if !user.is_active {
            return Err(AppError::Unauthorized("Inactive user".to_string()));
        }
        Ok(user)
    }
}
