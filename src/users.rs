use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::{OsRng, RngCore};
use tracing::info;

use crate::errors::ServiceError;

const EMAIL_CODE_TTL: Duration = Duration::from_secs(5 * 60);

/// Local account. External identities live in two alternate columns: the
/// live platform id and the test-environment id. QR and email-code accounts
/// carry no password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub email: Option<String>,
    pub hashed_password: Option<String>,
    pub external_id: Option<String>,
    pub stub_external_id: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
}

#[derive(Debug, Clone)]
struct VerificationCode {
    code: String,
    issued_at: Instant,
    used: bool,
}

#[derive(Default)]
struct DirectoryInner {
    users: BTreeMap<u64, User>,
    next_id: u64,
    email_codes: BTreeMap<String, VerificationCode>,
}

/// In-memory user directory. Volatile; account durability across restarts
/// is out of scope for this service.
#[derive(Default)]
pub struct UserDirectory {
    inner: Mutex<DirectoryInner>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the account owning `external_identity` on either identity
    /// column, creating an active account if none exists. New identities
    /// land in the column matching the platform mode.
    pub fn resolve_or_create_external(&self, external_identity: &str, stub: bool) -> User {
        let mut inner = self.inner.lock().expect("user directory lock");
        if let Some(user) = inner.users.values().find(|u| {
            u.external_id.as_deref() == Some(external_identity)
                || u.stub_external_id.as_deref() == Some(external_identity)
        }) {
            return user.clone();
        }

        let user = User {
            id: 0,
            email: None,
            hashed_password: None,
            external_id: (!stub).then(|| external_identity.to_string()),
            stub_external_id: stub.then(|| external_identity.to_string()),
            is_active: true,
            is_verified: false,
        };
        insert_user(&mut inner, user)
    }

    pub fn register(&self, email: &str, password: Option<&str>) -> Result<User, ServiceError> {
        let hashed_password = password.map(hash_password).transpose()?;

        let mut inner = self.inner.lock().expect("user directory lock");
        if inner
            .users
            .values()
            .any(|u| u.email.as_deref() == Some(email))
        {
            return Err(ServiceError::UserExists);
        }

        let user = User {
            id: 0,
            email: Some(email.to_string()),
            hashed_password,
            external_id: None,
            stub_external_id: None,
            is_active: true,
            is_verified: false,
        };
        Ok(insert_user(&mut inner, user))
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<User, ServiceError> {
        let user = {
            let inner = self.inner.lock().expect("user directory lock");
            inner
                .users
                .values()
                .find(|u| u.email.as_deref() == Some(email))
                .cloned()
                .ok_or(ServiceError::BadCredentials)?
        };

        let hashed = user
            .hashed_password
            .as_deref()
            .ok_or(ServiceError::PasswordNotSet)?;
        if !verify_password(password, hashed) {
            return Err(ServiceError::BadCredentials);
        }
        if !user.is_active {
            return Err(ServiceError::InactiveUser);
        }
        Ok(user)
    }

    /// Issues a fresh single-use login code for `email`, replacing any
    /// outstanding one. The send is mocked: the code is logged and handed
    /// back to the caller.
    pub fn issue_email_code(&self, email: &str, now: Instant) -> String {
        let code = format!("{:06}", OsRng.next_u32() % 1_000_000);
        let mut inner = self.inner.lock().expect("user directory lock");
        inner.email_codes.insert(
            email.to_string(),
            VerificationCode {
                code: code.clone(),
                issued_at: now,
                used: false,
            },
        );
        info!("MOCK EMAIL SEND TO {email}: {code}");
        code
    }

    /// Redeems a login code: single use, five-minute expiry. Finds or
    /// creates the account for `email`.
    pub fn redeem_email_code(
        &self,
        email: &str,
        code: &str,
        now: Instant,
    ) -> Result<User, ServiceError> {
        let mut inner = self.inner.lock().expect("user directory lock");

        let entry = inner
            .email_codes
            .get_mut(email)
            .ok_or(ServiceError::CodeInvalid)?;
        if entry.used
            || entry.code != code
            || now.saturating_duration_since(entry.issued_at) >= EMAIL_CODE_TTL
        {
            return Err(ServiceError::CodeInvalid);
        }
        entry.used = true;

        if let Some(user) = inner
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
        {
            return Ok(user.clone());
        }
        let user = User {
            id: 0,
            email: Some(email.to_string()),
            hashed_password: None,
            external_id: None,
            stub_external_id: None,
            is_active: true,
            is_verified: false,
        };
        Ok(insert_user(&mut inner, user))
    }

    pub fn get(&self, user_id: u64) -> Option<User> {
        self.inner
            .lock()
            .expect("user directory lock")
            .users
            .get(&user_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("user directory lock").users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_user(inner: &mut DirectoryInner, mut user: User) -> User {
    inner.next_id += 1;
    user.id = inner.next_id;
    inner.users.insert(user.id, user.clone());
    user
}

fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| ServiceError::Internal("password hashing failed"))
}

fn verify_password(password: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
