use thiserror::Error;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ErrBadSignature = 1001,
    ErrMalformedEnvelope = 1002,

    ErrBadCredentials = 1101,
    ErrPasswordNotSet = 1102,
    ErrInactiveUser = 1103,
    ErrUserExists = 1104,
    ErrCodeInvalid = 1105,

    ErrPlatformToken = 1201,
    ErrPlatformQr = 1202,

    ErrTokenIssue = 1301,
    ErrTokenInvalid = 1302,

    ErrInternal = 1901,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bad signature")]
    BadSignature,
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),
    #[error("incorrect email or password")]
    BadCredentials,
    #[error("no password set for this account")]
    PasswordNotSet,
    #[error("inactive user")]
    InactiveUser,
    #[error("a user with this email already exists")]
    UserExists,
    #[error("invalid or expired code")]
    CodeInvalid,
    #[error("platform access token fetch failed: {0}")]
    PlatformToken(String),
    #[error("platform qr creation failed: {0}")]
    PlatformQr(String),
    #[error("token issuance failed: {0}")]
    TokenIssue(String),
    #[error("invalid token: {0}")]
    TokenInvalid(String),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ServiceError {
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::BadSignature => ErrorCode::ErrBadSignature as u16,
            ServiceError::MalformedEnvelope(_) => ErrorCode::ErrMalformedEnvelope as u16,
            ServiceError::BadCredentials => ErrorCode::ErrBadCredentials as u16,
            ServiceError::PasswordNotSet => ErrorCode::ErrPasswordNotSet as u16,
            ServiceError::InactiveUser => ErrorCode::ErrInactiveUser as u16,
            ServiceError::UserExists => ErrorCode::ErrUserExists as u16,
            ServiceError::CodeInvalid => ErrorCode::ErrCodeInvalid as u16,
            ServiceError::PlatformToken(_) => ErrorCode::ErrPlatformToken as u16,
            ServiceError::PlatformQr(_) => ErrorCode::ErrPlatformQr as u16,
            ServiceError::TokenIssue(_) => ErrorCode::ErrTokenIssue as u16,
            ServiceError::TokenInvalid(_) => ErrorCode::ErrTokenInvalid as u16,
            ServiceError::Internal(_) => ErrorCode::ErrInternal as u16,
        }
    }
}
