use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::AppError;
use crate::models::{Role, User};
use crate::routes::AppState;
use crate::store::UserStore;

/// `axum::Json` with rejections reported as `InvalidInput`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// The authenticated user behind the request's bearer token.
pub struct Caller(pub User);

impl Caller {
    pub fn student(self) -> Result<User, AppError> {
        match self.0.role {
            Role::Student => Ok(self.0),
            _ => Err(AppError::forbidden("access denied, student only")),
        }
    }

    pub fn teacher(self) -> Result<User, AppError> {
        match self.0.role {
            Role::Teacher | Role::Admin => Ok(self.0),
            Role::Student => Err(AppError::forbidden("access denied, teacher only")),
        }
    }

    pub fn admin(self) -> Result<User, AppError> {
        match self.0.role {
            Role::Admin => Ok(self.0),
            _ => Err(AppError::forbidden("access denied, admin only")),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("not authorized, no token".into()))?;

        let user = state
            .store
            .user_for_token(bearer.token())
            .await?
            .ok_or_else(|| AppError::Unauthorized("not authorized, token failed".into()))?;
        if !user.is_active {
            return Err(AppError::Unauthorized("account is deactivated".into()));
        }
        Ok(Caller(user))
    }
}
