//! User service - registration, login, lookup
//!
//! Users live in the warehouse `users` table and are written through the
//! write queue as true MERGE upserts keyed on `user_id`. Registration
//! flushes the queue so the account is visible to an immediate login.

use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{LoginRequest, LoginResponse, RegisterRequest, User, UserResponse};
use crate::services::warehouse::{WarehouseClient, WriteOperation, WriteQueue, tables};
use crate::utils::{ApiError, ApiResult, JwtUtil};

pub struct UserService {
    warehouse: Arc<WarehouseClient>,
    write_queue: Arc<WriteQueue>,
    jwt: Arc<JwtUtil>,
}

impl UserService {
    pub fn new(
        warehouse: Arc<WarehouseClient>,
        write_queue: Arc<WriteQueue>,
        jwt: Arc<JwtUtil>,
    ) -> Self {
        Self { warehouse, write_queue, jwt }
    }

    pub async fn register(&self, request: &RegisterRequest) -> ApiResult<UserResponse> {
        if self.find_by_username(&request.username).await?.is_some() {
            return Err(ApiError::bad_request(format!(
                "Username '{}' is already taken",
                request.username
            )));
        }

        let password_hash = hash(&request.password, DEFAULT_COST)
            .map_err(|e| ApiError::internal(format!("Password hashing failed: {}", e)))?;

        let now = Utc::now();
        let user = User {
            user_id: Uuid::new_v4().to_string(),
            username: request.username.clone(),
            password_hash,
            email: request.email.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.write_queue.enqueue(
            tables::USERS,
            vec![user_row(&user)],
            WriteOperation::Upsert,
            1,
        );
        // Make the account visible to an immediate login
        self.write_queue.flush().await;

        tracing::info!("Registered user '{}'", user.username);
        Ok(UserResponse::from(&user))
    }

    pub async fn login(&self, request: &LoginRequest) -> ApiResult<LoginResponse> {
        let user = self
            .find_by_username(&request.username)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

        if !user.is_active {
            return Err(ApiError::unauthorized("Account is disabled"));
        }

        let valid = verify(&request.password, &user.password_hash)
            .map_err(|e| ApiError::internal(format!("Password verification failed: {}", e)))?;
        if !valid {
            return Err(ApiError::unauthorized("Invalid username or password"));
        }

        let token = self.jwt.generate_token(&user.user_id, &user.username)?;

        tracing::info!("User '{}' logged in", user.username);
        Ok(LoginResponse { token, user: UserResponse::from(&user) })
    }

    pub async fn get_user(&self, user_id: &str) -> ApiResult<Option<UserResponse>> {
        let sql = format!(
            "SELECT user_id, username, password_hash, email, is_active, created_at, updated_at \
             FROM `{}` WHERE user_id = '{}' LIMIT 1",
            self.warehouse.qualified(tables::USERS),
            WarehouseClient::escape(user_id),
        );

        let rows = self
            .warehouse
            .query(&sql)
            .await
            .map_err(|e| ApiError::warehouse(e.to_string()))?;

        Ok(rows.first().and_then(parse_user).map(|u| UserResponse::from(&u)))
    }

    async fn find_by_username(&self, username: &str) -> ApiResult<Option<User>> {
        let sql = format!(
            "SELECT user_id, username, password_hash, email, is_active, created_at, updated_at \
             FROM `{}` WHERE username = '{}' LIMIT 1",
            self.warehouse.qualified(tables::USERS),
            WarehouseClient::escape(username),
        );

        let rows = self
            .warehouse
            .query(&sql)
            .await
            .map_err(|e| ApiError::warehouse(e.to_string()))?;

        Ok(rows.first().and_then(parse_user))
    }
}

fn user_row(user: &User) -> Value {
    json!({
        "user_id": user.user_id,
        "username": user.username,
        "password_hash": user.password_hash,
        "email": user.email,
        "is_active": user.is_active,
        "created_at": user.created_at.to_rfc3339(),
        "updated_at": user.updated_at.to_rfc3339(),
    })
}

fn parse_user(row: &Value) -> Option<User> {
    Some(User {
        user_id: row.get("user_id")?.as_str()?.to_string(),
        username: row.get("username")?.as_str()?.to_string(),
        password_hash: row.get("password_hash")?.as_str()?.to_string(),
        email: row
            .get("email")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        is_active: row.get("is_active").and_then(Value::as_bool).unwrap_or(true),
        created_at: row
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get("updated_at")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_user_round_trip() {
        let now = Utc::now();
        let user = User {
            user_id: "u-1".to_string(),
            username: "analista".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            email: Some("a@ejemplo.es".to_string()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let parsed = parse_user(&user_row(&user)).unwrap();
        assert_eq!(parsed.user_id, "u-1");
        assert_eq!(parsed.username, "analista");
        assert_eq!(parsed.email.as_deref(), Some("a@ejemplo.es"));
        assert!(parsed.is_active);
    }

    #[test]
    fn parse_user_requires_core_fields() {
        assert!(parse_user(&json!({"username": "solo"})).is_none());
    }
}
