use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::AppState;

/// Caller identity resolved from a session issued by the identity service.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: i16,
    /// Set when the account belongs to a registered patient.
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    user_id: Uuid,
    roles: i16,
    patient_id: Option<Uuid>,
}

/// Resolves a bearer token against the identity tables. Read-only: session
/// bookkeeping such as `last_seen_at` belongs to the service that issued it.
pub async fn lookup_session(db: &PgPool, token: &str) -> Result<AuthContext, ApiError> {
    let token_hash = hash_access_token(token);

    // Live session + active account; patient link is optional (staff)
    let row = sqlx::query_as::<_, SessionLookupRow>(
        r#"
        SELECT st.user_id, u.roles, p.patient_id
        FROM session_token st
        JOIN app_user u ON u.user_id = st.user_id
        LEFT JOIN patient p ON p.user_id = u.user_id
        WHERE st.session_token_hash = $1
          AND st.revoked_at IS NULL
          AND st.expires_at > now()
          AND u.is_active = true
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    Ok(AuthContext {
        user_id: row.user_id,
        role: row.roles,
        patient_id: row.patient_id,
    })
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            lookup_session(&state.db, authz.token()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user_with_session(pool: &PgPool, roles: i16, token: &str, expires: &str) -> Uuid {
        let user_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO app_user (username, display_name, password_hash, roles)
            VALUES ($1, 'Test User', 'x', $2)
            RETURNING user_id
            "#,
        )
        .bind(format!("user-{}", Uuid::new_v4()))
        .bind(roles)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            INSERT INTO session_token (user_id, session_token_hash, expires_at)
            VALUES ($1, $2, now() + $3::interval)
            "#,
        )
        .bind(user_id)
        .bind(hash_access_token(token))
        .bind(expires)
        .execute(pool)
        .await
        .unwrap();

        user_id
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn resolves_patient_link_without_touching_the_session(pool: PgPool) {
        let user_id = user_with_session(&pool, 0, "tok-patient", "1 hour").await;
        let patient_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO patient (user_id, first_name, surname, barcode)
            VALUES ($1, 'Abebe', 'Kebede', 'PAT-000001')
            RETURNING patient_id
            "#,
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();

        let ctx = lookup_session(&pool, "tok-patient").await.unwrap();
        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.role, 0);
        assert_eq!(ctx.patient_id, Some(patient_id));

        let last_seen: Option<chrono::DateTime<chrono::Utc>> =
            sqlx::query_scalar("SELECT last_seen_at FROM session_token WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(last_seen.is_none());
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL pointing at a Postgres server"]
    async fn staff_and_dead_sessions(pool: PgPool) {
        user_with_session(&pool, 4, "tok-desk", "1 hour").await;
        let ctx = lookup_session(&pool, "tok-desk").await.unwrap();
        assert_eq!(ctx.role, 4);
        assert_eq!(ctx.patient_id, None);

        user_with_session(&pool, 4, "tok-expired", "-1 minute").await;
        assert!(matches!(
            lookup_session(&pool, "tok-expired").await,
            Err(ApiError::Unauthorized("SESSION_EXPIRED", _))
        ));
        assert!(matches!(
            lookup_session(&pool, "tok-unknown").await,
            Err(ApiError::Unauthorized("SESSION_EXPIRED", _))
        ));
    }
}
