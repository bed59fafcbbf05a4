#![allow(dead_code)]

use chrono::{DateTime, Utc};
use cruise_guide_backend::auth::hash_password;
use cruise_guide_backend::config::AppConfig;
use cruise_guide_backend::models::*;
use cruise_guide_backend::AppState;
use sqlx::PgPool;
use std::sync::Arc;

pub const TEST_PASSWORD: &str = "cruise-test-pw";

/// Application state over a test database
pub struct TestDatabase {
    pub pool: PgPool,
    pub state: Arc<AppState>,
}

impl TestDatabase {
    /// Create TestDatabase from an existing pool (useful with sqlx::test).
    /// The default config has no SMS key, so the gateway runs in simulation mode.
    pub fn from_pool(pool: PgPool) -> Self {
        let mut config = AppConfig::default();
        config.passport.base_url = "https://guide.test".to_string();
        config.passport.upload_dir = std::env::temp_dir().join("cruise-guide-test-uploads");

        Self {
            state: Arc::new(AppState::new(pool.clone(), config)),
            pool,
        }
    }

    /// Count rows of `table` whose `column` equals `id`
    pub async fn count_where(&self, table: &str, column: &str, id: i64) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE {} = $1", table, column))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count rows")
    }
}

/// Helper function to create a customer account
pub async fn create_customer(db: &TestDatabase, name: &str, phone: &str) -> User {
    let hash = hash_password(TEST_PASSWORD).expect("Failed to hash password");
    db.state
        .user_repo
        .create(Some(name), Some(phone), None, &hash, UserRole::User)
        .await
        .expect("Failed to create customer")
}

/// Helper function to create an admin account
pub async fn create_admin(db: &TestDatabase, name: &str) -> User {
    let hash = hash_password(TEST_PASSWORD).expect("Failed to hash password");
    db.state
        .user_repo
        .create(Some(name), Some("01099998888"), None, &hash, UserRole::Admin)
        .await
        .expect("Failed to create admin")
}

pub async fn create_trip(
    db: &TestDatabase,
    user: &User,
    cruise_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Trip {
    db.state
        .trip_repo
        .create(user.id, Some(cruise_name), None, None, Some(start), Some(end))
        .await
        .expect("Failed to create trip")
}
