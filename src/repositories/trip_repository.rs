use crate::error::RepositoryError;
use crate::models::{CruiseProduct, Trip};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Repository for customer trips and the cruise product catalogue
pub struct TripRepository {
    pool: PgPool,
}

impl TripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a trip and move the owner's current trip end forward when it is later
    pub async fn create(
        &self,
        user_id: i64,
        cruise_name: Option<&str>,
        reservation_code: Option<&str>,
        product_code: Option<&str>,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Trip, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let trip = sqlx::query_as::<_, Trip>(
            r#"
            INSERT INTO trips (user_id, cruise_name, reservation_code, product_code, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(cruise_name)
        .bind(reservation_code)
        .bind(product_code)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&mut *tx)
        .await?;

        if end_date.is_some() {
            sqlx::query(
                r#"
                UPDATE users
                SET current_trip_end_date = GREATEST(COALESCE(current_trip_end_date, $2), $2),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(user_id)
            .bind(end_date)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(trip)
    }

    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<Trip>, RepositoryError> {
        let trips = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE user_id = $1 ORDER BY start_date DESC NULLS LAST, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(trips)
    }

    /// Most recent trip by start date
    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<Trip>, RepositoryError> {
        let trip = sqlx::query_as::<_, Trip>(
            r#"
            SELECT * FROM trips
            WHERE user_id = $1
            ORDER BY start_date DESC NULLS LAST, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(trip)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Trip>, RepositoryError> {
        let trip = sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(trip)
    }

    pub async fn find_product(&self, product_code: &str) -> Result<Option<CruiseProduct>, RepositoryError> {
        let product = sqlx::query_as::<_, CruiseProduct>(
            "SELECT * FROM cruise_products WHERE product_code = $1",
        )
        .bind(product_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    pub async fn create_product(&self, product: &CruiseProduct) -> Result<CruiseProduct, RepositoryError> {
        let created = sqlx::query_as::<_, CruiseProduct>(
            r#"
            INSERT INTO cruise_products
                (product_code, package_name, cruise_line, ship_name, nights, days, base_price,
                 start_date, end_date, itinerary_pattern)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&product.product_code)
        .bind(&product.package_name)
        .bind(&product.cruise_line)
        .bind(&product.ship_name)
        .bind(product.nights)
        .bind(product.days)
        .bind(product.base_price)
        .bind(product.start_date)
        .bind(product.end_date)
        .bind(&product.itinerary_pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }
}
