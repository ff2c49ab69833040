use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};

use servyy_core::domain::prospect::{NewProspect, Prospect, ProspectUpdate};

use super::{ProspectRepository, RepositoryError};
use crate::DbPool;

const ENTITY: &str = "prospect";

pub struct SqlProspectRepository {
    pool: DbPool,
}

impl SqlProspectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProspectRepository for SqlProspectRepository {
    async fn insert(&self, prospect: NewProspect) -> Result<Prospect, RepositoryError> {
        let prospect = prospect.into_prospect(Utc::now());

        let result = sqlx::query(
            "INSERT INTO prospects (name, email, company, details, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&prospect.name)
        .bind(&prospect.email)
        .bind(&prospect.company)
        .bind(&prospect.details)
        .bind(prospect.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(prospect),
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                Err(RepositoryError::Conflict { entity: ENTITY, key: prospect.email })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(
        &self,
        email: &str,
        update: &ProspectUpdate,
    ) -> Result<Prospect, RepositoryError> {
        if !update.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE prospects SET ");
            let mut assignments = builder.separated(", ");
            if let Some(name) = &update.name {
                assignments.push("name = ").push_bind_unseparated(name.clone());
            }
            if let Some(company) = &update.company {
                assignments.push("company = ").push_bind_unseparated(company.clone());
            }
            if let Some(details) = &update.details {
                assignments.push("details = ").push_bind_unseparated(details.clone());
            }
            builder.push(" WHERE email = ").push_bind(email.to_string());

            let result = builder.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(not_found(email));
            }
        }

        self.find_by_email(email).await?.ok_or_else(|| not_found(email))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Prospect>, RepositoryError> {
        let row = sqlx::query(
            "SELECT name, email, company, details, created_at FROM prospects WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(prospect_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Prospect>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT name, email, company, details, created_at FROM prospects ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(prospect_from_row).collect()
    }
}

fn not_found(email: &str) -> RepositoryError {
    RepositoryError::NotFound { entity: ENTITY, key: email.to_string() }
}

fn prospect_from_row(row: SqliteRow) -> Result<Prospect, RepositoryError> {
    Ok(Prospect {
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        company: row.try_get("company")?,
        details: row.try_get("details")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
