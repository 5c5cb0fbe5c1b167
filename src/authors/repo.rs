use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;

/// Author record. Email is not unique here; two authors may share a
/// contact address.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Author {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dob: Option<i32>, // birth year
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAuthor {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub dob: Option<i32>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub dob: Option<i32>,
}

#[async_trait]
pub trait AuthorStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Author>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Author>, StoreError>;
    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError>;
    async fn update(&self, id: Uuid, update: AuthorUpdate) -> Result<Author, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

const AUTHOR_COLUMNS: &str = "id, first_name, last_name, email, dob, created_at";

pub struct PgAuthorStore {
    db: PgPool,
}

impl PgAuthorStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthorStore for PgAuthorStore {
    async fn list(&self) -> Result<Vec<Author>, StoreError> {
        let authors = sqlx::query_as::<_, Author>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(authors)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Author>, StoreError> {
        let author = sqlx::query_as::<_, Author>(&format!(
            "SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(author)
    }

    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError> {
        let author = sqlx::query_as::<_, Author>(&format!(
            "INSERT INTO authors (first_name, last_name, email, dob)
             VALUES ($1, $2, $3, $4)
             RETURNING {AUTHOR_COLUMNS}"
        ))
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(new.dob)
        .fetch_one(&self.db)
        .await?;
        Ok(author)
    }

    async fn update(&self, id: Uuid, update: AuthorUpdate) -> Result<Author, StoreError> {
        let author = sqlx::query_as::<_, Author>(&format!(
            "UPDATE authors SET
                 first_name = COALESCE($2, first_name),
                 last_name = COALESCE($3, last_name),
                 email = COALESCE($4, email),
                 dob = COALESCE($5, dob)
             WHERE id = $1
             RETURNING {AUTHOR_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.email)
        .bind(update.dob)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok(author)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM authors WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// In-memory store for tests and `AppState::fake()`.
#[derive(Default)]
pub struct MemoryAuthorStore {
    authors: std::sync::Mutex<Vec<Author>>,
}

impl MemoryAuthorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorStore for MemoryAuthorStore {
    async fn list(&self) -> Result<Vec<Author>, StoreError> {
        Ok(self.authors.lock().unwrap().clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Author>, StoreError> {
        let authors = self.authors.lock().unwrap();
        Ok(authors.iter().find(|a| a.id == id).cloned())
    }

    async fn insert(&self, new: NewAuthor) -> Result<Author, StoreError> {
        let author = Author {
            id: Uuid::new_v4(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            dob: new.dob,
            created_at: OffsetDateTime::now_utc(),
        };
        self.authors.lock().unwrap().push(author.clone());
        Ok(author)
    }

    async fn update(&self, id: Uuid, update: AuthorUpdate) -> Result<Author, StoreError> {
        let mut authors = self.authors.lock().unwrap();
        let author = authors
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(first_name) = update.first_name {
            author.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            author.last_name = last_name;
        }
        if let Some(email) = update.email {
            author.email = email;
        }
        if let Some(dob) = update.dob {
            author.dob = Some(dob);
        }
        Ok(author.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut authors = self.authors.lock().unwrap();
        let idx = authors
            .iter()
            .position(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        authors.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_author() -> NewAuthor {
        NewAuthor {
            first_name: "Khem Raj".into(),
            last_name: "Neupane".into(),
            email: "khem.neupane@example.com".into(),
            dob: Some(1989),
        }
    }

    #[tokio::test]
    async fn shared_email_is_allowed_across_authors() {
        let store = MemoryAuthorStore::new();
        store.insert(new_author()).await.unwrap();
        store.insert(new_author()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_merges_only_given_fields() {
        let store = MemoryAuthorStore::new();
        let created = store.insert(new_author()).await.unwrap();
        let updated = store
            .update(
                created.id,
                AuthorUpdate {
                    first_name: Some("Sheshraj".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Sheshraj");
        assert_eq!(updated.last_name, "Neupane");
        assert_eq!(updated.dob, Some(1989));
    }

    #[tokio::test]
    async fn delete_missing_author_is_not_found() {
        let store = MemoryAuthorStore::new();
        assert!(matches!(
            store.delete(Uuid::new_v4()).await.unwrap_err(),
            StoreError::NotFound
        ));
    }
}
