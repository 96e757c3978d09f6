use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    name: String,
    api_key: String
});

impl User {
    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM user WHERE api_key = $api_key LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    /// Makes sure a user owning `api_key` exists, creating one named `name` if needed.
    pub async fn ensure_with_api_key(
        name: &str,
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_by_api_key(api_key, db).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let user = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name: name.to_string(),
            api_key: api_key.to_string(),
        };

        db.store_item(user.clone()).await?;
        info!(user_id = %user.id, name, "Created user for api key");
        Ok(user)
    }
}
