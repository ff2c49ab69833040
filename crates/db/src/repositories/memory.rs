use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use servyy_core::domain::conversation::{ConversationRecord, Turn, UserId};
use servyy_core::domain::prospect::{NewProspect, Prospect, ProspectUpdate};

use super::{ConversationRepository, ProspectRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn append_turn(
        &self,
        user_id: &UserId,
        turn: Turn,
        max_stored_turns: usize,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records
            .entry(user_id.0.clone())
            .or_insert_with(|| ConversationRecord::new(user_id.clone()))
            .append(turn, max_stored_turns);
        Ok(())
    }

    async fn load_recent_turns(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&user_id.0).map(|record| record.recent(limit).to_vec()).unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryProspectRepository {
    prospects: RwLock<HashMap<String, Prospect>>,
}

#[async_trait::async_trait]
impl ProspectRepository for InMemoryProspectRepository {
    async fn insert(&self, prospect: NewProspect) -> Result<Prospect, RepositoryError> {
        let mut prospects = self.prospects.write().await;
        if prospects.contains_key(&prospect.email) {
            return Err(RepositoryError::Conflict { entity: "prospect", key: prospect.email });
        }
        let prospect = prospect.into_prospect(Utc::now());
        prospects.insert(prospect.email.clone(), prospect.clone());
        Ok(prospect)
    }

    async fn update(
        &self,
        email: &str,
        update: &ProspectUpdate,
    ) -> Result<Prospect, RepositoryError> {
        let mut prospects = self.prospects.write().await;
        let prospect = prospects.get_mut(email).ok_or_else(|| RepositoryError::NotFound {
            entity: "prospect",
            key: email.to_string(),
        })?;
        prospect.apply(update);
        Ok(prospect.clone())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Prospect>, RepositoryError> {
        let prospects = self.prospects.read().await;
        Ok(prospects.get(email).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Prospect>, RepositoryError> {
        let prospects = self.prospects.read().await;
        let mut all: Vec<Prospect> = prospects.values().cloned().collect();
        all.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use servyy_core::domain::conversation::{Turn, UserId};
    use servyy_core::domain::prospect::{NewProspect, ProspectUpdate};

    use crate::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryProspectRepository,
        ProspectRepository, RepositoryError,
    };

    #[tokio::test]
    async fn in_memory_conversation_repo_keeps_the_newest_window() {
        let repo = InMemoryConversationRepository::default();
        let user = UserId("u-1".to_string());

        for index in 0..4 {
            repo.append_turn(&user, Turn::new(format!("q{index}"), format!("a{index}")), 3)
                .await
                .expect("append");
        }

        let turns = repo.load_recent_turns(&user, 10).await.expect("load");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], Turn::new("q1", "a1"));
        assert!(repo
            .load_recent_turns(&UserId("other".to_string()), 10)
            .await
            .expect("load other")
            .is_empty());
    }

    #[tokio::test]
    async fn in_memory_prospect_repo_enforces_unique_email() {
        let repo = InMemoryProspectRepository::default();
        let prospect = NewProspect {
            name: "Raj".to_string(),
            email: "raj@beta.dev".to_string(),
            company: "Beta".to_string(),
            details: String::new(),
        };

        repo.insert(prospect.clone()).await.expect("insert");
        let error = repo.insert(prospect).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict { .. }));

        let updated = repo
            .update("raj@beta.dev", &ProspectUpdate::new(None, None, Some("call Friday".into())))
            .await
            .expect("update");
        assert_eq!(updated.company, "Beta");
        assert_eq!(updated.details, "call Friday");
    }
}
