use std::sync::Arc;

use servyy_core::domain::prospect::{NewProspect, Prospect, ProspectUpdate};
use servyy_core::errors::{ApplicationError, DomainError};
use servyy_db::repositories::ProspectRepository;

/// Business-contact registry keyed by email. Each call is independent and
/// acquires its own pooled connection.
pub struct ProspectRegistry {
    repository: Arc<dyn ProspectRepository>,
}

impl ProspectRegistry {
    pub fn new(repository: Arc<dyn ProspectRepository>) -> Self {
        Self { repository }
    }

    pub async fn add(
        &self,
        name: &str,
        email: &str,
        company: &str,
        details: &str,
    ) -> Result<Prospect, ApplicationError> {
        let prospect = NewProspect {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            company: company.trim().to_string(),
            details: details.trim().to_string(),
        };
        prospect.validate()?;
        Ok(self.repository.insert(prospect).await?)
    }

    /// Applies the non-blank fields of `update`. An update with nothing to
    /// change is a validation error.
    pub async fn update(
        &self,
        email: &str,
        update: ProspectUpdate,
    ) -> Result<Prospect, ApplicationError> {
        if update.is_empty() {
            return Err(DomainError::Validation("no fields to update".to_string()).into());
        }
        Ok(self.repository.update(email.trim(), &update).await?)
    }

    pub async fn get(&self, email: &str) -> Result<Prospect, ApplicationError> {
        let email = email.trim();
        self.repository.find_by_email(email).await?.ok_or_else(|| {
            DomainError::NotFound { entity: "prospect", key: email.to_string() }.into()
        })
    }

    pub async fn list_all(&self) -> Result<Vec<Prospect>, ApplicationError> {
        Ok(self.repository.list_all().await?)
    }
}

pub fn format_prospect(prospect: &Prospect) -> String {
    format!(
        "Name: {}, Email: {}, Company: {}, Details: {}",
        prospect.name, prospect.email, prospect.company, prospect.details
    )
}

pub fn format_prospect_list(prospects: &[Prospect]) -> String {
    if prospects.is_empty() {
        return "📭 No prospects found in database.".to_string();
    }

    let mut listing = format!("📋 **ALL PROSPECTS ({} total):**\n\n", prospects.len());
    for prospect in prospects {
        listing.push_str(&format!(
            "• {} ({}) - {}\n",
            prospect.name, prospect.company, prospect.email
        ));
        if !prospect.details.is_empty() {
            listing.push_str(&format!("  Notes: {}\n", prospect.details));
        }
        listing.push('\n');
    }
    listing
}
