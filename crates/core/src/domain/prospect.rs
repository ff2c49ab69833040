use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prospect {
    pub name: String,
    pub email: String,
    pub company: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl Prospect {
    pub fn apply(&mut self, update: &ProspectUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(company) = &update.company {
            self.company = company.clone();
        }
        if let Some(details) = &update.details {
            self.details = details.clone();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewProspect {
    pub name: String,
    pub email: String,
    pub company: String,
    pub details: String,
}

impl NewProspect {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.email.trim().is_empty() {
            return Err(DomainError::Validation("prospect email is required".to_string()));
        }
        Ok(())
    }

    pub fn into_prospect(self, created_at: DateTime<Utc>) -> Prospect {
        Prospect {
            name: self.name,
            email: self.email,
            company: self.company,
            details: self.details,
            created_at,
        }
    }
}

/// Partial update. Only non-blank fields overwrite stored values, so an
/// update can never clear a field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProspectUpdate {
    pub name: Option<String>,
    pub company: Option<String>,
    pub details: Option<String>,
}

impl ProspectUpdate {
    pub fn new(name: Option<String>, company: Option<String>, details: Option<String>) -> Self {
        Self { name: non_blank(name), company: non_blank(company), details: non_blank(details) }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.company.is_none() && self.details.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{NewProspect, ProspectUpdate};

    fn new_prospect() -> NewProspect {
        NewProspect {
            name: "Dana Reyes".to_string(),
            email: "dana@northwind.io".to_string(),
            company: "Northwind".to_string(),
            details: "met at expo".to_string(),
        }
    }

    #[test]
    fn update_drops_blank_fields() {
        let update = ProspectUpdate::new(Some("  ".to_string()), None, Some(String::new()));
        assert!(update.is_empty());
    }

    #[test]
    fn apply_only_touches_supplied_fields() {
        let mut prospect = new_prospect().into_prospect(Utc::now());
        prospect.apply(&ProspectUpdate::new(None, None, Some("wants a demo".to_string())));

        assert_eq!(prospect.name, "Dana Reyes");
        assert_eq!(prospect.company, "Northwind");
        assert_eq!(prospect.details, "wants a demo");
    }

    #[test]
    fn new_prospect_requires_email() {
        let mut prospect = new_prospect();
        prospect.email = " ".to_string();
        assert!(prospect.validate().is_err());
    }
}
