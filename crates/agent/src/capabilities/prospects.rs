use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use servyy_core::domain::prospect::ProspectUpdate;
use servyy_core::errors::{ApplicationError, DomainError};

use crate::guardrails::{ContentPolicy, GuardrailDecision, CONTENT_REFUSAL};
use crate::prospects::{format_prospect, format_prospect_list, ProspectRegistry};
use crate::tools::{optional_str, required_str, Tool, ToolError};

const NOT_FOUND: &str = "❌ Prospect not found.";

fn log_failure(operation: &'static str, error: &ApplicationError) {
    warn!(event_name = "agent.prospect.failed", operation, error = %error, "prospect operation failed");
}

/// Runs every free-form field through the content policy. Returns the
/// sanitized values in order, or `None` when any field is refused.
fn screen<const N: usize>(policy: &ContentPolicy, fields: [&str; N]) -> Option<[String; N]> {
    let mut screened: [String; N] = std::array::from_fn(|_| String::new());
    for (slot, field) in screened.iter_mut().zip(fields) {
        match policy.evaluate(field) {
            GuardrailDecision::Allow { sanitized } => *slot = sanitized,
            GuardrailDecision::Deny { .. } => return None,
        }
    }
    Some(screened)
}

pub struct AddProspect {
    policy: Arc<ContentPolicy>,
    registry: Arc<ProspectRegistry>,
}

impl AddProspect {
    pub fn new(policy: Arc<ContentPolicy>, registry: Arc<ProspectRegistry>) -> Self {
        Self { policy, registry }
    }
}

#[async_trait]
impl Tool for AddProspect {
    fn name(&self) -> &'static str {
        "add_prospect"
    }

    fn description(&self) -> &'static str {
        "Add a prospect to the database."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "email": {"type": "string"},
                "company": {"type": "string"},
                "details": {"type": "string", "default": ""}
            },
            "required": ["name", "email", "company"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let name = required_str(&input, "name")?;
        let email = required_str(&input, "email")?;
        let company = required_str(&input, "company")?;
        let details = optional_str(&input, "details").unwrap_or_default();

        let Some([name, company, details]) =
            screen(&self.policy, [name.as_str(), company.as_str(), details.as_str()])
        else {
            return Ok(CONTENT_REFUSAL.to_string());
        };

        match self.registry.add(&name, &email, &company, &details).await {
            Ok(prospect) => Ok(format!("✅ Prospect {} added successfully.", prospect.name)),
            Err(ApplicationError::Domain(DomainError::DuplicateKey { .. })) => {
                Ok(format!("❌ Prospect with email {} already exists.", email.trim()))
            }
            Err(error) => {
                log_failure("add", &error);
                Ok(format!("❌ Error adding prospect: {error}"))
            }
        }
    }
}

pub struct GetProspect {
    registry: Arc<ProspectRegistry>,
}

impl GetProspect {
    pub fn new(registry: Arc<ProspectRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for GetProspect {
    fn name(&self) -> &'static str {
        "get_prospect"
    }

    fn description(&self) -> &'static str {
        "Retrieve prospect info from the database."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"email": {"type": "string"}},
            "required": ["email"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let email = required_str(&input, "email")?;
        match self.registry.get(&email).await {
            Ok(prospect) => Ok(format_prospect(&prospect)),
            Err(ApplicationError::Domain(DomainError::NotFound { .. })) => Ok(NOT_FOUND.to_string()),
            Err(error) => {
                log_failure("get", &error);
                Ok(format!("❌ Error getting prospect: {error}"))
            }
        }
    }
}

pub struct UpdateProspect {
    policy: Arc<ContentPolicy>,
    registry: Arc<ProspectRegistry>,
}

impl UpdateProspect {
    pub fn new(policy: Arc<ContentPolicy>, registry: Arc<ProspectRegistry>) -> Self {
        Self { policy, registry }
    }
}

#[async_trait]
impl Tool for UpdateProspect {
    fn name(&self) -> &'static str {
        "update_prospect"
    }

    fn description(&self) -> &'static str {
        "Update prospect info in the database. Only the supplied fields change."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "email": {"type": "string"},
                "name": {"type": "string"},
                "company": {"type": "string"},
                "details": {"type": "string"}
            },
            "required": ["email"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let email = required_str(&input, "email")?;
        let name = optional_str(&input, "name").unwrap_or_default();
        let company = optional_str(&input, "company").unwrap_or_default();
        let details = optional_str(&input, "details").unwrap_or_default();

        let Some([name, company, details]) =
            screen(&self.policy, [name.as_str(), company.as_str(), details.as_str()])
        else {
            return Ok(CONTENT_REFUSAL.to_string());
        };

        let update = ProspectUpdate::new(Some(name), Some(company), Some(details));
        if update.is_empty() {
            return Ok("❌ No fields to update.".to_string());
        }

        match self.registry.update(&email, update).await {
            Ok(prospect) => Ok(format!("✅ Prospect {} updated successfully.", prospect.email)),
            Err(ApplicationError::Domain(DomainError::NotFound { .. })) => Ok(NOT_FOUND.to_string()),
            Err(error) => {
                log_failure("update", &error);
                Ok(format!("❌ Error updating prospect: {error}"))
            }
        }
    }
}

pub struct ListAllProspects {
    registry: Arc<ProspectRegistry>,
}

impl ListAllProspects {
    pub fn new(registry: Arc<ProspectRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ListAllProspects {
    fn name(&self) -> &'static str {
        "list_all_prospects"
    }

    fn description(&self) -> &'static str {
        "List all prospects in the database."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _input: Value) -> Result<String, ToolError> {
        match self.registry.list_all().await {
            Ok(prospects) => Ok(format_prospect_list(&prospects)),
            Err(error) => {
                log_failure("list", &error);
                Ok(format!("❌ Error listing prospects: {error}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use servyy_db::repositories::InMemoryProspectRepository;

    use super::{AddProspect, GetProspect, ListAllProspects, UpdateProspect};
    use crate::guardrails::{ContentPolicy, CONTENT_REFUSAL};
    use crate::prospects::ProspectRegistry;
    use crate::tools::Tool;

    struct Fixture {
        add: AddProspect,
        get: GetProspect,
        update: UpdateProspect,
        list: ListAllProspects,
    }

    fn fixture() -> Fixture {
        let policy = Arc::new(ContentPolicy::new().expect("policy"));
        let registry =
            Arc::new(ProspectRegistry::new(Arc::new(InMemoryProspectRepository::default())));
        Fixture {
            add: AddProspect::new(policy.clone(), registry.clone()),
            get: GetProspect::new(registry.clone()),
            update: UpdateProspect::new(policy, registry.clone()),
            list: ListAllProspects::new(registry),
        }
    }

    #[tokio::test]
    async fn add_get_and_duplicate_messages() {
        let tools = fixture();
        let jane = json!({"name": "Jane", "email": "jane@acme.io", "company": "Acme"});

        assert_eq!(
            tools.add.execute(jane.clone()).await.expect("add"),
            "✅ Prospect Jane added successfully."
        );
        assert_eq!(
            tools.add.execute(jane).await.expect("add"),
            "❌ Prospect with email jane@acme.io already exists."
        );
        assert_eq!(
            tools.get.execute(json!({"email": "jane@acme.io"})).await.expect("get"),
            "Name: Jane, Email: jane@acme.io, Company: Acme, Details: "
        );
        assert_eq!(
            tools.get.execute(json!({"email": "nobody@acme.io"})).await.expect("get"),
            "❌ Prospect not found."
        );
    }

    #[tokio::test]
    async fn update_changes_only_supplied_fields() {
        let tools = fixture();
        tools
            .add
            .execute(json!({"name": "Jane", "email": "jane@acme.io", "company": "Acme"}))
            .await
            .expect("add");

        assert_eq!(
            tools
                .update
                .execute(json!({"email": "jane@acme.io", "details": "new note", "name": ""}))
                .await
                .expect("update"),
            "✅ Prospect jane@acme.io updated successfully."
        );
        assert_eq!(
            tools.get.execute(json!({"email": "jane@acme.io"})).await.expect("get"),
            "Name: Jane, Email: jane@acme.io, Company: Acme, Details: new note"
        );
        assert_eq!(
            tools.update.execute(json!({"email": "jane@acme.io"})).await.expect("update"),
            "❌ No fields to update."
        );
        assert_eq!(
            tools
                .update
                .execute(json!({"email": "ghost@acme.io", "company": "Ghost"}))
                .await
                .expect("update"),
            "❌ Prospect not found."
        );
    }

    #[tokio::test]
    async fn refused_fields_are_not_stored() {
        let tools = fixture();

        let output = tools
            .add
            .execute(json!({"name": "Jane", "email": "jane@acme.io", "company": "Acme", "details": "phishing target"}))
            .await
            .expect("add");

        assert_eq!(output, CONTENT_REFUSAL);
        assert_eq!(
            tools.list.execute(json!({})).await.expect("list"),
            "📭 No prospects found in database."
        );
    }
}
