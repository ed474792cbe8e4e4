//! Access grants on tuned models and corpora.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ListOptions, Page};
use crate::client::Client;
use crate::names;
use crate::transport::ApiCall;
use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GranteeType {
    User,
    Group,
    Everyone,
}

impl GranteeType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(GranteeType::User),
            "group" => Ok(GranteeType::Group),
            "everyone" => Ok(GranteeType::Everyone),
            other => Err(invalid(
                "grantee_type",
                format!("unknown grantee type `{}`", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionRole {
    Owner,
    Writer,
    Reader,
}

impl PermissionRole {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(PermissionRole::Owner),
            "writer" => Ok(PermissionRole::Writer),
            "reader" => Ok(PermissionRole::Reader),
            other => Err(invalid("role", format!("unknown role `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grantee_type: Option<GranteeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    pub role: PermissionRole,
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("permissions"),
    )
}

/// `Everyone` grants carry no email; all others require one.
fn grant_body(
    role: PermissionRole,
    grantee_type: GranteeType,
    email_address: Option<&str>,
) -> Result<Value> {
    let email = email_address.map(str::trim).filter(|e| !e.is_empty());
    let mut body = Map::new();
    match (grantee_type, email) {
        (GranteeType::Everyone, Some(_)) => {
            return Err(invalid(
                "email_address",
                "an email address cannot be set when granting to everyone",
            ))
        }
        (GranteeType::Everyone, None) => {}
        (_, None) => {
            return Err(invalid(
                "email_address",
                "an email address is required for user and group grants",
            ))
        }
        (_, Some(email)) => {
            body.insert("emailAddress".into(), Value::String(email.to_string()));
        }
    }
    body.insert("granteeType".into(), json!(grantee_type));
    body.insert("role".into(), json!(role));
    Ok(Value::Object(body))
}

impl Client {
    pub async fn create_permission(
        &self,
        parent: &str,
        role: PermissionRole,
        grantee_type: GranteeType,
        email_address: Option<&str>,
    ) -> Result<Permission> {
        let parent = names::permission_parent(parent)?;
        let body = grant_body(role, grantee_type, email_address)?;
        let permission: Permission = self
            .fetch(
                ApiCall::post(format!("{}/permissions", parent), body),
                "permission",
            )
            .await?;
        info!(name = %permission.name, ?role, "granted permission");
        Ok(permission)
    }

    pub async fn get_permission(&self, name: &str) -> Result<Permission> {
        self.fetch(ApiCall::get(names::permission_name(name)?), "permission")
            .await
    }

    pub async fn list_permissions(
        &self,
        parent: &str,
        options: &ListOptions,
    ) -> Result<Page<Permission>> {
        let parent = names::permission_parent(parent)?;
        self.fetch_page(
            ApiCall::get(format!("{}/permissions", parent)),
            options,
            "permissions",
        )
        .await
    }

    /// Only the role of an existing grant can change.
    pub async fn update_permission(&self, name: &str, role: PermissionRole) -> Result<Permission> {
        let name = names::permission_name(name)?;
        let call = ApiCall::patch(name, json!({ "role": role })).with_query("updateMask", "role");
        self.fetch(call, "permission").await
    }

    pub async fn delete_permission(&self, name: &str) -> Result<()> {
        let name = names::permission_name(name)?;
        self.execute(ApiCall::delete(name.clone())).await?;
        info!(name = %name, "revoked permission");
        Ok(())
    }

    /// Make `email_address` the owner of a tuned model; the current owner becomes a writer.
    pub async fn transfer_ownership(&self, tuned_model: &str, email_address: &str) -> Result<()> {
        let name = names::tuned_model_name(tuned_model)?;
        let email = email_address.trim();
        if email.is_empty() {
            return Err(invalid("email_address", "new owner email must not be empty"));
        }
        self.execute(ApiCall::post(
            format!("{}:transferOwnership", name),
            json!({ "emailAddress": email }),
        ))
        .await?;
        info!(name = %name, "transferred ownership");
        Ok(())
    }
}
