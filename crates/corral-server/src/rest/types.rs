use serde::{Deserialize, Serialize};

use corral_core::entity::{Client, Group};
use corral_core::policy::{AccessRequest, Policy, PolicyKey};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub entity_type: String,
    pub object: String,
    pub action: String,
}

impl AuthorizeRequest {
    pub fn access_request(&self) -> AccessRequest {
        AccessRequest::new(&self.object, &self.action)
    }
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
}

#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub subject: String,
    pub object: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl From<PolicyRequest> for Policy {
    fn from(req: PolicyRequest) -> Self {
        Policy::new(req.subject, req.object, req.actions)
    }
}

#[derive(Debug, Deserialize)]
pub struct PolicyKeyRequest {
    pub subject: String,
    pub object: String,
}

impl From<PolicyKeyRequest> for PolicyKey {
    fn from(req: PolicyKeyRequest) -> Self {
        PolicyKey::new(req.subject, req.object)
    }
}

#[derive(Debug, Deserialize)]
pub struct ThingKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct ThingIdRequest {
    pub thing_id: String,
}

#[derive(Debug, Serialize)]
pub struct ThingResponse {
    pub thing_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateGroupRequest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parent_id: Option<String>,
}

impl From<CreateGroupRequest> for Group {
    fn from(req: CreateGroupRequest) -> Self {
        let mut group = Group::new(req.id, "");
        group.name = req.name;
        group.description = req.description;
        group.parent_id = req.parent_id;
        group
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterClientRequest {
    pub id: String,
    pub name: String,
    pub secret: String,
}

impl From<RegisterClientRequest> for Client {
    fn from(req: RegisterClientRequest) -> Self {
        let mut client = Client::new(req.id, "", req.secret);
        client.name = req.name;
        client
    }
}
