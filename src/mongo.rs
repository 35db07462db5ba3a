//! `ClusterAdmin` over the MongoDB driver
//!
//! Each call opens a direct connection to the addressed member and runs
//! one command against the `admin` database.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::admin::{AdminError, ClusterAdmin, ConfigRead, NodeRole};
use crate::config::AuthConfig;
use crate::types::{ClusterConfig, Member, MemberAddress};

/// Server error codes the controller interprets
pub mod codes {
    pub const ALREADY_INITIALIZED: i32 = 23;
    pub const NOT_YET_INITIALIZED: i32 = 94;
    pub const NEW_CONFIG_INCOMPATIBLE: i32 = 103;
    pub const CONFIGURATION_IN_PROGRESS: i32 = 109;
}

const APP_NAME: &str = "replica-controller";

/// Member entry as stored in the configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberDocument {
    #[serde(rename = "_id")]
    id: i64,
    host: String,
}

/// The parts of a configuration document the controller reads and writes
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(rename = "_id")]
    set_name: String,
    version: i64,
    members: Vec<MemberDocument>,
}

impl ConfigDocument {
    fn from_config(config: &ClusterConfig) -> Self {
        Self {
            set_name: config.set_name.clone(),
            version: config.version,
            members: config
                .members
                .iter()
                .map(|m| MemberDocument {
                    id: i64::from(m.id),
                    host: m.host.to_string(),
                })
                .collect(),
        }
    }

    fn into_config(self, default_port: u16) -> Result<ClusterConfig, AdminError> {
        let mut members = Vec::with_capacity(self.members.len());
        for member in self.members {
            let id = u32::try_from(member.id)
                .map_err(|_| AdminError::Malformed(format!("member _id {} out of range", member.id)))?;
            let host = MemberAddress::parse_with_default(&member.host, default_port)
                .map_err(|e| AdminError::Malformed(e.to_string()))?;
            members.push(Member::new(id, host));
        }
        members.sort_by_key(|m| m.id);

        Ok(ClusterConfig {
            set_name: self.set_name,
            version: self.version,
            members,
        })
    }
}

fn member_id(member: &Document) -> Result<i64, AdminError> {
    match member.get("_id") {
        Some(Bson::Int32(id)) => Ok(i64::from(*id)),
        Some(Bson::Int64(id)) => Ok(*id),
        Some(Bson::Double(id)) if id.fract() == 0.0 => Ok(*id as i64),
        other => Err(AdminError::Malformed(format!("member _id {:?}", other))),
    }
}

fn config_version(document: &Document) -> Result<i64, AdminError> {
    match document.get("version") {
        Some(Bson::Int32(v)) => Ok(i64::from(*v)),
        Some(Bson::Int64(v)) => Ok(*v),
        Some(Bson::Double(v)) if v.fract() == 0.0 => Ok(*v as i64),
        other => Err(AdminError::Malformed(format!("config version {:?}", other))),
    }
}

/// Build the document for `replSetReconfig` on top of the one in force
///
/// Retained members keep their whole subdocument (priority, votes, tags and
/// so on) and top-level fields such as `settings` are carried over. Added
/// members get only `_id` and `host`, leaving the rest to server defaults.
fn reconfig_document(current: &Document, config: &ClusterConfig) -> Result<Document, AdminError> {
    let current_version = config_version(current)?;
    if current_version + 1 != config.version {
        return Err(AdminError::VersionConflict(format!(
            "configuration moved to version {} while planning version {}",
            current_version, config.version
        )));
    }

    let mut existing: HashMap<i64, Document> = HashMap::new();
    let members = current
        .get_array("members")
        .map_err(|e| AdminError::Malformed(e.to_string()))?;
    for member in members {
        let member = member
            .as_document()
            .ok_or_else(|| AdminError::Malformed("member entry is not a document".to_string()))?;
        existing.insert(member_id(member)?, member.clone());
    }

    let mut next = Vec::with_capacity(config.members.len());
    for member in &config.members {
        let id = i64::from(member.id);
        let entry = match existing.remove(&id) {
            Some(kept) => kept,
            None => {
                let id = i32::try_from(member.id)
                    .map_err(|_| AdminError::Malformed(format!("member _id {} out of range", member.id)))?;
                doc! { "_id": id, "host": member.host.to_string() }
            }
        };
        next.push(Bson::Document(entry));
    }

    let mut document = current.clone();
    document.remove("term");
    document.insert("version", config.version);
    document.insert("members", next);
    Ok(document)
}

/// Connection parameters for reaching individual members
#[derive(Debug, Clone)]
pub struct MongoAdmin {
    connect_timeout: Duration,
    default_port: u16,
    auth: Option<AuthConfig>,
}

impl MongoAdmin {
    pub fn new(connect_timeout: Duration, default_port: u16, auth: Option<AuthConfig>) -> Self {
        Self {
            connect_timeout,
            default_port,
            auth,
        }
    }

    async fn client(&self, target: &MemberAddress) -> Result<Client, AdminError> {
        let uri = format!("mongodb://{}/?directConnection=true", target);
        let mut options = ClientOptions::parse(uri.as_str())
            .await
            .map_err(|e| AdminError::Connectivity(e.to_string()))?;

        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);

        if let Some(auth) = &self.auth {
            let mut credential = Credential::default();
            credential.username = Some(auth.username.clone());
            credential.password = Some(auth.password.clone());
            credential.source = auth.source.clone();
            options.credential = Some(credential);
        }

        Client::with_options(options).map_err(|e| AdminError::Connectivity(e.to_string()))
    }

    async fn run_command(&self, target: &MemberAddress, command: Document) -> Result<Document, AdminError> {
        let client = self.client(target).await?;

        debug!(member = %target, command = %command, "run_command");
        let result = client.database("admin").run_command(command, None).await;
        client.shutdown().await;

        let reply = result.map_err(classify)?;
        debug!(member = %target, reply = %reply, "run_command reply");
        Ok(reply)
    }
}

/// Map a driver error onto the controller's classification
fn classify(err: MongoError) -> AdminError {
    match *err.kind {
        ErrorKind::Command(ref command) => {
            let message = command.message.clone();
            match command.code {
                codes::ALREADY_INITIALIZED => AdminError::AlreadyInitialized,
                codes::CONFIGURATION_IN_PROGRESS => AdminError::VersionConflict(message),
                codes::NEW_CONFIG_INCOMPATIBLE if message.to_lowercase().contains("version") => {
                    AdminError::VersionConflict(message)
                }
                code => AdminError::Rejected { code, message },
            }
        }
        _ => AdminError::Connectivity(err.to_string()),
    }
}

fn role_from_reply(reply: &Document) -> NodeRole {
    let flag = |key: &str| reply.get_bool(key).unwrap_or(false);

    if flag("ismaster") || flag("isWritablePrimary") {
        NodeRole::Primary
    } else if flag("secondary") {
        NodeRole::Secondary
    } else if reply.get_str("setName").is_err() {
        NodeRole::Uninitialized
    } else {
        NodeRole::Other
    }
}

#[async_trait]
impl ClusterAdmin for MongoAdmin {
    async fn probe(&self, target: &MemberAddress) -> Result<NodeRole, AdminError> {
        let reply = self.run_command(target, doc! { "isMaster": 1 }).await?;
        Ok(role_from_reply(&reply))
    }

    async fn read_config(&self, target: &MemberAddress) -> Result<ConfigRead, AdminError> {
        let reply = match self.run_command(target, doc! { "replSetGetConfig": 1 }).await {
            Ok(reply) => reply,
            Err(AdminError::Rejected { code, .. }) if code == codes::NOT_YET_INITIALIZED => {
                return Ok(ConfigRead::NotInitialized)
            }
            Err(e) => return Err(e),
        };

        let config = reply
            .get_document("config")
            .map_err(|e| AdminError::Malformed(e.to_string()))?;
        let document: ConfigDocument = bson::from_document(config.clone())
            .map_err(|e| AdminError::Malformed(e.to_string()))?;

        Ok(ConfigRead::Present(document.into_config(self.default_port)?))
    }

    async fn initiate(&self, target: &MemberAddress, config: &ClusterConfig) -> Result<(), AdminError> {
        let document = bson::to_document(&ConfigDocument::from_config(config))
            .map_err(|e| AdminError::Malformed(e.to_string()))?;

        self.run_command(target, doc! { "replSetInitiate": document })
            .await
            .map(|_| ())
    }

    async fn reconfigure(&self, target: &MemberAddress, config: &ClusterConfig, force: bool) -> Result<(), AdminError> {
        let reply = self.run_command(target, doc! { "replSetGetConfig": 1 }).await?;
        let current = reply
            .get_document("config")
            .map_err(|e| AdminError::Malformed(e.to_string()))?;
        let document = reconfig_document(current, config)?;

        self.run_command(target, doc! { "replSetReconfig": document, "force": Bson::Boolean(force) })
            .await
            .map(|_| ())
    }
}
