//! libSQL backend — async implementation of both store traits.
//!
//! One backend serves the server-side invitation tables and the client-side
//! wizard draft table. Supports local file and in-memory databases; the file
//! variant is what makes wizard drafts survive a client restart.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::invitation::model::{Invitation, InvitationRole, InvitationStatus, Profile};
use crate::store::traits::{DraftStore, InvitationStore};
use crate::wizard::session::WizardSession;
use crate::wizard::steps::{StepFields, StepId};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Create tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS invitations (
                    id TEXT NOT NULL,
                    token TEXT PRIMARY KEY,
                    email TEXT NOT NULL,
                    role TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    requires_wizard INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    accepted_at TEXT,
                    profile_created INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_invitations_email ON invitations(email);
                CREATE INDEX IF NOT EXISTS idx_invitations_status ON invitations(status);

                CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT NOT NULL,
                    email TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL UNIQUE,
                    data TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS wizard_sessions (
                    invitation_token TEXT PRIMARY KEY,
                    step_index INTEGER NOT NULL DEFAULT 0,
                    revision INTEGER NOT NULL DEFAULT 0,
                    draft TEXT NOT NULL DEFAULT '{}',
                    completed_steps TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL
                );",
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("Schema init failed: {e}")))?;
        Ok(())
    }

    /// One-shot terminal transition: only fires while still pending.
    async fn mark_terminal(&self, token: &str, status: &'static str) -> Result<(), DatabaseError> {
        let affected = self
            .conn
            .execute(
                "UPDATE invitations SET status = ?2 WHERE token = ?1 AND status = 'pending'",
                params![token, status],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if affected == 0 {
            return Err(DatabaseError::Constraint(format!(
                "invitation is not pending, cannot mark {status}"
            )));
        }
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string (our canonical write format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn status_to_str(status: InvitationStatus) -> &'static str {
    match status {
        InvitationStatus::Pending => "pending",
        InvitationStatus::Accepted => "accepted",
        InvitationStatus::Declined => "declined",
        InvitationStatus::Expired => "expired",
        InvitationStatus::Cancelled => "cancelled",
    }
}

fn str_to_status(s: &str) -> InvitationStatus {
    match s {
        "accepted" => InvitationStatus::Accepted,
        "declined" => InvitationStatus::Declined,
        "expired" => InvitationStatus::Expired,
        "cancelled" => InvitationStatus::Cancelled,
        _ => InvitationStatus::Pending,
    }
}

fn role_to_str(role: InvitationRole) -> &'static str {
    match role {
        InvitationRole::Teacher => "teacher",
        InvitationRole::Admin => "admin",
        InvitationRole::Member => "member",
    }
}

fn str_to_role(s: &str) -> InvitationRole {
    match s {
        "teacher" => InvitationRole::Teacher,
        "admin" => InvitationRole::Admin,
        _ => InvitationRole::Member,
    }
}

/// Map a libsql row to an Invitation.
///
/// Column order: 0:id, 1:token, 2:email, 3:role, 4:status, 5:requires_wizard,
/// 6:created_at, 7:expires_at, 8:accepted_at, 9:profile_created
fn row_to_invitation(row: &libsql::Row) -> Result<Invitation, libsql::Error> {
    let id_str: String = row.get(0)?;
    let token: String = row.get(1)?;
    let email: String = row.get(2)?;
    let role_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let requires_wizard: i64 = row.get(5)?;
    let created_str: String = row.get(6)?;
    let expires_str: String = row.get(7)?;
    let accepted_str: Option<String> = row.get(8)?;
    let profile_created: Option<i64> = row.get(9)?;

    Ok(Invitation {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        token,
        email,
        role: str_to_role(&role_str),
        status: str_to_status(&status_str),
        requires_wizard: requires_wizard != 0,
        created_at: parse_datetime(&created_str),
        expires_at: parse_datetime(&expires_str),
        accepted_at: accepted_str.as_deref().map(parse_datetime),
        profile_created: profile_created.map(|v| v != 0),
    })
}

/// Map a libsql row to a WizardSession.
///
/// Column order: 0:invitation_token, 1:step_index, 2:revision, 3:draft,
/// 4:completed_steps
fn row_to_session(row: &libsql::Row) -> Result<WizardSession, DatabaseError> {
    let token: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let step_index: i64 = row
        .get(1)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let revision: i64 = row
        .get(2)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let draft_json: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;
    let completed_json: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(e.to_string()))?;

    let draft = serde_json::from_str(&draft_json)
        .map_err(|e| DatabaseError::Serialization(format!("draft column: {e}")))?;
    let completed_steps: BTreeSet<StepId> = serde_json::from_str(&completed_json)
        .map_err(|e| DatabaseError::Serialization(format!("completed_steps column: {e}")))?;

    Ok(WizardSession {
        invitation_token: token,
        step_index: step_index as usize,
        revision: revision as u64,
        draft,
        completed_steps,
    })
}

#[async_trait]
impl InvitationStore for LibSqlBackend {
    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO invitations (id, token, email, role, status, requires_wizard,
                 created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    invitation.id.to_string(),
                    invitation.token.clone(),
                    invitation.email.clone(),
                    role_to_str(invitation.role),
                    status_to_str(invitation.status),
                    i64::from(invitation.requires_wizard),
                    invitation.created_at.to_rfc3339(),
                    invitation.expires_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_invitation(&self, token: &str) -> Result<Option<Invitation>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, token, email, role, status, requires_wizard,
                 created_at, expires_at, accepted_at, profile_created
                 FROM invitations WHERE token = ?1",
                params![token],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(
                row_to_invitation(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn mark_accepted(
        &self,
        token: &str,
        accepted_at: DateTime<Utc>,
        profile_created: bool,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn
            .execute(
                "UPDATE invitations
                 SET status = 'accepted', accepted_at = ?2, profile_created = ?3
                 WHERE token = ?1 AND status = 'pending'",
                params![
                    token,
                    accepted_at.to_rfc3339(),
                    i64::from(profile_created)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if affected == 0 {
            return Err(DatabaseError::Constraint(
                "invitation is not pending, cannot accept".into(),
            ));
        }
        Ok(())
    }

    async fn mark_declined(&self, token: &str) -> Result<(), DatabaseError> {
        self.mark_terminal(token, "declined").await
    }

    async fn mark_expired(&self, token: &str) -> Result<(), DatabaseError> {
        self.mark_terminal(token, "expired").await
    }

    async fn mark_cancelled(&self, token: &str) -> Result<(), DatabaseError> {
        self.mark_terminal(token, "cancelled").await
    }

    async fn find_profile(&self, email: &str) -> Result<Option<Profile>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, email, display_name, data, created_at FROM profiles WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        else {
            return Ok(None);
        };

        let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
        let email: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
        let display_name: String =
            row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
        let data_json: String = row.get(3).map_err(|e| DatabaseError::Query(e.to_string()))?;
        let created_str: String =
            row.get(4).map_err(|e| DatabaseError::Query(e.to_string()))?;

        Ok(Some(Profile {
            id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
            email,
            display_name,
            data: serde_json::from_str(&data_json)
                .map_err(|e| DatabaseError::Serialization(format!("profile data: {e}")))?,
            created_at: parse_datetime(&created_str),
        }))
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), DatabaseError> {
        let data_json = serde_json::to_string(&profile.data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO profiles (id, email, display_name, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    profile.id.to_string(),
                    profile.email.clone(),
                    profile.display_name.clone(),
                    data_json,
                    profile.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    async fn display_name_taken(&self, display_name: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM profiles WHERE display_name = ?1",
                params![display_name],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        let count: i64 = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?,
            None => 0,
        };
        Ok(count > 0)
    }
}

#[async_trait]
impl DraftStore for LibSqlBackend {
    async fn get(&self, token: &str) -> Result<Option<WizardSession>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT invitation_token, step_index, revision, draft, completed_steps
                 FROM wizard_sessions WHERE invitation_token = ?1",
                params![token],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(row_to_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_fields(
        &self,
        token: &str,
        fields: StepFields,
        expected_revision: u64,
    ) -> Result<u64, DatabaseError> {
        match DraftStore::get(self, token).await? {
            None => {
                if expected_revision != 0 {
                    return Err(DatabaseError::StaleRevision {
                        given: expected_revision,
                        current: 0,
                    });
                }
                let mut session = WizardSession::new(token);
                session.draft.merge(fields);
                self.insert_session(&session, 1).await?;
                Ok(1)
            }
            Some(mut session) => {
                if session.revision != expected_revision {
                    return Err(DatabaseError::StaleRevision {
                        given: expected_revision,
                        current: session.revision,
                    });
                }
                session.draft.merge(fields);
                let next = session.revision + 1;
                let draft_json = serde_json::to_string(&session.draft)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                self.guarded_session_update(
                    token,
                    expected_revision,
                    next,
                    "draft = ?3",
                    draft_json,
                )
                .await?;
                Ok(next)
            }
        }
    }

    async fn set_position(
        &self,
        token: &str,
        step_index: usize,
        completed_steps: &BTreeSet<StepId>,
        expected_revision: u64,
    ) -> Result<u64, DatabaseError> {
        let completed_json = serde_json::to_string(completed_steps)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        match DraftStore::get(self, token).await? {
            None => {
                if expected_revision != 0 {
                    return Err(DatabaseError::StaleRevision {
                        given: expected_revision,
                        current: 0,
                    });
                }
                let mut session = WizardSession::new(token);
                session.step_index = step_index;
                session.completed_steps = completed_steps.clone();
                self.insert_session(&session, 1).await?;
                Ok(1)
            }
            Some(session) => {
                if session.revision != expected_revision {
                    return Err(DatabaseError::StaleRevision {
                        given: expected_revision,
                        current: session.revision,
                    });
                }
                let next = session.revision + 1;
                let affected = self
                    .conn
                    .execute(
                        "UPDATE wizard_sessions
                         SET step_index = ?3, completed_steps = ?4, revision = ?2, updated_at = ?5
                         WHERE invitation_token = ?1 AND revision = ?6",
                        params![
                            token,
                            next as i64,
                            step_index as i64,
                            completed_json,
                            Utc::now().to_rfc3339(),
                            expected_revision as i64,
                        ],
                    )
                    .await
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
                if affected == 0 {
                    let current = DraftStore::get(self, token)
                        .await?
                        .map(|s| s.revision)
                        .unwrap_or(0);
                    return Err(DatabaseError::StaleRevision {
                        given: expected_revision,
                        current,
                    });
                }
                Ok(next)
            }
        }
    }

    async fn clear(&self, token: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM wizard_sessions WHERE invitation_token = ?1",
                params![token],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }
}

impl LibSqlBackend {
    async fn insert_session(
        &self,
        session: &WizardSession,
        revision: u64,
    ) -> Result<(), DatabaseError> {
        let draft_json = serde_json::to_string(&session.draft)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let completed_json = serde_json::to_string(&session.completed_steps)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO wizard_sessions
                 (invitation_token, step_index, revision, draft, completed_steps, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.invitation_token.clone(),
                    session.step_index as i64,
                    revision as i64,
                    draft_json,
                    completed_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }

    /// Revision-guarded single-column session update; the SQL-level revision
    /// check closes the race left open by the read-then-write above.
    async fn guarded_session_update(
        &self,
        token: &str,
        expected_revision: u64,
        next_revision: u64,
        set_clause: &str,
        value: String,
    ) -> Result<(), DatabaseError> {
        let sql = format!(
            "UPDATE wizard_sessions SET {set_clause}, revision = ?2, updated_at = ?4
             WHERE invitation_token = ?1 AND revision = ?5"
        );
        let affected = self
            .conn
            .execute(
                &sql,
                params![
                    token,
                    next_revision as i64,
                    value,
                    Utc::now().to_rfc3339(),
                    expected_revision as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        if affected == 0 {
            let current = DraftStore::get(self, token)
                .await?
                .map(|s| s.revision)
                .unwrap_or(0);
            return Err(DatabaseError::StaleRevision {
                given: expected_revision,
                current,
            });
        }
        Ok(())
    }
}
