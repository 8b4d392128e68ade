use chrono::{DateTime, Utc};

use corral_core::entity::{Client, Group, Status};
use corral_core::policy::{Policy, PolicyKey, PolicyPage, PolicyQuery};

use crate::traits::StorageError;

type PolicyRow = (
    String,
    String,
    String,
    Vec<String>,
    DateTime<Utc>,
    DateTime<Utc>,
    String,
);

type ClientRow = (
    String,
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

type GroupRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

const POLICY_COLUMNS: &str =
    "owner_id, subject, object, actions, created_at, updated_at, updated_by";
const CLIENT_COLUMNS: &str = "id, name, owner_id, secret, status, created_at, updated_at";
const GROUP_COLUMNS: &str =
    "id, name, description, owner_id, parent_id, status, created_at, updated_at";

fn to_storage_error(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn to_write_error(e: sqlx::Error, what: String) -> StorageError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return StorageError::Conflict(what);
        }
        if db_err.is_foreign_key_violation() {
            return StorageError::NotFound;
        }
    }
    to_storage_error(e)
}

fn parse_status(raw: &str) -> Result<Status, StorageError> {
    raw.parse::<Status>().map_err(StorageError::Internal)
}

fn policy_from_row(row: PolicyRow) -> Policy {
    let (owner_id, subject, object, actions, created_at, updated_at, updated_by) = row;
    Policy {
        owner_id,
        subject,
        object,
        actions,
        created_at,
        updated_at,
        updated_by,
    }
}

fn client_from_row(row: ClientRow) -> Result<Client, StorageError> {
    let (id, name, owner_id, secret, status, created_at, updated_at) = row;
    Ok(Client {
        id,
        name,
        owner_id,
        secret,
        status: parse_status(&status)?,
        created_at,
        updated_at,
    })
}

fn group_from_row(row: GroupRow) -> Result<Group, StorageError> {
    let (id, name, description, owner_id, parent_id, status, created_at, updated_at) = row;
    Ok(Group {
        id,
        name,
        description,
        owner_id,
        parent_id,
        status: parse_status(&status)?,
        created_at,
        updated_at,
        level: 0,
        path: String::new(),
    })
}

pub async fn insert_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    policy: &Policy,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO policies (owner_id, subject, object, actions, created_at, updated_at, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&policy.owner_id)
    .bind(&policy.subject)
    .bind(&policy.object)
    .bind(&policy.actions)
    .bind(policy.created_at)
    .bind(policy.updated_at)
    .bind(&policy.updated_by)
    .execute(executor)
    .await
    .map_err(|e| to_write_error(e, policy.key().to_string()))?;
    Ok(())
}

pub async fn update_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    policy: &Policy,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE policies SET actions = $3, updated_at = $4, updated_by = $5
        WHERE subject = $1 AND object = $2
        "#,
    )
    .bind(&policy.subject)
    .bind(&policy.object)
    .bind(&policy.actions)
    .bind(policy.updated_at)
    .bind(&policy.updated_by)
    .execute(executor)
    .await
    .map_err(to_storage_error)?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

pub async fn delete_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    key: &PolicyKey,
) -> Result<(), StorageError> {
    let result = sqlx::query("DELETE FROM policies WHERE subject = $1 AND object = $2")
        .bind(&key.subject)
        .bind(&key.object)
        .execute(executor)
        .await
        .map_err(to_storage_error)?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

pub async fn select_policy<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    key: &PolicyKey,
) -> Result<Option<Policy>, StorageError> {
    let query = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE subject = $1 AND object = $2");
    let row: Option<PolicyRow> = sqlx::query_as(&query)
        .bind(&key.subject)
        .bind(&key.object)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(row.map(policy_from_row))
}

pub async fn select_policies_by_subject<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    subject: &str,
) -> Result<Vec<Policy>, StorageError> {
    let query =
        format!("SELECT {POLICY_COLUMNS} FROM policies WHERE subject = $1 ORDER BY object");
    let rows: Vec<PolicyRow> = sqlx::query_as(&query)
        .bind(subject)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    Ok(rows.into_iter().map(policy_from_row).collect())
}

fn policy_filter(query: &PolicyQuery) -> (String, Vec<&str>) {
    let mut conditions = vec!["TRUE".to_string()];
    let mut binds: Vec<&str> = Vec::new();

    if let Some(ref owner) = query.owner_id {
        binds.push(owner.as_str());
        conditions.push(format!("owner_id = ${}", binds.len()));
    }
    if let Some(ref subject) = query.subject {
        binds.push(subject.as_str());
        conditions.push(format!("subject = ${}", binds.len()));
    }
    if let Some(ref object) = query.object {
        binds.push(object.as_str());
        conditions.push(format!("object = ${}", binds.len()));
    }
    if let Some(ref action) = query.action {
        binds.push(action.as_str());
        conditions.push(format!("${} = ANY(actions)", binds.len()));
    }

    (conditions.join(" AND "), binds)
}

pub async fn select_policy_page(
    pool: &sqlx::PgPool,
    query: &PolicyQuery,
) -> Result<PolicyPage, StorageError> {
    let (where_clause, binds) = policy_filter(query);
    let limit = query.effective_limit();

    let count_query = format!("SELECT COUNT(*) FROM policies WHERE {where_clause}");
    let mut count = sqlx::query_as::<_, (i64,)>(&count_query);
    for bind in &binds {
        count = count.bind(*bind);
    }
    let (total,) = count.fetch_one(pool).await.map_err(to_storage_error)?;

    let page_query = format!(
        r#"SELECT {POLICY_COLUMNS} FROM policies
           WHERE {where_clause}
           ORDER BY subject, object
           LIMIT {limit} OFFSET {offset}"#,
        offset = query.offset
    );
    let mut page = sqlx::query_as::<_, PolicyRow>(&page_query);
    for bind in &binds {
        page = page.bind(*bind);
    }
    let rows = page.fetch_all(pool).await.map_err(to_storage_error)?;

    Ok(PolicyPage {
        total: u64::try_from(total).unwrap_or_default(),
        offset: query.offset,
        limit,
        policies: rows.into_iter().map(policy_from_row).collect(),
    })
}

pub async fn insert_client<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    client: &Client,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO clients (id, name, owner_id, secret, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&client.id)
    .bind(&client.name)
    .bind(&client.owner_id)
    .bind(&client.secret)
    .bind(client.status.as_str())
    .bind(client.created_at)
    .bind(client.updated_at)
    .execute(executor)
    .await
    .map_err(|e| to_write_error(e, format!("client {}", client.id)))?;
    Ok(())
}

pub async fn select_client<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    column: ClientLookup,
    value: &str,
) -> Result<Option<Client>, StorageError> {
    let query = format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE {} = $1",
        column.as_str()
    );
    let row: Option<ClientRow> = sqlx::query_as(&query)
        .bind(value)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(client_from_row).transpose()
}

#[derive(Debug, Clone, Copy)]
pub enum ClientLookup {
    Id,
    Secret,
}

impl ClientLookup {
    fn as_str(self) -> &'static str {
        match self {
            ClientLookup::Id => "id",
            ClientLookup::Secret => "secret",
        }
    }
}

pub async fn update_client_status<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
    status: Status,
) -> Result<Client, StorageError> {
    let query = format!(
        "UPDATE clients SET status = $2, updated_at = now() WHERE id = $1 RETURNING {CLIENT_COLUMNS}"
    );
    let row: Option<ClientRow> = sqlx::query_as(&query)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(client_from_row)
        .transpose()?
        .ok_or(StorageError::NotFound)
}

pub async fn insert_group<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    group: &Group,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO groups (id, name, description, owner_id, parent_id, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&group.id)
    .bind(&group.name)
    .bind(&group.description)
    .bind(&group.owner_id)
    .bind(&group.parent_id)
    .bind(group.status.as_str())
    .bind(group.created_at)
    .bind(group.updated_at)
    .execute(executor)
    .await
    .map_err(|e| to_write_error(e, format!("group {}", group.id)))?;
    Ok(())
}

pub async fn select_group<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
) -> Result<Option<Group>, StorageError> {
    let query = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1");
    let row: Option<GroupRow> = sqlx::query_as(&query)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(group_from_row).transpose()
}

pub async fn select_all_groups<'e>(
    executor: impl sqlx::PgExecutor<'e>,
) -> Result<Vec<Group>, StorageError> {
    let query = format!("SELECT {GROUP_COLUMNS} FROM groups ORDER BY id");
    let rows: Vec<GroupRow> = sqlx::query_as(&query)
        .fetch_all(executor)
        .await
        .map_err(to_storage_error)?;
    rows.into_iter().map(group_from_row).collect()
}

pub async fn update_group_status<'e>(
    executor: impl sqlx::PgExecutor<'e>,
    id: &str,
    status: Status,
) -> Result<Group, StorageError> {
    let query = format!(
        "UPDATE groups SET status = $2, updated_at = now() WHERE id = $1 RETURNING {GROUP_COLUMNS}"
    );
    let row: Option<GroupRow> = sqlx::query_as(&query)
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(executor)
        .await
        .map_err(to_storage_error)?;
    row.map(group_from_row)
        .transpose()?
        .ok_or(StorageError::NotFound)
}
