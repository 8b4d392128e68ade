use sqlx::PgPool;

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL DEFAULT '',
            owner_id    TEXT NOT NULL,
            secret      TEXT NOT NULL UNIQUE,
            status      TEXT NOT NULL DEFAULT 'enabled',
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS groups (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            owner_id    TEXT NOT NULL,
            parent_id   TEXT REFERENCES groups(id) ON DELETE CASCADE,
            status      TEXT NOT NULL DEFAULT 'enabled',
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS policies (
            owner_id    TEXT NOT NULL,
            subject     TEXT NOT NULL,
            object      TEXT NOT NULL,
            actions     TEXT[] NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_by  TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (subject, object)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_policies_object ON policies (object)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_policies_owner ON policies (owner_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_groups_parent ON groups (parent_id)")
        .execute(pool)
        .await?;

    Ok(())
}
