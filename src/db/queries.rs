use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::db::store::{StoreError, StoreResult, VoteFilter};
use crate::models::{Poll, PollOption, User, Vote};

const POLL_COLUMNS: &str = "id, title, description, created_by, is_active, allow_multiple_votes, expires_at, created_at, updated_at";

// Fixed-width UTC text so that SQL string comparison orders like time.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(table: &'static str, column: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            message: format!("failed to parse {}: {}", column, e),
        })
}

fn poll_from_row(row: &SqliteRow) -> StoreResult<Poll> {
    let expires_at = match row.get::<Option<String>, _>("expires_at") {
        Some(raw) => Some(parse_timestamp("polls", "expires_at", &raw)?),
        None => None,
    };

    Ok(Poll {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        created_by: row.get("created_by"),
        is_active: row.get("is_active"),
        allow_multiple_votes: row.get("allow_multiple_votes"),
        expires_at,
        created_at: parse_timestamp("polls", "created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp("polls", "updated_at", &row.get::<String, _>("updated_at"))?,
    })
}

fn vote_from_row(row: &SqliteRow) -> StoreResult<Vote> {
    Ok(Vote {
        id: row.get("id"),
        poll_id: row.get("poll_id"),
        option_id: row.get("option_id"),
        user_id: row.get("user_id"),
        created_at: parse_timestamp("votes", "created_at", &row.get::<String, _>("created_at"))?,
    })
}

pub async fn get_poll(conn: &mut SqliteConnection, poll_id: &str) -> StoreResult<Option<Poll>> {
    let row = sqlx::query(&format!("SELECT {} FROM polls WHERE id = ?", POLL_COLUMNS))
        .bind(poll_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(poll_from_row).transpose()
}

pub async fn list_polls(conn: &mut SqliteConnection, created_by: Option<&str>) -> StoreResult<Vec<Poll>> {
    let rows = match created_by {
        Some(creator) => {
            sqlx::query(&format!(
                "SELECT {} FROM polls WHERE created_by = ? ORDER BY created_at DESC",
                POLL_COLUMNS
            ))
            .bind(creator)
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT {} FROM polls ORDER BY created_at DESC", POLL_COLUMNS))
                .fetch_all(&mut *conn)
                .await?
        }
    };

    rows.iter().map(poll_from_row).collect()
}

pub async fn insert_poll(conn: &mut SqliteConnection, poll: &Poll) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO polls (id, title, description, created_by, is_active, allow_multiple_votes, expires_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&poll.id)
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(&poll.created_by)
    .bind(poll.is_active)
    .bind(poll.allow_multiple_votes)
    .bind(poll.expires_at.map(timestamp))
    .bind(timestamp(poll.created_at))
    .bind(timestamp(poll.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_poll(conn: &mut SqliteConnection, poll: &Poll) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE polls
        SET title = ?, description = ?, is_active = ?, allow_multiple_votes = ?, expires_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(poll.is_active)
    .bind(poll.allow_multiple_votes)
    .bind(poll.expires_at.map(timestamp))
    .bind(timestamp(poll.updated_at))
    .bind(&poll.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_poll(conn: &mut SqliteConnection, poll_id: &str) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn set_poll_active(conn: &mut SqliteConnection, poll_id: &str, is_active: bool) -> StoreResult<()> {
    sqlx::query("UPDATE polls SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(is_active)
        .bind(timestamp(Utc::now()))
        .bind(poll_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_options(conn: &mut SqliteConnection, poll_id: &str) -> StoreResult<Vec<PollOption>> {
    let options = sqlx::query(
        r#"
        SELECT id, poll_id, text, position, vote_count
        FROM poll_options
        WHERE poll_id = ?
        ORDER BY position
        "#,
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| PollOption {
        id: row.get("id"),
        poll_id: row.get("poll_id"),
        text: row.get("text"),
        position: row.get("position"),
        vote_count: row.get("vote_count"),
    })
    .collect();
    Ok(options)
}

pub async fn insert_options(conn: &mut SqliteConnection, options: &[PollOption]) -> StoreResult<()> {
    for option in options {
        sqlx::query(
            r#"
            INSERT INTO poll_options (id, poll_id, text, position, vote_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&option.id)
        .bind(&option.poll_id)
        .bind(&option.text)
        .bind(option.position)
        .bind(option.vote_count)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn update_option(conn: &mut SqliteConnection, option: &PollOption) -> StoreResult<()> {
    sqlx::query("UPDATE poll_options SET text = ?, position = ? WHERE id = ? AND poll_id = ?")
        .bind(&option.text)
        .bind(option.position)
        .bind(&option.id)
        .bind(&option.poll_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_options(conn: &mut SqliteConnection, option_ids: &[String]) -> StoreResult<()> {
    if option_ids.is_empty() {
        return Ok(());
    }

    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM poll_options WHERE id IN (");
    let mut ids = query.separated(", ");
    for id in option_ids {
        ids.push_bind(id);
    }
    ids.push_unseparated(")");
    query.build().execute(&mut *conn).await?;
    Ok(())
}

pub async fn get_votes(
    conn: &mut SqliteConnection,
    poll_id: &str,
    user_id: Option<&str>,
) -> StoreResult<Vec<Vote>> {
    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT id, poll_id, option_id, user_id, created_at FROM votes WHERE poll_id = ",
    );
    query.push_bind(poll_id);
    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }
    query.push(" ORDER BY created_at, id");

    query
        .build()
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(vote_from_row)
        .collect()
}

pub async fn insert_votes(conn: &mut SqliteConnection, votes: &[Vote]) -> StoreResult<()> {
    for vote in votes {
        sqlx::query(
            r#"
            INSERT INTO votes (id, poll_id, option_id, user_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&vote.id)
        .bind(&vote.poll_id)
        .bind(&vote.option_id)
        .bind(&vote.user_id)
        .bind(timestamp(vote.created_at))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn delete_votes(conn: &mut SqliteConnection, filter: &VoteFilter) -> StoreResult<u64> {
    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM votes WHERE poll_id = ");
    query.push_bind(&filter.poll_id);
    if let Some(user_id) = &filter.user_id {
        query.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(option_ids) = &filter.option_ids {
        if option_ids.is_empty() {
            return Ok(0);
        }
        query.push(" AND option_id IN (");
        let mut ids = query.separated(", ");
        for id in option_ids {
            ids.push_bind(id);
        }
        ids.push_unseparated(")");
    }

    let result = query.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub async fn update_option_count(conn: &mut SqliteConnection, option_id: &str, count: i64) -> StoreResult<()> {
    sqlx::query("UPDATE poll_options SET vote_count = ? WHERE id = ?")
        .bind(count)
        .bind(option_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn count_votes_since(
    conn: &mut SqliteConnection,
    poll_ids: &[String],
    since: DateTime<Utc>,
) -> StoreResult<i64> {
    if poll_ids.is_empty() {
        return Ok(0);
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM votes WHERE created_at >= ");
    query.push_bind(timestamp(since));
    query.push(" AND poll_id IN (");
    let mut ids = query.separated(", ");
    for id in poll_ids {
        ids.push_bind(id);
    }
    ids.push_unseparated(")");

    let row = query.build().fetch_one(&mut *conn).await?;
    Ok(row.get::<i64, _>("total"))
}

pub async fn expired_active_polls(conn: &mut SqliteConnection, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
    let ids = sqlx::query(
        r#"
        SELECT id
        FROM polls
        WHERE expires_at IS NOT NULL AND expires_at <= ? AND is_active = TRUE
        "#,
    )
    .bind(timestamp(now))
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| row.get::<String, _>("id"))
    .collect();
    Ok(ids)
}

pub async fn upsert_user(conn: &mut SqliteConnection, user: &User) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO users (id, email, name, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name
        "#,
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.name)
    .bind(timestamp(user.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_user(conn: &mut SqliteConnection, user_id: &str) -> StoreResult<Option<User>> {
    let row = sqlx::query("SELECT id, email, name, created_at FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| -> StoreResult<User> {
        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            name: row.get("name"),
            created_at: parse_timestamp("users", "created_at", &row.get::<String, _>("created_at"))?,
        })
    })
    .transpose()
}
