use crate::domain::profile::InvestorProfile;
use anyhow::Context;

/// Fetch a stored profile. `Ok(None)` means the user has not onboarded.
pub async fn get_profile(
    pool: &sqlx::PgPool,
    user_id: &str,
) -> anyhow::Result<Option<InvestorProfile>> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT profile FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .context("select profiles failed")?;

    match row {
        Some((value,)) => {
            let profile = serde_json::from_value::<InvestorProfile>(value)
                .with_context(|| format!("stored profile for {user_id} failed to decode"))?;
            Ok(Some(profile))
        }
        None => Ok(None),
    }
}

/// Insert or replace the profile for its user. The profile document is
/// stored whole; per-field patching happens upstream of the store.
pub async fn upsert_profile(pool: &sqlx::PgPool, profile: &InvestorProfile) -> anyhow::Result<()> {
    let value = serde_json::to_value(profile).context("failed to serialize profile")?;

    sqlx::query(
        "INSERT INTO profiles (user_id, profile, updated_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (user_id) DO UPDATE \
         SET profile = EXCLUDED.profile, updated_at = EXCLUDED.updated_at",
    )
    .bind(&profile.user_id)
    .bind(value)
    .bind(profile.last_updated)
    .execute(pool)
    .await
    .context("upsert profiles failed")?;

    Ok(())
}
