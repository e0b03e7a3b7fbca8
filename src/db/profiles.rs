//! Intake profile rows. One live row per user; the boolean flags are only
//! ever written through the closed [`QuestionKey`] mapping.

use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{FieldValue, QuestionKey, Relationship, UserProfile};

use super::{Store, parse_column_opt};

fn map_profile(row: &Row) -> Result<UserProfile, StoreError> {
    let relationship: Option<Relationship> =
        parse_column_opt("user_profiles", "relationship", row.get("relationship"))?;
    Ok(UserProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        relationship,
        prefecture: row.get("prefecture"),
        municipality: row.get("municipality"),
        death_date: row.get("death_date"),
        has_pension: row.get("has_pension"),
        has_care_insurance: row.get("has_care_insurance"),
        has_real_estate: row.get("has_real_estate"),
        has_vehicle: row.get("has_vehicle"),
        has_life_insurance: row.get("has_life_insurance"),
        is_self_employed: row.get("is_self_employed"),
        is_dependent_family: row.get("is_dependent_family"),
        has_children: row.get("has_children"),
        updated_at: row.get("updated_at"),
    })
}

const PROFILE_COLUMNS: &str = "id, user_id, relationship, prefecture, municipality, death_date, \
     has_pension, has_care_insurance, has_real_estate, has_vehicle, has_life_insurance, \
     is_self_employed, is_dependent_family, has_children, updated_at";

impl Store {
    /// Fetch the profile, creating an empty row on first touch.
    pub async fn ensure_profile(&self, user_id: Uuid) -> Result<UserProfile, StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO user_profiles (id, user_id) VALUES ($1, $2)
             ON CONFLICT (user_id) DO NOTHING",
            &[&Uuid::new_v4(), &user_id],
        )
        .await?;
        let row = conn
            .query_one(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1"),
                &[&user_id],
            )
            .await?;
        map_profile(&row)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = $1"),
                &[&user_id],
            )
            .await?;
        row.as_ref().map(map_profile).transpose()
    }

    /// Persist one parsed intake answer. Re-delivery of the same answer is a
    /// plain overwrite with the same value, so this is idempotent.
    pub async fn set_profile_field(
        &self,
        user_id: Uuid,
        value: &FieldValue,
    ) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let updated = match value {
            FieldValue::Relationship { value } => {
                conn.execute(
                    "UPDATE user_profiles SET relationship = $2, updated_at = now()
                     WHERE user_id = $1",
                    &[&user_id, &value.as_str()],
                )
                .await?
            }
            FieldValue::Prefecture { value } => {
                conn.execute(
                    "UPDATE user_profiles SET prefecture = $2, updated_at = now()
                     WHERE user_id = $1",
                    &[&user_id, value],
                )
                .await?
            }
            FieldValue::Municipality { value } => {
                conn.execute(
                    "UPDATE user_profiles SET municipality = $2, updated_at = now()
                     WHERE user_id = $1",
                    &[&user_id, value],
                )
                .await?
            }
            FieldValue::DeathDate { value } => {
                conn.execute(
                    "UPDATE user_profiles SET death_date = $2, updated_at = now()
                     WHERE user_id = $1",
                    &[&user_id, value],
                )
                .await?
            }
        };
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "user_profile",
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Set one boolean profile flag. The column is selected by a match over
    /// the closed key enum, so caller input never reaches the SQL text.
    pub async fn set_profile_flag(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        value: bool,
    ) -> Result<(), StoreError> {
        let statement = match key {
            QuestionKey::HasPension => {
                "UPDATE user_profiles SET has_pension = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::HasCareInsurance => {
                "UPDATE user_profiles SET has_care_insurance = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::HasRealEstate => {
                "UPDATE user_profiles SET has_real_estate = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::HasVehicle => {
                "UPDATE user_profiles SET has_vehicle = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::HasLifeInsurance => {
                "UPDATE user_profiles SET has_life_insurance = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::IsSelfEmployed => {
                "UPDATE user_profiles SET is_self_employed = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::IsDependentFamily => {
                "UPDATE user_profiles SET is_dependent_family = $2, updated_at = now() WHERE user_id = $1"
            }
            QuestionKey::HasChildren => {
                "UPDATE user_profiles SET has_children = $2, updated_at = now() WHERE user_id = $1"
            }
        };
        let conn = self.conn().await?;
        let updated = conn.execute(statement, &[&user_id, &value]).await?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "user_profile",
                id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Owner lookup for profile-level ownership checks.
    pub async fn profile_owner(&self, profile_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id FROM user_profiles WHERE id = $1",
                &[&profile_id],
            )
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }
}
