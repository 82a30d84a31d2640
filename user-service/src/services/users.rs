use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::user::{PagedResult, ReadUserDto, UpdateUserDto},
    services::{IdentityStore, ProfileStore, ServiceError, Session},
};

pub const MAX_PAGE_SIZE: u32 = 100;

/// CRUD over user profiles.
#[derive(Clone, Default)]
pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        Self
    }

    pub async fn list(&self, session: &dyn Session) -> Result<Vec<ReadUserDto>, ServiceError> {
        let profiles = session.list_profiles().await?;
        Ok(profiles.into_iter().map(ReadUserDto::from).collect())
    }

    pub async fn paged(
        &self,
        session: &dyn Session,
        page_index: u32,
        page_size: u32,
    ) -> Result<PagedResult<ReadUserDto>, ServiceError> {
        let mut errors = Vec::new();
        if page_index < 1 {
            errors.push("Page index must be at least 1".to_string());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            errors.push(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            ));
        }
        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let (profiles, total) = session.page_profiles(page_index, page_size).await?;

        Ok(PagedResult::new(
            profiles.into_iter().map(ReadUserDto::from).collect(),
            total,
            page_index,
            page_size,
        ))
    }

    pub async fn get(&self, session: &dyn Session, id: Uuid) -> Result<ReadUserDto, ServiceError> {
        session
            .find_profile(id)
            .await?
            .map(ReadUserDto::from)
            .ok_or_else(|| user_not_found(id))
    }

    /// Update the profile and keep the owning identity's phone number in step.
    pub async fn update(
        &self,
        session: &dyn Session,
        id: Uuid,
        dto: UpdateUserDto,
    ) -> Result<ReadUserDto, ServiceError> {
        dto.validate()?;

        let mut profile = session
            .find_profile(id)
            .await?
            .ok_or_else(|| user_not_found(id))?;

        profile.first_name = dto.first_name;
        profile.last_name = dto.last_name;
        profile.phone_number = dto.phone_number;
        profile.zip_code = dto.zip_code;

        if !session.update_profile(&profile).await? {
            return Err(user_not_found(id));
        }

        if let Some(mut identity) = session.find_identity_by_id(profile.identity_id).await? {
            identity.phone_number = profile.phone_number.clone();
            identity.updated_at = Utc::now();
            session.update_identity(&identity).await?;
        }

        tracing::info!(user_profile_id = %id, "User profile updated");

        Ok(profile.into())
    }

    /// Delete the profile and its identity. Refresh tokens go with the identity.
    pub async fn delete(&self, session: &dyn Session, id: Uuid) -> Result<(), ServiceError> {
        let profile = session
            .find_profile(id)
            .await?
            .ok_or_else(|| user_not_found(id))?;

        session.delete_profile(profile.id).await?;
        session.delete_identity(profile.identity_id).await?;

        tracing::info!(
            user_profile_id = %id,
            identity_id = %profile.identity_id,
            "User deleted"
        );

        Ok(())
    }
}

fn user_not_found(id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("User {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewIdentity, NewProfile, RefreshToken, UserProfile};
    use crate::services::{DataSource, MemoryDataSource, RefreshTokenStore, UnitOfWork};
    use chrono::Duration;

    async fn seed(data: &MemoryDataSource, count: usize) -> Vec<UserProfile> {
        let session = data.session();
        let mut profiles = Vec::new();
        for i in 0..count {
            let email = format!("user{}@x.com", i);
            let (_, profile) = session
                .create_identity(
                    NewIdentity {
                        email: email.clone(),
                        phone_number: None,
                        profile: NewProfile {
                            first_name: format!("First{}", i),
                            last_name: "Last".to_string(),
                            email,
                            phone_number: None,
                            zip_code: None,
                        },
                    },
                    "secret1",
                )
                .await
                .unwrap();
            profiles.push(profile);
        }
        profiles
    }

    fn update_dto(first_name: &str, phone: Option<&str>) -> UpdateUserDto {
        UpdateUserDto {
            first_name: first_name.to_string(),
            last_name: "Updated".to_string(),
            phone_number: phone.map(str::to_string),
            zip_code: Some("12345".to_string()),
        }
    }

    #[tokio::test]
    async fn test_paged_bounds() {
        let data = MemoryDataSource::default();
        seed(&data, 3).await;
        let session = data.session();
        let users = UserService::new();

        let page = users.paged(session.as_ref(), 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_count, 3);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_previous_page);
        assert!(!page.has_next_page);

        let err = users.paged(session.as_ref(), 0, 101).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref m) if m.len() == 2));
    }

    #[tokio::test]
    async fn test_update_syncs_identity_phone() {
        let data = MemoryDataSource::default();
        let profile = seed(&data, 1).await.remove(0);
        let session = data.session();

        let updated = UserService::new()
            .update(session.as_ref(), profile.id, update_dto("Ada", Some("+1 555 0100")))
            .await
            .unwrap();

        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.email, profile.email);

        let identity = session
            .find_identity_by_id(profile.identity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.phone_number.as_deref(), Some("+1 555 0100"));
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_fields() {
        let data = MemoryDataSource::default();
        let profile = seed(&data, 1).await.remove(0);

        let err = UserService::new()
            .update(data.session().as_ref(), profile.id, update_dto("", Some("abc")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ref m) if m.len() == 2));
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let data = MemoryDataSource::default();
        let session = data.session();
        let users = UserService::new();

        assert!(matches!(
            users.get(session.as_ref(), Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            users.delete(session.as_ref(), Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_identity_and_tokens() {
        let data = MemoryDataSource::default();
        let profile = seed(&data, 1).await.remove(0);
        let session = data.session();
        let (_, token) =
            RefreshToken::issue(profile.identity_id, Duration::days(7), Utc::now()).unwrap();
        session.insert_refresh_token(&token).await.unwrap();

        UserService::new()
            .delete(session.as_ref(), profile.id)
            .await
            .unwrap();

        assert_eq!(data.identity_count().unwrap(), 0);
        assert_eq!(data.profile_count().unwrap(), 0);
        assert!(data.refresh_tokens_for(profile.identity_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_inside_unit_of_work_changes_nothing() {
        let data = MemoryDataSource::default();
        let profile = seed(&data, 1).await.remove(0);
        let users = UserService::new();

        let result: Result<(), ServiceError> = UnitOfWork::default()
            .execute(&data, |session| async move {
                users
                    .update(session.as_ref(), profile.id, update_dto("Changed", None))
                    .await?;
                Err(ServiceError::Internal(anyhow::anyhow!("downstream failure")))
            })
            .await;

        assert!(result.is_err());
        let stored = UserService::new()
            .get(data.session().as_ref(), profile.id)
            .await
            .unwrap();
        assert_eq!(stored.first_name, "First0");
    }
}
