//! Transactional wrapper around one unit of work.

use std::future::Future;
use std::sync::Arc;

use crate::services::{DataSource, ServiceError, Session};

/// How a unit of work treats the transaction around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitOfWork {
    /// Run inside a transaction at all.
    pub enabled: bool,
    /// Roll back when the work fails. When unset, the work done so far is
    /// committed and the failure is still returned.
    pub rollback_on_error: bool,
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self {
            enabled: true,
            rollback_on_error: true,
        }
    }
}

impl UnitOfWork {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn without_rollback() -> Self {
        Self {
            rollback_on_error: false,
            ..Self::default()
        }
    }

    /// Run `work` against a session of `data`.
    ///
    /// When enabled, exactly one transaction is opened; `work` must not open
    /// another. Success commits. Failure rolls back (or commits, see
    /// [`UnitOfWork::rollback_on_error`]) and returns the original error.
    pub async fn execute<T, E, F, Fut>(&self, data: &dyn DataSource, work: F) -> Result<T, E>
    where
        F: FnOnce(Arc<dyn Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ServiceError>,
    {
        if !self.enabled {
            return work(data.session()).await;
        }

        let scope = data.begin().await.map_err(E::from)?;
        tracing::debug!("Unit of work started");

        match work(scope.session()).await {
            Ok(value) => {
                scope.commit().await.map_err(E::from)?;
                tracing::debug!("Unit of work committed");
                Ok(value)
            }
            Err(err) if self.rollback_on_error => {
                match scope.rollback().await {
                    Ok(()) => tracing::debug!("Unit of work rolled back"),
                    Err(rollback_err) => {
                        tracing::error!(error = %rollback_err, "Unit of work rollback failed")
                    }
                }
                Err(err)
            }
            Err(err) => {
                if let Err(commit_err) = scope.commit().await {
                    tracing::error!(error = %commit_err, "Unit of work commit after failure failed");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewIdentity, NewProfile};
    use crate::services::{IdentityStore, MemoryDataSource};

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            phone_number: None,
            profile: NewProfile {
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                email: email.to_string(),
                phone_number: None,
                zip_code: None,
            },
        }
    }

    async fn create_two_then_fail(session: Arc<dyn Session>) -> Result<(), ServiceError> {
        session
            .create_identity(new_identity("one@x.com"), "secret1")
            .await?;
        session
            .create_identity(new_identity("two@x.com"), "secret1")
            .await?;
        Err(ServiceError::NotFound("boom".to_string()))
    }

    #[tokio::test]
    async fn test_success_commits() {
        let data = MemoryDataSource::default();

        let result: Result<(), ServiceError> = UnitOfWork::default()
            .execute(&data, |session| async move {
                session
                    .create_identity(new_identity("one@x.com"), "secret1")
                    .await?;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(data.identity_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_every_write() {
        let data = MemoryDataSource::default();

        let result = UnitOfWork::default()
            .execute(&data, create_two_then_fail)
            .await;

        assert!(matches!(result, Err(ServiceError::NotFound(ref m)) if m == "boom"));
        assert_eq!(data.identity_count().unwrap(), 0);
        assert_eq!(data.profile_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_without_rollback_keeps_partial_work() {
        let data = MemoryDataSource::default();

        let result = UnitOfWork::without_rollback()
            .execute(&data, create_two_then_fail)
            .await;

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
        assert_eq!(data.identity_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_disabled_writes_are_not_undone() {
        let data = MemoryDataSource::default();

        let result = UnitOfWork::disabled()
            .execute(&data, create_two_then_fail)
            .await;

        assert!(result.is_err());
        assert_eq!(data.identity_count().unwrap(), 2);
    }
}
