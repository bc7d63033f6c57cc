//! Authorization decisions for private and public access.
//!
//! Private calls run three checks in order: role, destination membership,
//! bucket allow-list. Public calls are limited to read operations on
//! destinations that opted in.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::Registry;
use crate::{
    errors::{GatewayError, GatewayResult},
    models::{destination::Destination, user::Role},
};

/// Authenticated caller, as carried by a verified token.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    ListBuckets,
    ListObjects,
    Download,
    CountFolder,
    Upload,
    DeleteObject,
    DeleteFolder,
    RenameFolder,
    RenameObject,
    ReadMetadata,
    WriteMetadata,
    CreateBucket,
    RenameBucket,
}

impl Operation {
    pub fn required_role(self) -> Role {
        match self {
            Operation::CreateBucket | Operation::RenameBucket => Role::Admin,
            _ => Role::Editor,
        }
    }

    /// Operations reachable without a token.
    pub fn is_public_read(self) -> bool {
        matches!(
            self,
            Operation::ListBuckets | Operation::ListObjects | Operation::Download
        )
    }
}

/// Who is asking and for which destination.
#[derive(Clone, Copy, Debug)]
pub enum Access<'a> {
    Private {
        identity: Option<&'a Identity>,
        destination_id: Uuid,
    },
    Public {
        slug: &'a str,
    },
}

impl<'a> Access<'a> {
    pub fn private(identity: &'a Identity, destination_id: Uuid) -> Self {
        Access::Private {
            identity: Some(identity),
            destination_id,
        }
    }

    pub fn public(slug: &'a str) -> Self {
        Access::Public { slug }
    }
}

pub fn check_role(identity: Option<&Identity>, required: Role) -> GatewayResult<&Identity> {
    let identity = identity.ok_or_else(|| GatewayError::auth("Unauthorized"))?;
    if !identity.role.satisfies(required) {
        return Err(GatewayError::forbidden("Forbidden"));
    }
    Ok(identity)
}

/// Admins reach every destination; everyone else must be listed.
pub fn check_membership(identity: &Identity, destination: &Destination) -> GatewayResult<()> {
    if identity.role.is_admin() || destination.allowed_user_ids.contains(&identity.user_id) {
        Ok(())
    } else {
        Err(GatewayError::forbidden("Access denied to this destination"))
    }
}

/// Applies to admins as well.
pub fn check_bucket(destination: &Destination, bucket: &str) -> GatewayResult<()> {
    if destination.is_bucket_allowed(bucket) {
        Ok(())
    } else {
        Err(GatewayError::forbidden(
            "Access to this bucket is not allowed",
        ))
    }
}

pub fn check_public(destination: &Destination) -> GatewayResult<()> {
    if destination.allow_public_access {
        Ok(())
    } else {
        Err(GatewayError::forbidden(
            "Public access is not allowed for this destination",
        ))
    }
}

#[derive(Clone)]
pub struct Guard {
    registry: Registry,
}

impl Guard {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Resolve the destination `access` names and check that `operation`
    /// (on `bucket`, when it targets one) is permitted.
    pub async fn authorize(
        &self,
        access: Access<'_>,
        bucket: Option<&str>,
        operation: Operation,
    ) -> GatewayResult<Destination> {
        let destination = match access {
            Access::Private {
                identity,
                destination_id,
            } => {
                let identity = check_role(identity, operation.required_role())?;
                let destination = self.registry.get_destination(destination_id).await?;
                check_membership(identity, &destination)?;
                destination
            }
            Access::Public { slug } => {
                if !operation.is_public_read() {
                    return Err(GatewayError::forbidden(
                        "Operation is not available publicly",
                    ));
                }
                let destination = self.registry.get_destination_by_slug(slug).await?;
                check_public(&destination)?;
                destination
            }
        };
        if let Some(bucket) = bucket {
            check_bucket(&destination, bucket)?;
        }
        Ok(destination)
    }

    /// Settle the public-access checks before any request validation, so a
    /// private destination answers every anonymous call the same way.
    /// Private access passes through untouched.
    pub async fn screen_public(&self, access: Access<'_>, operation: Operation) -> GatewayResult<()> {
        if let Access::Public { .. } = access {
            self.authorize(access, None, operation).await?;
        }
        Ok(())
    }

    /// Destinations the identity may open: all for admins, listed ones
    /// otherwise.
    pub async fn available_destinations(
        &self,
        identity: &Identity,
    ) -> GatewayResult<Vec<Destination>> {
        let all = self.registry.list_destinations().await?;
        Ok(all
            .into_iter()
            .filter(|d| check_membership(identity, d).is_ok())
            .collect())
    }

    /// Public view of a destination; hidden unless public access is on.
    pub async fn public_destination(&self, slug: &str) -> GatewayResult<Destination> {
        let destination = self.registry.get_destination_by_slug(slug).await?;
        check_public(&destination)?;
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::destination::DestinationPatch,
        services::registry::tests::{memory_registry, new_destination},
    };

    fn identity(role: Role) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: format!("{role:?}").to_lowercase(),
            role,
        }
    }

    async fn setup(patch: DestinationPatch) -> (Guard, Destination) {
        let registry = memory_registry().await;
        let created = registry
            .create_destination(new_destination("tenant"))
            .await
            .unwrap();
        let (_, destination) = registry.update_destination(created.id, patch).await.unwrap();
        (Guard::new(registry), destination)
    }

    const ALL_OPERATIONS: [Operation; 13] = [
        Operation::ListBuckets,
        Operation::ListObjects,
        Operation::Download,
        Operation::CountFolder,
        Operation::Upload,
        Operation::DeleteObject,
        Operation::DeleteFolder,
        Operation::RenameFolder,
        Operation::RenameObject,
        Operation::ReadMetadata,
        Operation::WriteMetadata,
        Operation::CreateBucket,
        Operation::RenameBucket,
    ];

    #[tokio::test]
    async fn missing_identity_is_auth_error() {
        let (guard, destination) = setup(DestinationPatch::default()).await;
        let access = Access::Private {
            identity: None,
            destination_id: destination.id,
        };
        assert!(matches!(
            guard.authorize(access, None, Operation::ListBuckets).await,
            Err(GatewayError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn unlisted_editor_is_forbidden_everywhere() {
        let (guard, destination) = setup(DestinationPatch::default()).await;
        let editor = identity(Role::Editor);
        for op in ALL_OPERATIONS {
            let result = guard
                .authorize(Access::private(&editor, destination.id), Some("docs"), op)
                .await;
            assert!(matches!(result, Err(GatewayError::Forbidden(_))), "{op:?}");
        }
    }

    #[tokio::test]
    async fn listed_editor_reaches_editor_operations_only() {
        let editor = identity(Role::Editor);
        let (guard, destination) = setup(DestinationPatch {
            allowed_user_ids: Some(vec![editor.user_id]),
            ..Default::default()
        })
        .await;
        let access = Access::private(&editor, destination.id);
        assert!(guard
            .authorize(access, Some("any"), Operation::DeleteFolder)
            .await
            .is_ok());
        assert!(matches!(
            guard.authorize(access, None, Operation::CreateBucket).await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn bucket_allow_list_binds_admins_too() {
        let (guard, destination) = setup(DestinationPatch {
            bucket_names: Some(vec!["docs".into()]),
            ..Default::default()
        })
        .await;
        let admin = identity(Role::Admin);
        let access = Access::private(&admin, destination.id);
        assert!(guard
            .authorize(access, Some("docs"), Operation::ListObjects)
            .await
            .is_ok());
        assert!(matches!(
            guard
                .authorize(access, Some("other"), Operation::ListObjects)
                .await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn unknown_destination_is_not_found() {
        let (guard, _) = setup(DestinationPatch::default()).await;
        let admin = identity(Role::Admin);
        assert!(matches!(
            guard
                .authorize(
                    Access::private(&admin, Uuid::new_v4()),
                    None,
                    Operation::ListBuckets
                )
                .await,
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            guard
                .authorize(Access::public("missing"), None, Operation::ListBuckets)
                .await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn public_access_requires_opt_in() {
        let (guard, _) = setup(DestinationPatch::default()).await;
        for op in [
            Operation::ListBuckets,
            Operation::ListObjects,
            Operation::Download,
        ] {
            assert!(matches!(
                guard.authorize(Access::public("tenant"), None, op).await,
                Err(GatewayError::Forbidden(_))
            ));
        }
        assert!(matches!(
            guard.public_destination("tenant").await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn public_access_is_read_only() {
        let (guard, _) = setup(DestinationPatch {
            allow_public_access: Some(true),
            bucket_names: Some(vec!["docs".into()]),
            ..Default::default()
        })
        .await;
        for op in ALL_OPERATIONS {
            let result = guard
                .authorize(Access::public("tenant"), Some("docs"), op)
                .await;
            if op.is_public_read() {
                assert!(result.is_ok(), "{op:?}");
            } else {
                assert!(matches!(result, Err(GatewayError::Forbidden(_))), "{op:?}");
            }
        }
        assert!(matches!(
            guard
                .authorize(Access::public("tenant"), Some("secret"), Operation::Download)
                .await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn screening_only_touches_public_access() {
        let (guard, _) = setup(DestinationPatch::default()).await;
        let admin = identity(Role::Admin);
        assert!(guard
            .screen_public(
                Access::private(&admin, Uuid::new_v4()),
                Operation::ListObjects
            )
            .await
            .is_ok());
        assert!(matches!(
            guard
                .screen_public(Access::public("tenant"), Operation::Download)
                .await,
            Err(GatewayError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn available_destinations_filter_by_membership() {
        let editor = identity(Role::Editor);
        let (guard, _) = setup(DestinationPatch::default()).await;
        assert!(guard.available_destinations(&editor).await.unwrap().is_empty());
        let admin = identity(Role::Admin);
        assert_eq!(guard.available_destinations(&admin).await.unwrap().len(), 1);
    }
}
