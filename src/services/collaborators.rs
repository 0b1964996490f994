//! Collaborator permission checks.

use crate::client::ApiClient;
use crate::errors::RuntimeResult;
use secrecy::SecretString;
use serde::Deserialize;

/// Permission level reported for a collaborator.
#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: Option<String>,
}

/// Service for collaborator operations.
pub struct CollaboratorsService<'a> {
    client: &'a ApiClient,
}

impl<'a> CollaboratorsService<'a> {
    /// Creates a new collaborators service.
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Returns true if `user` has `admin` or `write` permission on the repository.
    ///
    /// Unknown users, missing repositories and unparseable payloads all read as `false`.
    pub async fn can_user_write_to_repo(
        &self,
        token: Option<&SecretString>,
        user: &str,
        repo_slug: &str,
    ) -> RuntimeResult<bool> {
        let response = self
            .client
            .get(token, &format!("repos/{}/collaborators/{}/permission", repo_slug, user))
            .await?;

        if !response.is_success() {
            tracing::debug!(
                user,
                repo_slug,
                status = response.status().as_u16(),
                "Permission lookup refused"
            );
            return Ok(false);
        }

        let permission = response
            .json::<PermissionResponse>()
            .ok()
            .and_then(|body| body.permission);

        Ok(grants_write(permission.as_deref()))
    }
}

fn grants_write(permission: Option<&str>) -> bool {
    matches!(permission, Some("admin") | Some("write"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Some("admin"), true ; "admin")]
    #[test_case(Some("write"), true ; "write")]
    #[test_case(Some("maintain"), false ; "maintain")]
    #[test_case(Some("read"), false ; "read")]
    #[test_case(Some("none"), false ; "none")]
    #[test_case(Some("Admin"), false ; "case sensitive")]
    #[test_case(None, false ; "missing")]
    fn test_grants_write(permission: Option<&str>, expected: bool) {
        assert_eq!(grants_write(permission), expected);
    }
}
