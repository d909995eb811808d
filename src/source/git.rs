use git2::{Cred, CredentialType, Direction, RemoteCallbacks};
use std::path::Path;

use super::auth::SourceCredentials;
use crate::config::GIT_TIMEOUT;
use crate::error::{FleetError, FleetResult};

fn callbacks(creds: &SourceCredentials) -> RemoteCallbacks<'static> {
    let username = creds.username.clone();
    let password = creds.password.clone();
    let ssh_key = creds.ssh_private_key.clone();
    let known_hosts = creds.known_hosts.clone();

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(key) = &ssh_key {
                let user = username_from_url.unwrap_or("git");
                return Cred::ssh_key_from_memory(user, None, key, None);
            }
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let (Some(user), Some(pass)) = (&username, &password) {
                return Cred::userpass_plaintext(user, pass);
            }
        }
        Cred::default()
    });
    callbacks.certificate_check(move |_cert, host| {
        match &known_hosts {
            // Without known_hosts data, fall back to libgit2's own checks.
            None => Ok(git2::CertificateCheckStatus::CertificatePassthrough),
            Some(known) if super::auth::known_hosts_contains(known, host) => {
                Ok(git2::CertificateCheckStatus::CertificatePassthrough)
            }
            Some(_) => Err(git2::Error::from_str(&format!(
                "host {host} not present in known_hosts"
            ))),
        }
    });
    callbacks
}

fn is_auth_error(err: &git2::Error) -> bool {
    matches!(
        err.class(),
        git2::ErrorClass::Http | git2::ErrorClass::Ssh
    ) && matches!(err.code(), git2::ErrorCode::Auth)
        || err.message().contains("authentication")
        || err.message().contains("401")
        || err.message().contains("403")
}

/// Resolve a branch (or tag) to its current HEAD commit with a read-only
/// ls-remote; no objects are transferred. A 40-hex `reference` is already a
/// commit and passes through.
pub fn ls_remote(url: &str, reference: &str, creds: &SourceCredentials) -> FleetResult<String> {
    if reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(reference.to_string());
    }

    let mut remote = git2::Remote::create_detached(url)?;
    let connection = remote
        .connect_auth(Direction::Fetch, Some(callbacks(creds)), None)
        .map_err(|e| {
            if is_auth_error(&e) {
                FleetError::Auth(url.to_string())
            } else {
                e.into()
            }
        })?;

    let wanted = [
        format!("refs/heads/{reference}"),
        format!("refs/tags/{reference}"),
        reference.to_string(),
    ];

    for head in connection.list()? {
        if wanted.iter().any(|w| w == head.name()) {
            return Ok(head.oid().to_string());
        }
    }

    Err(FleetError::NotFound(format!(
        "ref {reference:?} not found in {url}"
    )))
}

/// Clone the repository and check out the given commit into `dest`,
/// materialising the working tree the bundle reader walks.
pub fn checkout(
    url: &str,
    commit: &str,
    creds: &SourceCredentials,
    dest: &Path,
) -> FleetResult<()> {
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.remote_callbacks(callbacks(creds));
    fetch_options.download_tags(git2::AutotagOption::None);

    let repo = git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(url, dest)
        .map_err(|e| {
            if is_auth_error(&e) {
                FleetError::Auth(url.to_string())
            } else {
                FleetError::Git(e)
            }
        })?;

    let oid = git2::Oid::from_str(commit)?;
    repo.set_head_detached(oid)?;
    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;

    Ok(())
}

/// Async wrapper: ls-remote on the blocking pool, bounded by the git
/// timeout.
pub async fn resolve_branch_head(
    url: String,
    reference: String,
    creds: SourceCredentials,
) -> FleetResult<String> {
    let handle =
        tokio::task::spawn_blocking(move || ls_remote(&url, &reference, &creds));

    match tokio::time::timeout(GIT_TIMEOUT, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(FleetError::Internal(format!(
            "git poll task failed: {join_err}"
        ))),
        Err(_) => Err(FleetError::Internal(format!(
            "git poll timed out after {}s",
            GIT_TIMEOUT.as_secs()
        ))),
    }
}

/// Async wrapper: clone + checkout on the blocking pool, bounded by the git
/// timeout.
pub async fn materialize(
    url: String,
    commit: String,
    creds: SourceCredentials,
    dest: std::path::PathBuf,
) -> FleetResult<()> {
    let handle =
        tokio::task::spawn_blocking(move || checkout(&url, &commit, &creds, &dest));

    match tokio::time::timeout(GIT_TIMEOUT, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(FleetError::Internal(format!(
            "git checkout task failed: {join_err}"
        ))),
        Err(_) => Err(FleetError::Internal(format!(
            "git checkout timed out after {}s",
            GIT_TIMEOUT.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_shas_skip_the_network() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let resolved =
            ls_remote("https://invalid.example", sha, &SourceCredentials::default())
                .expect("passthrough");
        assert_eq!(resolved, sha);
    }

    #[test]
    fn short_refs_are_not_mistaken_for_shas() {
        // A 7-char abbreviation must go through ls-remote, which fails here
        // because the remote does not exist.
        let result = ls_remote(
            "file:///nonexistent-fleet-test-repo",
            "0123abc",
            &SourceCredentials::default(),
        );
        assert!(result.is_err());
    }
}
