use std::path::Path;

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    cert::Cert,
    AutotagOption, CertificateCheckStatus, Config, Cred, CredentialType, FetchOptions,
    RemoteCallbacks, Repository,
};
use log::{debug, trace, warn};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};

use super::{FetchError, GitClient};

const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";

/// [`GitClient`] backed by libgit2. Arguments never pass through a shell.
pub struct LibGit {
    git_config: Config,
}

impl LibGit {
    pub fn new(git_config: Config) -> LibGit {
        LibGit { git_config }
    }

    /// Uses the user's global and system git configuration for credentials.
    pub fn open_default() -> Result<LibGit, git2::Error> {
        Ok(LibGit::new(Config::open_default()?))
    }

    fn fetch_options(&self, shallow: bool) -> FetchOptions<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username, allowed| self.credentials(url, username, allowed));
        callbacks.certificate_check(move |certificate, host| self.check_certificate(certificate, host));

        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(callbacks)
            .download_tags(AutotagOption::None);
        if shallow {
            fetch_options.depth(1);
        }

        fetch_options
    }

    /// Usernames default to `git`, ssh keys come from the agent and
    /// passwords from the configured git credential helper.
    fn credentials(
        &self,
        url: &str,
        username: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        trace!("{} asks for credentials of type {:?}", url, allowed);
        if allowed.contains(CredentialType::USERNAME) {
            Cred::username("git")
        } else if allowed.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            Cred::credential_helper(&self.git_config, url, username)
        } else {
            Err(git2::Error::from_str(&format!(
                "no supported credentials for {url}"
            )))
        }
    }

    /// Accepts an ssh host key listed in the system known_hosts file and
    /// leaves every other certificate to libgit2.
    fn check_certificate(
        &self,
        certificate: &Cert<'_>,
        host: &str,
    ) -> Result<CertificateCheckStatus, git2::Error> {
        let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) else {
            return Ok(CertificateCheckStatus::CertificatePassthrough);
        };
        let known = match KnownHosts::read_file(GLOBAL_KNOWN_HOSTS) {
            Ok(entries) => entries.iter().any(|entry| {
                host_matches_patterns(host, entry.host_patterns())
                    && entry.public_key().to_bytes().as_deref() == Ok(hostkey)
            }),
            Err(error) => {
                trace!("Skipping {} for {}: {}", GLOBAL_KNOWN_HOSTS, host, error);
                false
            }
        };
        if known {
            debug!("Host key of {} is listed in {}", host, GLOBAL_KNOWN_HOSTS);
            Ok(CertificateCheckStatus::CertificateOk)
        } else {
            trace!("Host key of {} is not pinned, deferring to libgit2", host);
            Ok(CertificateCheckStatus::CertificatePassthrough)
        }
    }

    fn fetch_commit(
        &self,
        repo: &Repository,
        shallow: bool,
        commit: &str,
    ) -> Result<(), git2::Error> {
        let mut remote = repo.find_remote("origin")?;
        if let Err(error) = remote.fetch(&[commit], Some(&mut self.fetch_options(shallow)), None) {
            warn!(
                "Failed to fetch a single commit {}, falling back to a full fetch: {}",
                commit, error
            );
            let refspecs: Vec<String> = remote
                .refspecs()
                .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
                .collect();
            remote.fetch(&refspecs, Some(&mut self.fetch_options(false)), None)?;
        }
        Ok(())
    }
}

impl GitClient for LibGit {
    fn clone_repository(
        &self,
        url: &str,
        branch: Option<&str>,
        destination: &Path,
    ) -> Result<(), FetchError> {
        let shallow = !is_local(url);
        debug!(
            "Cloning {} (branch {:?}, shallow {}) into {}",
            url,
            branch,
            shallow,
            destination.display()
        );

        let mut builder = RepoBuilder::new();
        builder.fetch_options(self.fetch_options(shallow));
        if let Some(branch) = branch {
            builder.branch(branch);
        }
        builder
            .clone(url, destination)
            .map_err(|source| FetchError::Git {
                location: url.to_string(),
                source,
            })?;
        Ok(())
    }

    fn checkout(&self, repository: &Path, commit: &str) -> Result<(), FetchError> {
        let git_error = |source: git2::Error| FetchError::Git {
            location: repository.display().to_string(),
            source,
        };
        let repo = Repository::open(repository).map_err(git_error)?;

        let object = match repo.revparse_single(commit) {
            Ok(object) => object,
            Err(_) => {
                debug!("Commit {} is not in the clone, fetching it", commit);
                let shallow = repo
                    .find_remote("origin")
                    .ok()
                    .and_then(|remote| remote.url().map(|url| !is_local(url)))
                    .unwrap_or(true);
                self.fetch_commit(&repo, shallow, commit)
                    .map_err(git_error)?;
                repo.revparse_single(commit)
                    .map_err(|_| FetchError::CommitNotFound {
                        location: repository.display().to_string(),
                        commit: commit.to_string(),
                    })?
            }
        };

        let target = object.peel_to_commit().map_err(git_error)?;
        repo.checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))
            .map_err(git_error)?;
        repo.set_head_detached(target.id()).map_err(git_error)?;
        debug!("Checked out {} in {}", target.id(), repository.display());
        Ok(())
    }
}

/// Local sources are cloned in full; shallow fetches need a network transport.
/// Only `file://` urls and absolute paths count as local.
fn is_local(url: &str) -> bool {
    url.starts_with("file://") || Path::new(url).is_absolute()
}

/// Exact, case-insensitive host names with `!` negation. Wildcards and
/// hashed entries never match.
fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    let HostPatterns::Patterns(patterns) = patterns else {
        return false;
    };
    let host = host.to_lowercase();
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
    let excluded = patterns
        .iter()
        .filter_map(|p| p.strip_prefix('!'))
        .any(|p| p == host);
    !excluded && patterns.iter().any(|p| *p == host)
}

#[cfg(test)]
mod tests {
    use git2::{Commit, Oid, Signature};

    use super::*;

    use pretty_assertions::assert_eq;

    fn commit_file(repo: &Repository, name: &str, contents: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), contents).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let signature = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &signature, &signature, "commit", &tree, &parents)
            .unwrap()
    }

    fn client() -> LibGit {
        LibGit::new(Config::new().unwrap())
    }

    #[test]
    fn clone_local_repository() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("source");
        let repo = Repository::init(&source).unwrap();
        commit_file(&repo, "README.md", "one");
        commit_file(&repo, "README.md", "two");

        let destination = temp.path().join("clone");
        client()
            .clone_repository(source.to_str().unwrap(), None, &destination)
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(destination.join("README.md")).unwrap(),
            "two"
        );
    }

    #[test]
    fn clone_branch_and_checkout_commit() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("source");
        let repo = Repository::init(&source).unwrap();
        let first = commit_file(&repo, "README.md", "one");
        commit_file(&repo, "README.md", "two");
        repo.branch("feature", &repo.find_commit(first).unwrap(), false)
            .unwrap();

        let on_branch = temp.path().join("on-branch");
        client()
            .clone_repository(source.to_str().unwrap(), Some("feature"), &on_branch)
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(on_branch.join("README.md")).unwrap(),
            "one"
        );

        let pinned = temp.path().join("pinned");
        client()
            .clone_repository(source.to_str().unwrap(), None, &pinned)
            .unwrap();
        client().checkout(&pinned, &first.to_string()).unwrap();
        assert_eq!(
            std::fs::read_to_string(pinned.join("README.md")).unwrap(),
            "one"
        );
        let pinned_repo = Repository::open(&pinned).unwrap();
        let head = pinned_repo.head().unwrap();
        assert_eq!(head.target(), Some(first));
        assert!(pinned_repo.head_detached().unwrap());
    }

    #[test]
    fn clone_missing_source_fails() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("does-not-exist");
        let result = client().clone_repository(
            missing.to_str().unwrap(),
            None,
            &temp.path().join("clone"),
        );
        assert!(matches!(result, Err(FetchError::Git { .. })));
    }

    #[test]
    fn local_sources_are_not_shallow() {
        let temp = tempfile::tempdir().unwrap();
        assert!(is_local(temp.path().to_str().unwrap()));
        assert!(is_local("file:///srv/git/foo.git"));
        assert!(!is_local("https://example.com/foo.git"));
        assert!(!is_local("src"));
        assert!(!is_local("git@github.com:org/foo.git"));
    }

    #[test]
    fn known_hosts_patterns() {
        let patterns = HostPatterns::Patterns(vec![
            "github.com".to_string(),
            "!evil.example.com".to_string(),
        ]);
        assert!(host_matches_patterns("github.com", &patterns));
        assert!(host_matches_patterns("GitHub.com", &patterns));
        assert!(!host_matches_patterns("gitlab.com", &patterns));
        assert!(!host_matches_patterns("evil.example.com", &patterns));
    }
}
