use std::{
    fmt::{Display, Formatter},
    sync::LazyLock,
};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::{empty_as_none, ParseError};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<name>[^/\\:]+?)(?:\.git|\.bundle)?[/\\]*$").unwrap());

/// The (url, branch, commit) triple that names one version of a repository.
///
/// `None` means "unspecified": it is never a concrete value and acts as a
/// wildcard in a query passed to [`RepositoryIdentity::satisfies`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryIdentity {
    pub url: String,
    #[serde(with = "empty_as_none", default)]
    pub branch: Option<String>,
    #[serde(with = "empty_as_none", default)]
    pub commit: Option<String>,
}

impl RepositoryIdentity {
    pub fn new(url: impl Into<String>, branch: Option<String>, commit: Option<String>) -> Self {
        RepositoryIdentity {
            url: url.into(),
            branch: branch.filter(|b| !b.is_empty()),
            commit: commit.filter(|c| !c.is_empty()),
        }
    }

    /// Repository name derived from the url basename.
    pub fn name(&self) -> Result<String, ParseError> {
        module_name(&self.url)
    }

    /// Whether this stored version can serve a request for `query`.
    ///
    /// One-sided: only the query's unspecified fields are wildcards, so an
    /// unpinned clone never stands in for a pinned branch or commit.
    pub fn satisfies(&self, query: &RepositoryIdentity) -> bool {
        fn part_satisfies(stored: &Option<String>, wanted: &Option<String>) -> bool {
            wanted.is_none() || stored == wanted
        }

        self.url == query.url
            && part_satisfies(&self.branch, &query.branch)
            && part_satisfies(&self.commit, &query.commit)
    }

    /// Name of the cache slot holding this exact version.
    ///
    /// The bare repository name is used when neither branch nor commit is
    /// pinned, otherwise `name@branch@commit` with empty fields kept, so two
    /// pinned versions of one url never share a slot.
    pub fn cache_key(&self) -> Result<String, ParseError> {
        let name = self.name()?;
        if self.branch.is_none() && self.commit.is_none() {
            return Ok(name);
        }
        let branch = self.branch.as_deref().unwrap_or("").replace(['/', '\\'], "+");
        let commit = self.commit.as_deref().unwrap_or("");
        Ok(format!("{name}@{branch}@{commit}"))
    }
}

impl Display for RepositoryIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)?;
        if let Some(branch) = &self.branch {
            write!(f, " (branch {branch})")?;
        }
        if let Some(commit) = &self.commit {
            write!(f, " (commit {commit})")?;
        }
        Ok(())
    }
}

/// Last path component of a git url with any `.git` suffix stripped.
///
/// Handles `https://host/org/repo.git`, scp-like `git@host:org/repo.git`,
/// trailing slashes and plain filesystem paths.
pub fn module_name(url: &str) -> Result<String, ParseError> {
    NAME_PATTERN
        .captures(url.trim())
        .and_then(|c| c.name("name"))
        .map(|m| m.as_str().to_string())
        .filter(|name| name != "." && name != "..")
        .ok_or_else(|| ParseError::InvalidUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn identity(branch: Option<&str>, commit: Option<&str>) -> RepositoryIdentity {
        RepositoryIdentity::new(
            "https://example.com/org/foo.git",
            branch.map(str::to_owned),
            commit.map(str::to_owned),
        )
    }

    #[test]
    fn derive_name_from_urls() {
        assert_eq!(module_name("https://example.com/foo.git").unwrap(), "foo");
        assert_eq!(module_name("https://github.com/org/foo").unwrap(), "foo");
        assert_eq!(module_name("https://github.com/org/foo/").unwrap(), "foo");
        assert_eq!(module_name("git@github.com:org/bar.git").unwrap(), "bar");
        assert_eq!(module_name("ssh://git@host:22/org/baz.git").unwrap(), "baz");
        assert_eq!(module_name("/srv/git/local-repo").unwrap(), "local-repo");
        assert_eq!(module_name("file:///srv/git/archive.bundle").unwrap(), "archive");
        assert_eq!(module_name("dots.in.name.git").unwrap(), "dots.in.name");
    }

    #[test]
    fn reject_urls_without_name() {
        assert!(module_name("").is_err());
        assert!(module_name("///").is_err());
        assert!(module_name("https://example.com/..").is_err());
    }

    #[test]
    fn empty_strings_are_unspecified() {
        let id = RepositoryIdentity::new("u", Some(String::new()), Some(String::new()));
        assert_eq!(id.branch, None);
        assert_eq!(id.commit, None);
    }

    #[test]
    fn stored_version_satisfies_only_what_it_pins() {
        let bare = identity(None, None);
        let main = identity(Some("main"), None);
        let main_pinned = identity(Some("main"), Some("abc123"));

        assert!(main_pinned.satisfies(&bare));
        assert!(main_pinned.satisfies(&main));
        assert!(main_pinned.satisfies(&main_pinned));
        assert!(!bare.satisfies(&main));
        assert!(!bare.satisfies(&identity(None, Some("abc123"))));
        assert!(!main.satisfies(&main_pinned));
        assert!(!main_pinned.satisfies(&identity(Some("dev"), None)));

        let other_url = RepositoryIdentity::new("https://example.com/org/bar.git", None, None);
        assert!(!main_pinned.satisfies(&other_url));
    }

    #[test]
    fn cache_key_separates_pinned_versions() {
        assert_eq!(identity(None, None).cache_key().unwrap(), "foo");
        assert_eq!(
            identity(Some("release/1.x"), None).cache_key().unwrap(),
            "foo@release+1.x@"
        );
        assert_eq!(
            identity(None, Some("abc123")).cache_key().unwrap(),
            "foo@@abc123"
        );
        assert_ne!(
            identity(Some("main"), Some("abc")).cache_key().unwrap(),
            identity(Some("main"), Some("def")).cache_key().unwrap()
        );
    }

    #[test]
    fn serialize_unspecified_as_empty_string() {
        let json = serde_json::to_value(identity(Some("main"), None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "url": "https://example.com/org/foo.git",
                "branch": "main",
                "commit": ""
            })
        );
        let back: RepositoryIdentity = serde_json::from_value(json).unwrap();
        assert_eq!(back, identity(Some("main"), None));
    }
}
