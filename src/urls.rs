use std::path::Path;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Characters escaped in URL path segments. `/` stays literal so slugs keep
/// their hierarchy.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Default public site root for the GitLab handbook corpus.
pub const DEFAULT_BASE_WEB: &str = "https://handbook.gitlab.com/handbook";

/// Default blob-URL root for the GitLab handbook source repository.
pub const DEFAULT_BASE_REPO: &str =
    "https://gitlab.com/gitlab-com/content-sites/handbook/-/blob";

/// Derive the URL slug (and document id) for a repository-relative markdown
/// path.
///
/// Strips the `.md` extension and collapses `index.md` / `_index.md` stems
/// to their parent directory, so both `a/b.md` and `a/b/index.md` map to
/// `a/b`. The root index maps to the empty slug.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use quern::urls::slug;
///
/// assert_eq!(slug(Path::new("engineering/onboarding.md")), "engineering/onboarding");
/// assert_eq!(slug(Path::new("engineering/_index.md")), "engineering");
/// assert_eq!(slug(Path::new("_index.md")), "");
/// ```
pub fn slug(relative_path: &Path) -> String {
    let posix = to_posix(relative_path);
    let stripped = posix.strip_suffix(".md").unwrap_or(&posix);

    match stripped.rsplit_once('/') {
        Some((parent, stem)) if stem == "index" || stem == "_index" => {
            parent.to_string()
        }
        None if stripped == "index" || stripped == "_index" => String::new(),
        _ => stripped.to_string(),
    }
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Maps repository-relative document paths to their public web URL and
/// source-repository blob URL.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    base_web: String,
    base_repo: String,
    commit_sha: String,
}

impl UrlResolver {
    pub fn new(base_web: &str, base_repo: &str, commit_sha: &str) -> Self {
        Self {
            base_web: base_web.trim_end_matches('/').to_string(),
            base_repo: base_repo.trim_end_matches('/').to_string(),
            commit_sha: commit_sha.to_string(),
        }
    }

    /// Public URL of the rendered page. Directory-like pages keep their
    /// trailing slash, matching the published site layout.
    pub fn web_url(&self, relative_path: &Path) -> String {
        let slug = slug(relative_path);
        if slug.is_empty() {
            return format!("{}/", self.base_web);
        }
        let encoded = utf8_percent_encode(&slug, PATH_ESCAPE);
        format!("{}/{}/", self.base_web, encoded)
    }

    /// Blob URL of the markdown source at the pinned commit.
    pub fn repo_url(&self, relative_path: &Path) -> String {
        let posix = to_posix(relative_path);
        let encoded = utf8_percent_encode(&posix, PATH_ESCAPE);
        format!("{}/{}/{}", self.base_repo, self.commit_sha, encoded)
    }
}
