//! Output URL rewriting for uploaded objects.

use reqwest::Url;
use tracing::warn;

use crate::config::BucketConfig;

/// Rules applied to an uploaded object's location before it is written
/// back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationRewrite {
    /// Replace a leading `http://` with `https://`.
    pub force_https: bool,
    /// Replace the location's origin with this base URL.
    pub base_url: Option<String>,
}

impl LocationRewrite {
    #[must_use]
    pub fn from_bucket(bucket: &BucketConfig) -> Self {
        Self {
            force_https: bucket.result_force_https,
            base_url: bucket.result_base_url.clone(),
        }
    }

    /// Applies https forcing, then origin replacement, to `location`.
    #[must_use]
    pub fn apply(&self, location: &str) -> String {
        let mut out = location.to_string();

        if self.force_https {
            if let Some(rest) = out.strip_prefix("http://") {
                out = format!("https://{rest}");
            }
        }

        if let Some(base) = &self.base_url {
            match Url::parse(&out) {
                Ok(parsed) if !parsed.cannot_be_a_base() => {
                    out = format!("{}{}", base.trim_end_matches('/'), path_and_after(&parsed));
                }
                _ => warn!(location = %out, "location has no origin, base URL not applied"),
            }
        }

        out
    }
}

/// Everything after the origin: path, then `?query` and `#fragment` if set.
fn path_and_after(url: &Url) -> String {
    let mut rest = url.path().to_string();
    if let Some(query) = url.query() {
        rest.push('?');
        rest.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        rest.push('#');
        rest.push_str(fragment);
    }
    rest
}
