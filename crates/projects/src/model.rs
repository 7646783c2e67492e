use chrono::{DateTime, Utc};
use mixgate_common::ProjectId;
use mixgate_rate_limit::ProjectDescriptor;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A tenant project: its API key, analytics credential and billing tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Slug of the owning organization.
    pub org: String,
    pub name: String,
    pub slug: String,
    pub api_key: String,
    /// Credential used when forwarding events upstream.
    pub analytics_token: Option<String>,
    /// Upstream region hint, e.g. `"eu"`.
    pub data_center: Option<String>,
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn descriptor(&self) -> ProjectDescriptor {
        ProjectDescriptor {
            id: self.id,
            is_premium: self.is_premium,
        }
    }

    /// Whether events can be forwarded for this project at all.
    pub fn has_analytics_token(&self) -> bool {
        self.analytics_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

/// Fields supplied when registering a project.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub analytics_token: Option<String>,
    #[serde(default)]
    pub data_center: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub analytics_token: Option<String>,
    #[serde(default)]
    pub data_center: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}

/// A new 32-character API key.
pub fn generate_api_key() -> String {
    random_hex(16)
}

/// A new 8-character project slug.
pub fn generate_slug() -> String {
    random_hex(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(token: Option<&str>) -> Project {
        Project {
            id: ProjectId::new(),
            org: "acme".into(),
            name: "web".into(),
            slug: generate_slug(),
            api_key: generate_api_key(),
            analytics_token: token.map(str::to_string),
            data_center: None,
            is_premium: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generated_identifiers_have_expected_shape() {
        let key = generate_api_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(generate_slug().len(), 8);
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[test]
    fn blank_token_counts_as_missing() {
        assert!(project(Some("tok")).has_analytics_token());
        assert!(!project(Some("  ")).has_analytics_token());
        assert!(!project(None).has_analytics_token());
    }

    #[test]
    fn descriptor_carries_premium_flag() {
        let mut p = project(None);
        p.is_premium = true;
        let d = p.descriptor();
        assert_eq!(d.id, p.id);
        assert!(d.is_premium);
    }
}
