use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use mixgate_common::ProjectId;
use mixgate_rate_limit::{CounterStore, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::model::{generate_api_key, generate_slug, NewProject, Project, ProjectUpdate};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("project name must not be empty")]
    InvalidName,

    #[error("project '{name}' already exists in organization '{org}'")]
    NameTaken { org: String, name: String },

    #[error("project '{slug}' does not exist in organization '{org}'")]
    NotFound { org: String, slug: String },

    #[error("counter provisioning failed: {0}")]
    Counter(#[from] StoreError),
}

/// Resolves inbound credentials to projects.
#[async_trait]
pub trait ProjectLookup: Send + Sync {
    async fn find_by_api_key(&self, api_key: &str) -> Option<Project>;
}

/// In-process project directory.
///
/// Owns project records and keeps the counter store in step with them: a
/// counter is provisioned when a project is created and removed when the
/// project is deleted.
pub struct ProjectRegistry {
    projects: DashMap<ProjectId, Project>,
    by_api_key: DashMap<String, ProjectId>,
    counters: Arc<dyn CounterStore>,
    // Serializes create/rename so name uniqueness checks cannot race.
    write_lock: Mutex<()>,
}

impl ProjectRegistry {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self {
            projects: DashMap::new(),
            by_api_key: DashMap::new(),
            counters,
            write_lock: Mutex::new(()),
        }
    }

    fn name_taken(&self, org: &str, name: &str, except: Option<ProjectId>) -> bool {
        self.projects.iter().any(|p| {
            p.org == org && p.name.eq_ignore_ascii_case(name) && Some(p.id) != except
        })
    }

    fn find_id_by_slug(&self, org: &str, slug: &str) -> Option<ProjectId> {
        self.projects
            .iter()
            .find(|p| p.org == org && p.slug == slug)
            .map(|p| p.id)
    }

    fn not_found(org: &str, slug: &str) -> RegistryError {
        RegistryError::NotFound {
            org: org.to_string(),
            slug: slug.to_string(),
        }
    }

    /// Register a project under `org` and provision its zeroed counter.
    ///
    /// If the counter cannot be created the project is removed again, so a
    /// project is never visible without its counter for longer than the
    /// provisioning call.
    pub async fn create(&self, org: &str, new: NewProject) -> Result<Project, RegistryError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidName);
        }

        let _guard = self.write_lock.lock().await;
        if self.name_taken(org, name, None) {
            return Err(RegistryError::NameTaken {
                org: org.to_string(),
                name: name.to_string(),
            });
        }

        let project = Project {
            id: ProjectId::new(),
            org: org.to_string(),
            name: name.to_string(),
            slug: generate_slug(),
            api_key: generate_api_key(),
            analytics_token: new.analytics_token,
            data_center: new.data_center,
            is_premium: new.is_premium,
            created_at: Utc::now(),
        };

        self.projects.insert(project.id, project.clone());
        self.by_api_key.insert(project.api_key.clone(), project.id);

        if let Err(e) = self.counters.create(project.id).await {
            error!(project_id = %project.id, error = %e, "counter provisioning failed, rolling back project");
            self.by_api_key.remove(&project.api_key);
            self.projects.remove(&project.id);
            return Err(e.into());
        }

        info!(
            project_id = %project.id,
            org = %project.org,
            slug = %project.slug,
            premium = project.is_premium,
            "project created"
        );
        Ok(project)
    }

    pub fn get(&self, id: ProjectId) -> Option<Project> {
        self.projects.get(&id).map(|p| p.value().clone())
    }

    pub fn find_by_slug(&self, org: &str, slug: &str) -> Option<Project> {
        self.find_id_by_slug(org, slug).and_then(|id| self.get(id))
    }

    /// Projects of one organization, oldest first.
    pub fn list_by_org(&self, org: &str) -> Vec<Project> {
        let mut projects: Vec<Project> = self
            .projects
            .iter()
            .filter(|p| p.org == org)
            .map(|p| p.value().clone())
            .collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    pub async fn update(
        &self,
        org: &str,
        slug: &str,
        update: ProjectUpdate,
    ) -> Result<Project, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let id = self
            .find_id_by_slug(org, slug)
            .ok_or_else(|| Self::not_found(org, slug))?;

        if let Some(name) = update.name.as_deref() {
            let name = name.trim();
            if name.is_empty() {
                return Err(RegistryError::InvalidName);
            }
            if self.name_taken(org, name, Some(id)) {
                return Err(RegistryError::NameTaken {
                    org: org.to_string(),
                    name: name.to_string(),
                });
            }
        }

        let mut entry = self
            .projects
            .get_mut(&id)
            .ok_or_else(|| Self::not_found(org, slug))?;
        let project = entry.value_mut();
        if let Some(name) = update.name {
            project.name = name.trim().to_string();
        }
        if let Some(token) = update.analytics_token {
            project.analytics_token = Some(token);
        }
        if let Some(dc) = update.data_center {
            project.data_center = Some(dc);
        }
        if let Some(premium) = update.is_premium {
            project.is_premium = premium;
        }

        info!(project_id = %project.id, premium = project.is_premium, "project updated");
        Ok(project.clone())
    }

    /// Remove a project together with its counter.
    pub async fn delete(&self, org: &str, slug: &str) -> Result<Project, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let id = self
            .find_id_by_slug(org, slug)
            .ok_or_else(|| Self::not_found(org, slug))?;
        let (_, project) = self
            .projects
            .remove(&id)
            .ok_or_else(|| Self::not_found(org, slug))?;
        self.by_api_key.remove(&project.api_key);

        match self.counters.delete(project.id).await {
            Ok(true) => {}
            Ok(false) => warn!(project_id = %project.id, "deleted project had no counter"),
            Err(e) => {
                // The project is already gone; an orphaned counter is only
                // reset by the hourly job and never consulted again.
                error!(project_id = %project.id, error = %e, "failed to delete project counter");
            }
        }

        info!(project_id = %project.id, org = %org, slug = %slug, "project deleted");
        Ok(project)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[async_trait]
impl ProjectLookup for ProjectRegistry {
    async fn find_by_api_key(&self, api_key: &str) -> Option<Project> {
        let id = *self.by_api_key.get(api_key)?;
        self.get(id)
    }
}
