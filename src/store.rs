use crate::protocol::{Project, ProjectStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Uuid),
    InvalidTransition { from: ProjectStatus, to: ProjectStatus },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "project {} not found", id),
            StoreError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition {} -> {}", from, to)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// In-memory project registry. Records live for the lifetime of the process.
#[derive(Clone, Default)]
pub struct ProjectStore {
    inner: Arc<RwLock<HashMap<Uuid, Project>>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.inner.write().await.insert(project.id, project);
    }

    pub async fn get(&self, id: &Uuid) -> Option<Project> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Project> {
        self.inner.write().await.remove(id)
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn advance(&self, id: &Uuid, next: ProjectStatus) -> Result<Project, StoreError> {
        self.update(id, next, |_| {}).await
    }

    pub async fn complete(&self, id: &Uuid, output_url: String) -> Result<Project, StoreError> {
        self.update(id, ProjectStatus::Done, |p| p.output_url = Some(output_url)).await
    }

    pub async fn fail(&self, id: &Uuid, reason: String) -> Result<Project, StoreError> {
        self.update(id, ProjectStatus::Failed, |p| p.error = Some(reason)).await
    }

    async fn update<F>(&self, id: &Uuid, next: ProjectStatus, apply: F) -> Result<Project, StoreError>
    where
        F: FnOnce(&mut Project),
    {
        let mut guard = self.inner.write().await;
        let project = guard.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if !project.status.can_advance_to(next) {
            return Err(StoreError::InvalidTransition { from: project.status, to: next });
        }
        project.status = next;
        apply(project);
        Ok(project.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample() -> Project {
        Project::new(Uuid::new_v4(), "clip.mov".to_string(), PathBuf::from("uploads/clip.mov"))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = ProjectStore::new();
        let project = sample();
        let id = project.id;
        store.insert(project).await;

        store.advance(&id, ProjectStatus::Processing).await.unwrap();
        store.advance(&id, ProjectStatus::Rendering).await.unwrap();
        let done = store.complete(&id, "/downloads/x.mp4".to_string()).await.unwrap();

        assert_eq!(done.status, ProjectStatus::Done);
        assert_eq!(done.output_url.as_deref(), Some("/downloads/x.mp4"));
        assert_eq!(store.get(&id).await.unwrap().status, ProjectStatus::Done);
    }

    #[tokio::test]
    async fn test_rejects_skipping_and_regressing() {
        let store = ProjectStore::new();
        let project = sample();
        let id = project.id;
        store.insert(project).await;

        let err = store.advance(&id, ProjectStatus::Rendering).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition { from: ProjectStatus::Uploaded, to: ProjectStatus::Rendering }
        );

        store.advance(&id, ProjectStatus::Processing).await.unwrap();
        assert!(store.advance(&id, ProjectStatus::Uploaded).await.is_err());
        assert_eq!(store.get(&id).await.unwrap().status, ProjectStatus::Processing);
    }

    #[tokio::test]
    async fn test_fail_is_terminal() {
        let store = ProjectStore::new();
        let project = sample();
        let id = project.id;
        store.insert(project).await;

        let failed = store.fail(&id, "disk vanished".to_string()).await.unwrap();
        assert_eq!(failed.status, ProjectStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("disk vanished"));

        assert!(store.advance(&id, ProjectStatus::Processing).await.is_err());
        assert!(store.fail(&id, "again".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let store = ProjectStore::new();
        let id = Uuid::new_v4();
        assert!(store.get(&id).await.is_none());
        assert_eq!(
            store.advance(&id, ProjectStatus::Processing).await.unwrap_err(),
            StoreError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let store = ProjectStore::new();
        let project = sample();
        let id = project.id;
        store.insert(project).await;
        assert!(!store.is_empty().await);

        assert!(store.remove(&id).await.is_some());
        assert!(store.is_empty().await);
    }
}
