use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "rendering")]
    Rendering,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "failed")]
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Uploaded => "uploaded",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Rendering => "rendering",
            ProjectStatus::Done => "done",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Done | ProjectStatus::Failed)
    }

    /// Forward-only lifecycle; any live status may fail.
    pub fn can_advance_to(&self, next: ProjectStatus) -> bool {
        match (self, next) {
            (ProjectStatus::Uploaded, ProjectStatus::Processing) => true,
            (ProjectStatus::Processing, ProjectStatus::Rendering) => true,
            (ProjectStatus::Rendering, ProjectStatus::Done) => true,
            (current, ProjectStatus::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub filename: String,
    pub path: PathBuf,
    pub status: ProjectStatus,
    pub created_at: String,
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Project {
    pub fn new(id: Uuid, filename: String, path: PathBuf) -> Self {
        Self {
            id,
            filename,
            path,
            status: ProjectStatus::Uploaded,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            output_url: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub project_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum EnvelopeKind {
    #[serde(rename = "project_status")]
    ProjectStatus,
    #[serde(rename = "dead_letter")]
    DeadLetter,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventEnvelopeV1 {
    pub version: String,
    pub kind: EnvelopeKind,
    pub data: Value,
}

impl EventEnvelopeV1 {
    pub fn wrap_status(e: &StatusEvent) -> Self {
        Self {
            version: "v1".to_string(),
            kind: EnvelopeKind::ProjectStatus,
            data: serde_json::to_value(e).unwrap_or(Value::Null),
        }
    }

    pub fn wrap_dead_letter(d: &DeadLetter) -> Self {
        Self {
            version: "v1".to_string(),
            kind: EnvelopeKind::DeadLetter,
            data: serde_json::to_value(d).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusEvent {
    pub project_id: Uuid,
    pub status: ProjectStatus,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Project> for StatusEvent {
    fn from(p: &Project) -> Self {
        Self {
            project_id: p.id,
            status: p.status,
            ts: Utc::now().to_rfc3339(),
            output_url: p.output_url.clone(),
            error: p.error.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeadLetter {
    pub reason: String,
    pub project_id: Uuid,
    pub filename: String,
    pub last_status: ProjectStatus,
    pub error: String,
    pub ts: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_wire_shape() {
        let id = Uuid::new_v4();
        let project = Project::new(id, "clip.mov".to_string(), PathBuf::from("uploads/x_clip.mov"));

        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["id"], json!(id.to_string()));
        assert_eq!(value["filename"], "clip.mov");
        assert_eq!(value["path"], "uploads/x_clip.mov");
        assert_eq!(value["status"], "uploaded");
        assert_eq!(value["outputUrl"], Value::Null);
        assert!(value.get("error").is_none());

        let created = value["createdAt"].as_str().unwrap();
        assert!(created.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(created).is_ok());
    }

    #[test]
    fn test_upload_response_uses_camel_case() {
        let id = Uuid::new_v4();
        let body = serde_json::to_value(UploadResponse { project_id: id }).unwrap();
        assert_eq!(body, json!({"projectId": id.to_string()}));
    }

    #[test]
    fn test_lifecycle_transitions() {
        use ProjectStatus::*;
        assert!(Uploaded.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Rendering));
        assert!(Rendering.can_advance_to(Done));
        assert!(Uploaded.can_advance_to(Failed));
        assert!(Rendering.can_advance_to(Failed));

        assert!(!Uploaded.can_advance_to(Rendering));
        assert!(!Rendering.can_advance_to(Processing));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Processing));
        assert!(!Done.can_advance_to(Done));
    }

    #[test]
    fn test_status_envelope() {
        let mut project = Project::new(Uuid::new_v4(), "a.wav".to_string(), PathBuf::from("a"));
        project.status = ProjectStatus::Done;
        project.output_url = Some("/downloads/x.mp4".to_string());

        let env = EventEnvelopeV1::wrap_status(&StatusEvent::from(&project));
        assert!(matches!(env.kind, EnvelopeKind::ProjectStatus));
        let parsed: StatusEvent = serde_json::from_value(env.data).unwrap();
        assert_eq!(parsed.status, ProjectStatus::Done);
        assert_eq!(parsed.output_url.as_deref(), Some("/downloads/x.mp4"));
    }
}
