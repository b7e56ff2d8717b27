use studio_backend::protocol::{EnvelopeKind, EventEnvelopeV1, Project, ProjectStatus, StatusEvent};
use studio_backend::storage::sanitize_filename;
use std::path::PathBuf;
use uuid::Uuid;

#[test]
fn status_event_envelope() {
    let project = Project::new(Uuid::new_v4(), "take.wav".into(), PathBuf::from("uploads/take.wav"));
    let env = EventEnvelopeV1::wrap_status(&StatusEvent::from(&project));
    assert_eq!(env.version, "v1");
    assert!(matches!(env.kind, EnvelopeKind::ProjectStatus));
    assert_eq!(env.data["status"], "uploaded");
    assert_eq!(env.data["project_id"], project.id.to_string());
    assert!(env.data.get("output_url").is_none());
}

#[test]
fn status_wire_names() {
    let names: Vec<String> = [
        ProjectStatus::Uploaded,
        ProjectStatus::Processing,
        ProjectStatus::Rendering,
        ProjectStatus::Done,
        ProjectStatus::Failed,
    ]
    .iter()
    .map(|s| serde_json::to_value(s).unwrap().as_str().unwrap().to_string())
    .collect();
    assert_eq!(names, ["uploaded", "processing", "rendering", "done", "failed"]);
}

#[test]
fn stored_names_are_single_components() {
    for name in ["a/b/c.mov", "..\\..\\x.wav", "ünïcode.mp3", "   "] {
        let cleaned = sanitize_filename(name);
        assert!(!cleaned.contains('/'));
        assert!(!cleaned.contains('\\'));
        assert!(!cleaned.starts_with('.'));
        assert!(!cleaned.is_empty());
    }
}
