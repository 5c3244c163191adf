//! End-to-end flows through the CLI runner against a temp state file.

use clap::Parser;
use dispatchctl::{run, Args};
use tempfile::TempDir;

async fn dispatch(state: &TempDir, argv: &[&str]) -> anyhow::Result<serde_json::Value> {
    let state_file = state.path().join("state.json");
    let state_file = state_file.to_str().unwrap();
    let mut full = vec![
        "dispatchctl",
        "--state",
        state_file,
        "--tenant",
        "acme",
        "--now",
        "2026-03-02T09:00:00",
    ];
    full.extend_from_slice(argv);
    run(Args::try_parse_from(full)?).await
}

#[tokio::test]
async fn test_assign_accept_flow_persists_between_runs() {
    let state = TempDir::new().unwrap();

    dispatch(
        &state,
        &["technician", "add", "tech-1", "Tomas", "--email", "tomas@acme.test"],
    )
    .await
    .unwrap();

    let created = dispatch(&state, &["create", "Boiler pressure low", "--category", "hvac"])
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["current_state"], "CREATED");

    let assigned = dispatch(&state, &["assign", &id, "tomas@acme.test"])
        .await
        .unwrap();
    assert_eq!(assigned["assigned_to"], "tech-1");

    let pending = dispatch(
        &state,
        &["pending", "--actor", "tech-1", "--role", "technician"],
    )
    .await
    .unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let accepted = dispatch(
        &state,
        &["accept", &id, "--actor", "tech-1", "--role", "technician"],
    )
    .await
    .unwrap();
    assert_eq!(accepted["current_state"], "ACCEPTED");

    let stats = dispatch(&state, &["sla-stats"]).await.unwrap();
    assert_eq!(stats["accepted"], 1);
}

#[tokio::test]
async fn test_technician_role_cannot_assign() {
    let state = TempDir::new().unwrap();
    dispatch(&state, &["technician", "add", "tech-1", "Tomas"])
        .await
        .unwrap();
    let created = dispatch(&state, &["create", "x"]).await.unwrap();
    let id = created["id"].as_str().unwrap();

    let err = dispatch(
        &state,
        &["assign", id, "tech-1", "--actor", "tech-1", "--role", "technician"],
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("not allowed"), "{err:#}");
}

#[tokio::test]
async fn test_exec_runs_raw_operation() {
    let state = TempDir::new().unwrap();
    let out = dispatch(&state, &["exec", r#"{"op":"check_escalations"}"#])
        .await
        .unwrap();
    assert_eq!(out["level"], "full");
    assert!(out["payload"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_schema_needs_no_state() {
    let state = TempDir::new().unwrap();
    let schema = dispatch(&state, &["schema"]).await.unwrap();
    assert!(schema.to_string().contains("mark_notification_read"));
    assert!(!state.path().join("state.json").exists());
}

#[tokio::test]
async fn test_import_assigns_technicians_to_tenant() {
    let state = TempDir::new().unwrap();
    let file = state.path().join("technicians.json");
    std::fs::write(
        &file,
        r#"[
            {"tenant_id": "elsewhere", "id": "tech-1", "name": "Tomas"},
            {"tenant_id": "elsewhere", "id": "tech-2", "name": "Ana", "specialization": "hvac"}
        ]"#,
    )
    .unwrap();

    let summary = dispatch(&state, &["technician", "import", file.to_str().unwrap()])
        .await
        .unwrap();
    assert_eq!(summary["imported"], 2);
    assert_eq!(summary["tenant_id"], "acme");

    let listed = dispatch(&state, &["technician", "list"]).await.unwrap();
    let ids: Vec<_> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["tech-1", "tech-2"]);
}
