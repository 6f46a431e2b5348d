//! Model listing endpoint

use pretty_assertions::assert_eq;

use nexus_relay::routes::models::ModelsResponse;

use crate::common::{constants::*, TestApp, TestOptions};

#[tokio::test]
async fn test_models_lists_bound_models_without_auth() {
    let app = TestApp::spawn().await;

    let response = app.server.get("/v1/models").await;

    response.assert_status_ok();
    let models: ModelsResponse = response.json();
    assert_eq!(models.object, "list");
    let ids: Vec<&str> = models.data.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![MODEL, DIVERGENT_MODEL]);
    for model in &models.data {
        assert_eq!(model.object, "model");
        assert_eq!(model.owned_by, PROVIDER_NAME);
    }
}

#[tokio::test]
async fn test_models_alias_path_matches() {
    let app = TestApp::spawn().await;

    let v1: ModelsResponse = app.server.get("/v1/models").await.json();
    let bare: ModelsResponse = app.server.get("/models").await.json();

    assert_eq!(v1.data.len(), bare.data.len());
    assert_eq!(v1.data[0].id, bare.data[0].id);
}

#[tokio::test]
async fn test_models_empty_when_nothing_is_bound() {
    let app = TestApp::spawn_with(TestOptions {
        models: vec![],
        ..Default::default()
    })
    .await;

    let models: ModelsResponse = app.server.get("/v1/models").await.json();

    assert!(models.data.is_empty());
}
