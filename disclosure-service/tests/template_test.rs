//! Agreement templates: exactly one default at a time.

mod common;

use common::{platform_draft, TestContext};
use disclosure_service::models::CreateTemplate;
use disclosure_service::services::ServiceError;
use uuid::Uuid;

fn template(name: &str, make_default: bool) -> CreateTemplate {
    CreateTemplate {
        name: name.to_string(),
        version_label: "v2".to_string(),
        body_text: format!("{} terms", name),
        make_default,
    }
}

#[tokio::test]
async fn test_new_default_replaces_old() {
    let ctx = TestContext::new().await;

    let created = ctx
        .state
        .agreements
        .create_template(template("Investor NDA", true))
        .await
        .unwrap();
    assert!(created.is_default);

    let templates = ctx.state.agreements.list_templates().await.unwrap();
    assert_eq!(templates.len(), 2);
    assert_eq!(templates.iter().filter(|t| t.is_default).count(), 1);

    // New drafts snapshot the new default
    let agreement = ctx
        .state
        .agreements
        .create_draft(platform_draft(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(agreement.template_id, Some(created.template_id));
    assert!(agreement.version_text.contains("Investor NDA terms"));
}

#[tokio::test]
async fn test_non_default_template_leaves_default_alone() {
    let ctx = TestContext::new().await;
    let created = ctx
        .state
        .agreements
        .create_template(template("Draft terms", false))
        .await
        .unwrap();
    assert!(!created.is_default);

    let defaults: Vec<_> = ctx
        .state
        .agreements
        .list_templates()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.is_default)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_ne!(defaults[0].template_id, created.template_id);
}

#[tokio::test]
async fn test_concurrent_default_swaps_keep_one_default() {
    let ctx = TestContext::new().await;
    let mut ids = Vec::new();
    for i in 0..8 {
        let t = ctx
            .state
            .agreements
            .create_template(template(&format!("Variant {}", i), false))
            .await
            .unwrap();
        ids.push(t.template_id);
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let agreements = ctx.state.agreements.clone();
            let id = *id;
            tokio::spawn(async move { agreements.set_default_template(id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let templates = ctx.state.agreements.list_templates().await.unwrap();
    assert_eq!(templates.iter().filter(|t| t.is_default).count(), 1);
}

#[tokio::test]
async fn test_unknown_template_cannot_become_default() {
    let ctx = TestContext::new().await;
    let result = ctx
        .state
        .agreements
        .set_default_template(Uuid::new_v4())
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn test_template_input_is_validated() {
    let ctx = TestContext::new().await;
    let mut input = template("Blank", false);
    input.body_text = String::new();

    let result = ctx.state.agreements.create_template(input).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}
