mod common;

use common::{dec, money, sample_invoice, TestApp};
use reqwest::Method;
use serde_json::{json, Value};

#[tokio::test]
async fn unknown_and_malformed_tokens_look_identical() {
    let app = TestApp::spawn().await;
    let unknown = "A".repeat(43);

    let mut bodies = Vec::new();
    for path in [
        format!("/view-estimate/{}", unknown),
        "/view-estimate/not-a-token".to_string(),
        format!("/view-invoice/{}", unknown),
        "/view-invoice/x".to_string(),
    ] {
        let response = app.public(Method::GET, &path).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 404, "{}", path);
        bodies.push(response.text().await.unwrap());
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn empty_token_gets_the_same_not_found_body() {
    let app = TestApp::spawn().await;
    let expected = app
        .public(Method::GET, "/view-estimate/not-a-token")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    for path in ["/view-estimate/", "/view-invoice/", "/view-invoice"] {
        let response = app.public(Method::GET, path).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 404, "{}", path);
        assert_eq!(response.text().await.unwrap(), expected, "{}", path);
    }
}

#[tokio::test]
async fn draft_estimates_are_not_visible() {
    let app = TestApp::spawn().await;
    let estimate = app.create_estimate(common::sample_estimate()).await;

    let response = app
        .public(
            Method::GET,
            &format!("/view-estimate/{}", estimate["view_token"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn public_view_carries_no_identifiers() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;

    let view: Value = app
        .public(
            Method::GET,
            &format!("/view-estimate/{}", estimate["view_token"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(view["status"], "sent");
    assert_eq!(money(&view["total"]), dec("108"));
    assert!(view.get("id").is_none());
    assert!(view.get("owner_id").is_none());
    assert!(view.get("view_token").is_none());
}

#[tokio::test]
async fn signing_approves_once() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;
    let token = estimate["view_token"].as_str().unwrap();

    let response = app.sign(token, "Jordan Lee", "jordan@example.com").await;
    assert_eq!(response.status().as_u16(), 200);
    let first: Value = response.json().await.unwrap();
    assert_eq!(first["status"], "approved");

    let response = app.sign(token, "Jordan Lee", "JORDAN@example.com").await;
    assert_eq!(response.status().as_u16(), 200);
    let second: Value = response.json().await.unwrap();
    assert_eq!(second["signed_at"], first["signed_at"]);

    let response = app.sign(token, "Someone Else", "else@example.com").await;
    assert_eq!(response.status().as_u16(), 409);
    let body = response.text().await.unwrap();
    assert!(!body.contains("signer"));
}

#[tokio::test]
async fn rejected_estimate_cannot_be_signed() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;
    let token = estimate["view_token"].as_str().unwrap();

    let response = app
        .public(Method::POST, &format!("/view-estimate/{}/reject", token))
        .json(&json!({ "reason": "Over budget" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let view: Value = response.json().await.unwrap();
    assert_eq!(view["status"], "rejected");

    let response = app.sign(token, "Jordan Lee", "jordan@example.com").await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn approved_estimate_is_read_only_for_the_owner() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;
    app.sign(
        estimate["view_token"].as_str().unwrap(),
        "Jordan Lee",
        "jordan@example.com",
    )
    .await;

    let response = app
        .owner(
            Method::PATCH,
            &format!("/estimates/{}", estimate["id"].as_str().unwrap()),
        )
        .json(&json!({ "project_name": "Changed after signing" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn converted_invoice_survives_estimate_deletion() {
    let app = TestApp::spawn().await;
    let estimate = app.sent_estimate().await;
    let estimate_id = estimate["id"].as_str().unwrap();
    app.sign(
        estimate["view_token"].as_str().unwrap(),
        "Jordan Lee",
        "jordan@example.com",
    )
    .await;

    let response = app
        .owner(Method::POST, &format!("/estimates/{}/convert", estimate_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let invoice: Value = response.json().await.unwrap();
    assert_eq!(money(&invoice["total"]), dec("108"));

    let response = app
        .owner(Method::DELETE, &format!("/estimates/{}", estimate_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let token = invoice["view_token"].as_str().unwrap();
    let view: Value = app
        .public(Method::GET, &format!("/view-invoice/{}", token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(view["line_items"].as_array().unwrap().len(), 1);

    let response = app.pay(token, "108", "convert-nonce-1").await;
    assert_eq!(response.status().as_u16(), 200);
    let paid: Value = response.json().await.unwrap();
    assert_eq!(paid["status"], "paid");
}

#[tokio::test]
async fn draft_estimate_cannot_be_converted() {
    let app = TestApp::spawn().await;
    let estimate = app.create_estimate(common::sample_estimate()).await;

    let response = app
        .owner(
            Method::POST,
            &format!("/estimates/{}/convert", estimate["id"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn invoice_view_shows_balance() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(500)).await;

    let view: Value = app
        .public(
            Method::GET,
            &format!("/view-invoice/{}", invoice["view_token"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(view["invoice_number"], invoice["invoice_number"]);
    assert_eq!(money(&view["balance_due"]), dec("500"));
    assert!(view.get("owner_id").is_none());
}
