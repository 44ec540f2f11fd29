mod common;

use common::{dec, money, sample_invoice, TestApp};
use futures::future::join_all;
use reqwest::Method;
use serde_json::{json, Value};

async fn pay_as_owner(app: &TestApp, id: &str, amount: &str) -> reqwest::Response {
    app.owner(Method::POST, &format!("/invoices/{}/payments", id))
        .json(&json!({ "amount": amount }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn standalone_invoice_gets_a_number() {
    let app = TestApp::spawn().await;

    let invoice = app.create_invoice(sample_invoice(500)).await;

    let number = invoice["invoice_number"].as_str().unwrap();
    assert!(number.starts_with("INV-"));
    assert_eq!(number.len(), "INV-20260101-ABC123".len());
    assert_eq!(invoice["status"], "unpaid");
    assert!(invoice["estimate_id"].is_null());
}

#[tokio::test]
async fn standalone_invoice_requires_client_email() {
    let app = TestApp::spawn().await;
    let mut body = sample_invoice(500);
    body.as_object_mut().unwrap().remove("client_email");

    let response = app
        .owner(Method::POST, "/invoices")
        .json(&body)
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn partial_then_full_payment() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(500)).await;
    let id = invoice["id"].as_str().unwrap();

    let first: Value = pay_as_owner(&app, id, "200").await.json().await.unwrap();
    assert_eq!(first["status"], "partially_paid");
    assert_eq!(money(&first["amount_paid"]), dec("200"));

    let second: Value = pay_as_owner(&app, id, "300").await.json().await.unwrap();
    assert_eq!(second["status"], "paid");
    assert_eq!(money(&second["amount_paid"]), dec("500"));

    let response = pay_as_owner(&app, id, "1").await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn overpayment_is_a_conflict() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(100)).await;

    let response = pay_as_owner(&app, invoice["id"].as_str().unwrap(), "150").await;

    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("exceeds balance"));
}

#[tokio::test]
async fn concurrent_payments_are_not_lost() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(1000)).await;
    let id = invoice["id"].as_str().unwrap();

    let responses = join_all((0..20).map(|_| pay_as_owner(&app, id, "10"))).await;
    assert!(responses.iter().all(|r| r.status().is_success()));

    let stored: Value = app
        .owner(Method::GET, &format!("/invoices/{}", id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(money(&stored["amount_paid"]), dec("200"));
    assert_eq!(stored["payment_history"].as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn pricing_is_frozen_once_paid_into() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(500)).await;
    let id = invoice["id"].as_str().unwrap();
    pay_as_owner(&app, id, "50").await;

    let response = app
        .owner(Method::PATCH, &format!("/invoices/{}", id))
        .json(&json!({ "line_items": [{ "description": "Cheaper", "quantity": 1, "rate": 10 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let response = app
        .owner(Method::PATCH, &format!("/invoices/{}", id))
        .json(&json!({ "notes": "Thanks for the deposit" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["view_token"], invoice["view_token"]);
    assert_eq!(updated["invoice_number"], invoice["invoice_number"]);
}

#[tokio::test]
async fn send_invoice_notifies_with_payment_link() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(500)).await;

    let response = app
        .owner(
            Method::POST,
            &format!("/invoices/{}/send", invoice["id"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let sent = app.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jordan@example.com");
}

#[tokio::test]
async fn deleted_invoice_token_stops_resolving() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(sample_invoice(500)).await;

    app.owner(
        Method::DELETE,
        &format!("/invoices/{}", invoice["id"].as_str().unwrap()),
    )
    .send()
    .await
    .unwrap();

    let response = app
        .public(
            Method::GET,
            &format!("/view-invoice/{}", invoice["view_token"].as_str().unwrap()),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
