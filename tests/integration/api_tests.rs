//! API integration tests
//!
//! Require a running server with `auth.bootstrap_staff` set to the
//! credentials below.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";
const STAFF_USERNAME: &str = "admin";
const STAFF_PASSWORD: &str = "change-me-please";

fn unique(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}{}", prefix, nanos)
}

/// Digits-only suffix, for building unique ISBN-13 values
fn unique_isbn() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
        .to_string();
    format!("{:0>13}", &nanos[nanos.len() - 13..])
}

async fn obtain_token(client: &Client, username: &str, password: &str) -> String {
    let response = client
        .post(format!("{}/token", BASE_URL))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Failed to send token request");

    let body: Value = response.json().await.expect("Failed to parse token response");
    body["access"].as_str().expect("No access token in response").to_string()
}

/// Register a fresh member and return their access token
async fn register_member(client: &Client) -> String {
    let username = unique("reader");
    let response = client
        .post(format!("{}/users", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@library.example", username),
            "password": "long-enough-password",
        }))
        .send()
        .await
        .expect("Failed to send register request");
    assert_eq!(response.status(), StatusCode::CREATED);

    obtain_token(client, &username, "long-enough-password").await
}

async fn create_book(client: &Client, staff_token: &str, copies: i32) -> i64 {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(staff_token)
        .json(&json!({
            "title": unique("Integration Book "),
            "author": "Test Author",
            "isbn": unique_isbn(),
            "published_date": "2001-01-01",
            "copies_available": copies,
        }))
        .send()
        .await
        .expect("Failed to send create book request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await.expect("Failed to parse book");
    body["id"].as_i64().expect("No book id")
}

async fn book_copies(client: &Client, token: &str, book_id: i64) -> i64 {
    let body: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse book");
    body["copies_available"].as_i64().expect("No copies_available")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_register_provisions_active_membership() {
    let client = Client::new();
    let token = register_member(&client).await;

    let response = client
        .get(format!("{}/users/me", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["membership"]["is_active"], true);
    assert!(body["membership"]["id"].is_i64());
}

#[tokio::test]
#[ignore]
async fn test_token_invalid_credentials() {
    let client = Client::new();

    let response = client
        .post(format!("{}/token", BASE_URL))
        .json(&json!({ "username": STAFF_USERNAME, "password": "wrong" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_checkout_requires_authentication() {
    let client = Client::new();

    let response = client
        .post(format!("{}/checkout", BASE_URL))
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_checkout_and_return_flow() {
    let client = Client::new();
    let staff = obtain_token(&client, STAFF_USERNAME, STAFF_PASSWORD).await;
    let member = register_member(&client).await;
    let book_id = create_book(&client, &staff, 2).await;

    let response = client
        .post(format!("{}/checkout", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send checkout");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["transaction"]["return_date"].is_null());
    assert_eq!(book_copies(&client, &member, book_id).await, 1);

    // Same member, same book, still out
    let response = client
        .post(format!("{}/checkout", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send checkout");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], 7);
    assert_eq!(book_copies(&client, &member, book_id).await, 1);

    let response = client
        .post(format!("{}/return", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send return");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["transaction"]["return_date"].is_string());
    assert_eq!(book_copies(&client, &member, book_id).await, 2);

    // Nothing left to return
    let response = client
        .post(format!("{}/return", BASE_URL))
        .bearer_auth(&member)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send return");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

async fn post_circulation(client: &Client, path: &str, token: &str, book_id: i64) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}/{}", BASE_URL, path))
        .bearer_auth(token)
        .json(&json!({ "book_id": book_id }))
        .send()
        .await
        .expect("Failed to send circulation request");
    let status = response.status();
    let body: Value = response.json().await.expect("Failed to parse response");
    (status, body)
}

/// A losing racer reports the ledger rule it hit, or a conflict it may retry
fn assert_lost_race(status: StatusCode, body: &Value, rule_code: u64) {
    match status {
        StatusCode::CONFLICT => assert_eq!(body["code"], rule_code),
        StatusCode::SERVICE_UNAVAILABLE => assert_eq!(body["code"], 10),
        other => panic!("unexpected status {other}: {body}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_last_copy_goes_to_one_member() {
    let client = Client::new();
    let staff = obtain_token(&client, STAFF_USERNAME, STAFF_PASSWORD).await;
    let first = register_member(&client).await;
    let second = register_member(&client).await;
    let book_id = create_book(&client, &staff, 1).await;

    let (a, b) = tokio::join!(
        post_circulation(&client, "checkout", &first, book_id),
        post_circulation(&client, "checkout", &second, book_id),
    );

    let winners = [&a, &b].iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    assert_eq!(winners, 1);
    let (status, body) = if a.0 == StatusCode::CREATED { &b } else { &a };
    assert_lost_race(*status, body, 8);
    assert_eq!(book_copies(&client, &staff, book_id).await, 0);

    // Out of stock books drop off the available list
    let response = client
        .get(format!("{}/books/available", BASE_URL))
        .bearer_auth(&second)
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    let listed = body
        .as_array()
        .expect("Expected an array")
        .iter()
        .any(|b| b["id"].as_i64() == Some(book_id));
    assert!(!listed);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_returns_close_once() {
    let client = Client::new();
    let staff = obtain_token(&client, STAFF_USERNAME, STAFF_PASSWORD).await;
    let member = register_member(&client).await;
    let book_id = create_book(&client, &staff, 1).await;

    let (status, _) = post_circulation(&client, "checkout", &member, book_id).await;
    assert_eq!(status, StatusCode::CREATED);

    let (a, b) = tokio::join!(
        post_circulation(&client, "return", &member, book_id),
        post_circulation(&client, "return", &member, book_id),
    );

    let winners = [&a, &b].iter().filter(|(s, _)| *s == StatusCode::OK).count();
    assert_eq!(winners, 1);
    let (status, body) = if a.0 == StatusCode::OK { &b } else { &a };
    assert_lost_race(*status, body, 9);
    assert_eq!(book_copies(&client, &staff, book_id).await, 1);
}

#[tokio::test]
#[ignore]
async fn test_user_search_total_matches_rows() {
    let client = Client::new();
    let staff = obtain_token(&client, STAFF_USERNAME, STAFF_PASSWORD).await;

    let username = unique("searchable");
    let response = client
        .post(format!("{}/users", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@library.example", username),
            "password": "long-enough-password",
        }))
        .send()
        .await
        .expect("Failed to send register request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = client
        .get(format!("{}/users", BASE_URL))
        .bearer_auth(&staff)
        .query(&[("name", username.as_str()), ("per_page", "5000")])
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"].as_array().expect("Expected items").len(), 1);
    // The applied page size, not the requested one
    assert_eq!(body["per_page"], 200);
}
