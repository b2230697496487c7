use std::sync::Arc;

use async_trait::async_trait;
use axum_test::TestServer;
use khaad::{
    config::Config,
    mailer::{Mail, MailError, Mailer},
    models::{Customer, Product},
    router,
    state::State,
    store::MemoryStore,
    voice::{Assistant, VoiceDraft, VoiceError, parse_answer},
};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Answers every voice command with the same canned JSON.
struct Scripted(&'static str);

#[async_trait]
impl Assistant for Scripted {
    async fn extract(
        &self,
        _voice_text: &str,
        _products: &[Product],
        _customers: &[Customer],
    ) -> Result<VoiceDraft, VoiceError> {
        parse_answer(self.0)
    }
}

/// Keeps every mail instead of sending it.
#[derive(Default, Clone)]
struct Outbox(Arc<Mutex<Vec<Mail>>>);

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        self.0.lock().push(mail);
        Ok(())
    }
}

fn server_with(assistant: Option<&'static str>, outbox: Outbox) -> TestServer {
    let state = State::with(
        Config::local("test-secret"),
        Arc::new(MemoryStore::new()),
        assistant.map(|answer| Arc::new(Scripted(answer)) as Arc<dyn Assistant>),
        Arc::new(outbox),
    );

    TestServer::new(router(state)).unwrap()
}

fn server() -> TestServer {
    server_with(None, Outbox::default())
}

async fn signup_and_login(server: &TestServer, email: &str) -> String {
    let res = server
        .post("/api/auth/signup")
        .json(&json!({ "name": "Mohan", "email": email, "password": "khaad@123", "mobile": "9999999999" }))
        .await;
    assert_eq!(res.status_code(), 201);

    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": "khaad@123" }))
        .await;
    assert_eq!(res.status_code(), 200);

    res.json::<Value>()["token"].as_str().unwrap().to_string()
}

async fn add_product(server: &TestServer, token: &str, name: &str, company: &str, qty: f64, rate: f64) -> Value {
    let res = server
        .post("/api/products")
        .authorization_bearer(token)
        .json(&json!({ "itemName": name, "company": company, "qty": qty, "rate": rate, "unit": "Bag" }))
        .await;
    assert_eq!(res.status_code(), 201);

    res.json::<Value>()["product"].clone()
}

async fn products(server: &TestServer, token: &str) -> Vec<Value> {
    server
        .get("/api/products")
        .authorization_bearer(token)
        .await
        .json::<Value>()["products"]
        .as_array()
        .unwrap()
        .clone()
}

async fn customers(server: &TestServer, token: &str) -> Vec<Value> {
    server
        .get("/api/customers")
        .authorization_bearer(token)
        .await
        .json::<Value>()["customers"]
        .as_array()
        .unwrap()
        .clone()
}

#[tokio::test]
async fn health_is_public() {
    let res = server().get("/health").await;
    assert_eq!(res.status_code(), 200);
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let server = server();

    let res = server.get("/api/products").await;
    assert_eq!(res.status_code(), 401);
    assert_eq!(res.json::<Value>()["error"], "Unauthorized");

    let res = server.get("/api/products").authorization_bearer("garbage").await;
    assert_eq!(res.status_code(), 401);
}

#[tokio::test]
async fn signup_rejects_duplicates_and_login_checks_password() {
    let outbox = Outbox::default();
    let server = server_with(None, outbox.clone());
    signup_and_login(&server, "mohan@example.com").await;

    assert_eq!(outbox.0.lock()[0].subject, "Welcome to Smart Khaad Manager!");

    let res = server
        .post("/api/auth/signup")
        .json(&json!({ "name": "Other", "email": " MOHAN@example.com ", "password": "khaad@123" }))
        .await;
    assert_eq!(res.status_code(), 400);
    assert_eq!(res.json::<Value>()["error"], "User already exists");

    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": "mohan@example.com", "password": "wrong-password" }))
        .await;
    assert_eq!(res.status_code(), 401);
}

#[tokio::test]
async fn staff_share_the_shop_but_cannot_delete() {
    let server = server();
    let owner = signup_and_login(&server, "owner@example.com").await;
    let urea = add_product(&server, &owner, "Urea", "IPL", 100.0, 266.5).await;

    let res = server
        .post("/api/settings/staff")
        .authorization_bearer(&owner)
        .json(&json!({ "name": "Sonu", "email": "sonu@example.com", "password": "sonu@123" }))
        .await;
    assert_eq!(res.status_code(), 201);

    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": "sonu@example.com", "password": "sonu@123" }))
        .await;
    let staff = res.json::<Value>()["token"].as_str().unwrap().to_string();

    assert_eq!(products(&server, &staff).await.len(), 1);

    let id = urea["id"].as_str().unwrap();
    let res = server
        .delete(&format!("/api/products/{id}"))
        .authorization_bearer(&staff)
        .await;
    assert_eq!(res.status_code(), 403);
    assert_eq!(res.json::<Value>()["error"], "Only owner can delete products");

    let res = server.get("/api/settings/staff").authorization_bearer(&staff).await;
    assert_eq!(res.status_code(), 403);

    let res = server
        .delete(&format!("/api/products/{id}"))
        .authorization_bearer(&owner)
        .await;
    assert_eq!(res.status_code(), 200);
    assert!(products(&server, &owner).await.is_empty());
}

#[tokio::test]
async fn shops_are_isolated() {
    let server = server();
    let first = signup_and_login(&server, "first@example.com").await;
    let second = signup_and_login(&server, "second@example.com").await;
    let urea = add_product(&server, &first, "Urea", "IPL", 10.0, 266.5).await;

    assert!(products(&server, &second).await.is_empty());

    let id = urea["id"].as_str().unwrap();
    let res = server
        .put(&format!("/api/products/{id}"))
        .authorization_bearer(&second)
        .json(&json!({ "rate": 1 }))
        .await;
    assert_eq!(res.status_code(), 404);
}

#[tokio::test]
async fn editing_a_product_keeps_sold_stock() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;
    let urea = add_product(&server, &token, "Urea", "IPL", 100.0, 266.5).await;
    let id = urea["id"].as_str().unwrap();

    let res = server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({ "items": [{ "productId": id, "qty": 10 }] }))
        .await;
    assert_eq!(res.status_code(), 201);

    let res = server
        .put(&format!("/api/products/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "itemName": "Urea Neem", "rate": 270, "unit": "Kg" }))
        .await;
    assert_eq!(res.status_code(), 200);
    let product = res.json::<Value>()["product"].clone();
    assert_eq!(product["itemName"], "Urea Neem");
    assert_eq!(product["qty"], json!(90.0));

    let stock = products(&server, &token).await;
    assert_eq!(stock[0]["qty"], json!(90.0));
    assert_eq!(stock[0]["unit"], "Kg");

    let res = server
        .put(&format!("/api/products/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "qty": 120 }))
        .await;
    assert_eq!(res.json::<Value>()["product"]["qty"], json!(120.0));
}

#[tokio::test]
async fn sale_with_due_moves_stock_and_delete_reverses_it() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;
    add_product(&server, &token, "Urea", "IPL", 100.0, 266.5).await;
    add_product(&server, &token, "DAP", "Kisan", 40.0, 1350.0).await;

    let res = server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({
            "type": "SALE",
            "customerName": "Raju",
            "items": [
                { "itemName": "Urea | IPL", "qty": 10, "rate": 266.5 },
                { "itemName": "dap", "company": "kisan", "qty": 2 }
            ],
            "labourCharges": 50,
            "paidAmount": 2000,
            "paymentMode": "CASH",
            "bankAccountId": ""
        }))
        .await;
    assert_eq!(res.status_code(), 201);

    let txn = res.json::<Value>()["transaction"].clone();
    assert_eq!(txn["totalAmount"], json!(5415.0));
    assert_eq!(txn["dueAmount"], json!(3415.0));
    assert_eq!(txn["invoiceNumber"], 1);

    let stock = products(&server, &token).await;
    let qty = |name: &str| {
        stock
            .iter()
            .find(|p| p["itemName"] == name)
            .map(|p| p["qty"].as_f64().unwrap())
            .unwrap()
    };
    assert_eq!(qty("Urea"), 90.0);
    assert_eq!(qty("DAP"), 38.0);

    let raju = customers(&server, &token).await;
    assert_eq!(raju.len(), 1);
    assert_eq!(raju[0]["totalDue"], json!(3415.0));

    let res = server.get("/api/dashboard/dues").authorization_bearer(&token).await;
    assert_eq!(res.json::<Value>()["customers"][0]["name"], "Raju");

    let res = server.get("/api/dashboard/stats").authorization_bearer(&token).await;
    let stats = res.json::<Value>()["stats"].clone();
    assert_eq!(stats["todaySales"], json!(5415.0));
    assert_eq!(stats["totalDue"], json!(3415.0));
    assert_eq!(stats["totalProducts"], 2);

    let id = txn["id"].as_str().unwrap();
    let res = server
        .get(&format!("/api/transactions/{id}/invoice"))
        .authorization_bearer(&token)
        .await;
    assert!(res.text().contains("Invoice #1"));

    let res = server
        .delete(&format!("/api/transactions/{id}"))
        .authorization_bearer(&token)
        .await;
    assert_eq!(res.status_code(), 200);

    let stock = products(&server, &token).await;
    assert!(stock.iter().any(|p| p["itemName"] == "Urea" && p["qty"] == json!(100.0)));
    assert!(stock.iter().any(|p| p["itemName"] == "DAP" && p["qty"] == json!(40.0)));
    assert_eq!(customers(&server, &token).await[0]["totalDue"], json!(0.0));

    let res = server
        .delete(&format!("/api/transactions/{id}"))
        .authorization_bearer(&token)
        .await;
    assert_eq!(res.status_code(), 404);
}

#[tokio::test]
async fn split_payment_and_later_payments() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/bank-accounts")
        .authorization_bearer(&token)
        .json(&json!({ "accountName": "SBI Current", "ifscCode": "sbin0001234" }))
        .await;
    assert_eq!(res.status_code(), 201);
    let account = res.json::<Value>()["account"]["id"].as_str().unwrap().to_string();

    let res = server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({
            "customerName": "Amit",
            "totalAmount": 3000,
            "paymentMode": "SPLIT",
            "payments": [
                { "mode": "CASH", "amount": 1000 },
                { "mode": "ONLINE", "amount": 1500, "bankAccountId": account, "payerName": "Amit" }
            ]
        }))
        .await;
    assert_eq!(res.status_code(), 201);
    let txn = res.json::<Value>()["transaction"].clone();
    assert_eq!(txn["paidAmount"], json!(2500.0));
    assert_eq!(txn["dueAmount"], json!(500.0));
    assert_eq!(txn["paymentMode"], "SPLIT");

    let id = txn["id"].as_str().unwrap();
    let res = server
        .patch(&format!("/api/transactions/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "payments": [{ "mode": "CASH", "amount": 600 }] }))
        .await;
    assert_eq!(res.status_code(), 400);
    assert_eq!(res.json::<Value>()["error"], "Total exceeds remaining due (500)");

    let res = server
        .patch(&format!("/api/transactions/{id}"))
        .authorization_bearer(&token)
        .json(&json!({ "payments": [{ "mode": "CASH", "amount": 500 }] }))
        .await;
    assert_eq!(res.status_code(), 200);
    assert_eq!(res.json::<Value>()["transaction"]["dueAmount"], json!(0.0));
    assert_eq!(customers(&server, &token).await[0]["totalDue"], json!(0.0));

    let res = server
        .get("/api/reports/summary")
        .authorization_bearer(&token)
        .await;
    let summary = res.json::<Value>()["summary"].clone();
    assert_eq!(summary["totalSales"], json!(3000.0));
    assert_eq!(summary["totalCash"], json!(1500.0));
    assert_eq!(summary["totalOnline"], json!(1500.0));

    let res = server
        .get("/api/reports/export")
        .authorization_bearer(&token)
        .await;
    let csv = res.text();
    assert!(csv.starts_with("Date,Type,Customer,Amount,Paid,Due,Payment Mode"));
    assert!(csv.contains("SALE,Amit,3000,3000,0,SPLIT"));
}

#[tokio::test]
async fn online_payment_without_account_is_rejected() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({ "totalAmount": 100, "paidAmount": 100, "paymentMode": "ONLINE" }))
        .await;

    assert_eq!(res.status_code(), 400);
    assert_eq!(
        res.json::<Value>()["error"],
        "Please select a bank account for online payments"
    );
}

#[tokio::test]
async fn customer_payment_reduces_due() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({ "customerName": "Raju", "totalAmount": 1000 }))
        .await;
    let raju = customers(&server, &token).await[0]["id"].as_str().unwrap().to_string();

    let res = server
        .post("/api/transactions")
        .authorization_bearer(&token)
        .json(&json!({ "type": "PAYMENT", "customerId": raju, "paidAmount": 400 }))
        .await;
    assert_eq!(res.status_code(), 201);
    assert_eq!(customers(&server, &token).await[0]["totalDue"], json!(600.0));

    let res = server
        .get(&format!("/api/customers/{raju}/transactions"))
        .authorization_bearer(&token)
        .await;
    assert_eq!(res.json::<Value>()["transactions"].as_array().unwrap().len(), 2);

    let res = server
        .get("/api/transactions")
        .add_query_param("type", "PAYMENT")
        .authorization_bearer(&token)
        .await;
    assert_eq!(res.json::<Value>()["transactions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn settings_are_owner_only_and_keep_blank_fields() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .put("/api/settings")
        .authorization_bearer(&token)
        .json(&json!({ "shopName": "Kisan Khaad Bhandar", "address": "" }))
        .await;
    assert_eq!(res.status_code(), 200);

    let res = server.get("/api/settings").authorization_bearer(&token).await;
    let body = res.json::<Value>();
    assert_eq!(body["shopConfig"]["shopName"], "Kisan Khaad Bhandar");
    assert_eq!(body["role"], "OWNER");
}

#[tokio::test]
async fn dealer_ids_are_unique_per_shop() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/customers")
        .authorization_bearer(&token)
        .json(&json!({ "name": "Raju", "dealerId": "D-101" }))
        .await;
    assert_eq!(res.status_code(), 201);

    let res = server
        .post("/api/customers")
        .authorization_bearer(&token)
        .json(&json!({ "name": "Shyam", "dealerId": "d-101" }))
        .await;
    assert_eq!(res.status_code(), 400);
}

#[tokio::test]
async fn voice_commands_resolve_against_the_catalog() {
    let answer = r#"```json
    {
        "type": "SALE",
        "customerName": "raju",
        "items": [
            { "itemName": "urea", "company": "IPL", "qty": 10, "rate": 999 },
            { "itemName": "tractor", "qty": 1 }
        ],
        "paidAmount": 0,
        "paymentMode": "CASH"
    }
    ```"#;
    let server = server_with(Some(answer), Outbox::default());
    let token = signup_and_login(&server, "owner@example.com").await;
    let urea = add_product(&server, &token, "Urea", "IPL", 100.0, 266.5).await;
    server
        .post("/api/customers")
        .authorization_bearer(&token)
        .json(&json!({ "name": "Raju" }))
        .await;

    let res = server
        .post("/api/ai/process-voice")
        .authorization_bearer(&token)
        .json(&json!({ "voiceText": "raju ko das bori urea udhaar" }))
        .await;
    assert_eq!(res.status_code(), 200);

    let data = res.json::<Value>()["data"].clone();
    assert_eq!(data["customerName"], "Raju");
    assert_eq!(data["isCustomerKnown"], true);
    assert_eq!(data["items"][0]["productId"], urea["id"]);
    assert_eq!(data["items"][0]["amount"], json!(2665.0));
    assert_eq!(data["unmatchedItems"], json!(["tractor"]));
    assert_eq!(data["totalAmount"], json!(2665.0));

    let res = server
        .post("/api/ai/process-voice")
        .authorization_bearer(&token)
        .json(&json!({ "voiceText": "   " }))
        .await;
    assert_eq!(res.status_code(), 400);
    assert_eq!(res.json::<Value>()["error"], "No voice text provided");
}

#[tokio::test]
async fn voice_without_assistant_is_unavailable() {
    let server = server();
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/ai/process-voice")
        .authorization_bearer(&token)
        .json(&json!({ "voiceText": "raju ko urea" }))
        .await;

    assert_eq!(res.status_code(), 503);
}

#[tokio::test]
async fn garbage_from_the_assistant_is_a_bad_gateway() {
    let server = server_with(Some("I could not understand that."), Outbox::default());
    let token = signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/ai/process-voice")
        .authorization_bearer(&token)
        .json(&json!({ "voiceText": "raju ko urea" }))
        .await;

    assert_eq!(res.status_code(), 502);
    assert_eq!(
        res.json::<Value>()["error"],
        "Failed to process voice command: Invalid JSON response from AI"
    );
}

#[tokio::test]
async fn password_reset_uses_the_mailed_otp() {
    let outbox = Outbox::default();
    let server = server_with(None, outbox.clone());
    signup_and_login(&server, "owner@example.com").await;

    let res = server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "nobody@example.com" }))
        .await;
    assert_eq!(res.status_code(), 404);

    let res = server
        .post("/api/auth/forgot-password")
        .json(&json!({ "email": "owner@example.com" }))
        .await;
    assert_eq!(res.status_code(), 200);
    let reset_token = res.json::<Value>()["resetToken"].as_str().unwrap().to_string();

    let otp = {
        let mails = outbox.0.lock();
        let mail = mails.last().unwrap();
        assert_eq!(mail.subject, "Password Reset OTP - Smart Khaad Manager");
        mail.html
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 6)
            .unwrap()
            .to_string()
    };

    let wrong = if otp == "000000" { "111111" } else { "000000" };
    let res = server
        .post("/api/auth/reset-password")
        .json(&json!({ "resetToken": reset_token, "otp": wrong, "newPassword": "naya@123" }))
        .await;
    assert_eq!(res.status_code(), 400);
    assert_eq!(res.json::<Value>()["error"], "Invalid OTP");

    let res = server
        .post("/api/auth/reset-password")
        .json(&json!({ "resetToken": reset_token, "otp": otp, "newPassword": "naya@123" }))
        .await;
    assert_eq!(res.status_code(), 200);

    let res = server
        .post("/api/auth/login")
        .json(&json!({ "email": "owner@example.com", "password": "naya@123" }))
        .await;
    assert_eq!(res.status_code(), 200);

    let res = server
        .post("/api/auth/reset-password")
        .json(&json!({ "resetToken": reset_token, "otp": otp, "newPassword": "again@123" }))
        .await;
    assert_eq!(res.status_code(), 400);
}
