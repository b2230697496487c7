use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::IntoResponse,
};
use chrono::{TimeDelta, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{Session, hash_password, issue_token, verify_password},
    billing::{self, ListParams, PaymentUpdate},
    error::{AppError, AppResult},
    invoice,
    ledger::TransactionDraft,
    mailer::Mail,
    models::{
        BankAccount, Customer, DEFAULT_LOW_STOCK_THRESHOLD, DEFAULT_UNIT, Product, ResetTicket,
        Role, ShopConfig, TxnType, User,
    },
    reports,
    resolve::resolve,
    state::State as AppState,
    store::{StoreError, TxnQuery},
    utils::{normalize_email, start_of_today},
    voice::VoiceError,
};

type Shared = State<Arc<AppState>>;

const MIN_PASSWORD_LEN: usize = 6;

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    name: String,
    email: String,
    password: String,
    #[serde(default)]
    mobile: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
pub struct ForgotRequest {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    reset_token: String,
    otp: String,
    new_password: String,
}

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    Ok(())
}

/// New account with a fresh password hash. Duplicate emails surface as `taken`.
async fn create_account(
    state: &AppState,
    request: SignupRequest,
    role: Role,
    owner_id: Option<Uuid>,
    taken: &str,
) -> AppResult<User> {
    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);

    if name.is_empty() || email.is_empty() {
        return Err(AppError::BadRequest("Name and email are required".into()));
    }
    check_password(&request.password)?;

    if state.store.user_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest(taken.to_string()));
    }

    let user = User {
        id: Uuid::new_v4(),
        name,
        email,
        password_hash: hash_password(&request.password)?,
        mobile: request.mobile.trim().to_string(),
        role,
        shop_config: ShopConfig::default(),
        owner_id,
        created_at: Utc::now(),
    };

    match state.store.insert_user(&user).await {
        Ok(()) => Ok(user),
        Err(StoreError::Conflict(_)) => Err(AppError::BadRequest(taken.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn signup_handler(
    State(state): Shared,
    Json(request): Json<SignupRequest>,
) -> AppResult<impl IntoResponse> {
    let user = create_account(&state, request, Role::Owner, None, "User already exists").await?;
    info!("New shop owner {} ({})", user.id, user.email);

    if let Err(e) = state.mailer.send(Mail::welcome(&user.email, &user.name)).await {
        warn!("Welcome mail to {} failed: {e}", user.email);
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "User created successfully", "user": user.profile() })),
    ))
}

pub async fn login_handler(
    State(state): Shared,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    let user = state
        .store
        .user_by_email(&normalize_email(&request.email))
        .await?
        .filter(|u| verify_password(&request.password, &u.password_hash))
        .ok_or(AppError::Unauthorized)?;

    let token = issue_token(&user, &state.config.jwt_secret, state.config.token_ttl)?;
    info!("User {} logged in", user.id);

    Ok(Json(json!({ "success": true, "token": token, "user": user.profile() })))
}

pub async fn me_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let user = state
        .store
        .user(session.user_id)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;

    Ok(Json(json!({ "success": true, "user": user.profile() })))
}

pub async fn forgot_password_handler(
    State(state): Shared,
    Json(request): Json<ForgotRequest>,
) -> AppResult<Json<Value>> {
    let user = state
        .store
        .user_by_email(&normalize_email(&request.email))
        .await?
        .ok_or(AppError::NotFound("No user found with this email"))?;

    let otp = format!("{:06}", rand::rng().random_range(0..1_000_000u32));
    let ttl = state.config.reset_ttl;
    let ticket = ResetTicket {
        token: Uuid::new_v4().to_string(),
        user_id: user.id,
        otp: otp.clone(),
        expires_at: Utc::now() + TimeDelta::seconds(ttl.as_secs() as i64),
    };

    state.store.put_reset(&ticket, ttl).await?;
    state
        .mailer
        .send(Mail::otp(&user.email, &otp, ttl.as_secs() / 60))
        .await?;

    info!("Password reset requested for {}", user.id);
    Ok(Json(json!({
        "success": true,
        "message": "OTP sent to your email",
        "resetToken": ticket.token,
    })))
}

pub async fn reset_password_handler(
    State(state): Shared,
    Json(request): Json<ResetRequest>,
) -> AppResult<Json<Value>> {
    let ticket = state
        .store
        .reset(request.reset_token.trim())
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".into()))?;

    if ticket.otp != request.otp.trim() {
        return Err(AppError::BadRequest("Invalid OTP".into()));
    }
    check_password(&request.new_password)?;

    let mut user = state
        .store
        .user(ticket.user_id)
        .await?
        .ok_or(AppError::NotFound("User not found"))?;
    user.password_hash = hash_password(&request.new_password)?;

    state.store.save_user(&user).await?;
    state.store.delete_reset(&ticket.token).await?;

    info!("Password reset for {}", user.id);
    Ok(Json(json!({ "success": true, "message": "Password reset successfully" })))
}

async fn shop_owner(state: &AppState, session: &Session) -> AppResult<User> {
    state
        .store
        .user(session.owner_id)
        .await?
        .ok_or(AppError::NotFound("User not found"))
}

pub async fn settings_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let owner = shop_owner(&state, &session).await?;
    let caller = match session.role {
        Role::Owner => owner.clone(),
        Role::Staff => state
            .store
            .user(session.user_id)
            .await?
            .ok_or(AppError::NotFound("User not found"))?,
    };

    Ok(Json(json!({
        "success": true,
        "shopConfig": owner.shop_config,
        "name": caller.name,
        "email": caller.email,
        "role": caller.role,
    })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    shop_name: Option<String>,
    address: Option<String>,
    logo_url: Option<String>,
    gst_number: Option<String>,
}

fn overwrite(field: &mut String, value: Option<String>) {
    if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        *field = value;
    }
}

pub async fn update_settings_handler(
    State(state): Shared,
    session: Session,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<Value>> {
    session.require_owner("Only owner can update settings")?;

    let mut owner = shop_owner(&state, &session).await?;
    overwrite(&mut owner.shop_config.shop_name, update.shop_name);
    overwrite(&mut owner.shop_config.address, update.address);
    overwrite(&mut owner.shop_config.logo_url, update.logo_url);
    overwrite(&mut owner.shop_config.gst_number, update.gst_number);

    state.store.save_user(&owner).await?;
    info!("Updated shop settings for {}", owner.id);

    Ok(Json(json!({
        "success": true,
        "message": "Settings updated successfully",
        "shopConfig": owner.shop_config,
    })))
}

pub async fn staff_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    session.require_owner("Only owner can view staff")?;

    let staff: Vec<_> = state
        .store
        .staff(session.owner_id)
        .await?
        .iter()
        .map(User::profile)
        .collect();

    Ok(Json(json!({ "success": true, "staff": staff })))
}

pub async fn create_staff_handler(
    State(state): Shared,
    session: Session,
    Json(request): Json<SignupRequest>,
) -> AppResult<impl IntoResponse> {
    session.require_owner("Only owner can create staff")?;

    let user = create_account(
        &state,
        request,
        Role::Staff,
        Some(session.owner_id),
        "Email already exists",
    )
    .await?;
    info!("Shop {} added staff {}", session.owner_id, user.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user.profile() })),
    ))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    item_name: Option<String>,
    company: Option<String>,
    qty: Option<Decimal>,
    rate: Option<Decimal>,
    unit: Option<String>,
    low_stock_threshold: Option<Decimal>,
}

impl ProductInput {
    fn check(&self) -> AppResult<()> {
        let negative = [
            ("Quantity", self.qty),
            ("Rate", self.rate),
            ("Low stock threshold", self.low_stock_threshold),
        ]
        .into_iter()
        .find(|(_, v)| v.is_some_and(|v| v < Decimal::ZERO));

        match negative {
            Some((what, _)) => Err(AppError::BadRequest(format!("{what} cannot be negative"))),
            None => Ok(()),
        }
    }
}

pub async fn products_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let mut products = state.store.products(session.owner_id).await?;
    products.sort_by_cached_key(|p| (p.item_name.to_lowercase(), p.company.to_lowercase()));

    Ok(Json(json!({ "success": true, "products": products })))
}

pub async fn create_product_handler(
    State(state): Shared,
    session: Session,
    Json(input): Json<ProductInput>,
) -> AppResult<impl IntoResponse> {
    input.check()?;

    let item_name = input.item_name.as_deref().map(str::trim).unwrap_or_default();
    if item_name.is_empty() {
        return Err(AppError::BadRequest("Item name is required".into()));
    }

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        owner_id: session.owner_id,
        item_name: item_name.to_string(),
        company: input.company.as_deref().map(str::trim).unwrap_or_default().to_string(),
        qty: input.qty.unwrap_or_default(),
        rate: input.rate.unwrap_or_default(),
        unit: input
            .unit
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
        low_stock_threshold: input
            .low_stock_threshold
            .unwrap_or(Decimal::from(DEFAULT_LOW_STOCK_THRESHOLD)),
        created_at: now,
        updated_at: now,
    };

    state.store.put_product(&product).await?;
    info!("Shop {} added product {} ({})", session.owner_id, product.id, product.display_name());

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "product": product })),
    ))
}

pub async fn update_product_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> AppResult<Json<Value>> {
    input.check()?;

    let mut product = state
        .store
        .product(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Product not found"))?;

    overwrite(&mut product.item_name, input.item_name);
    overwrite(&mut product.unit, input.unit);
    if let Some(company) = input.company {
        product.company = company.trim().to_string();
    }
    product.rate = input.rate.unwrap_or(product.rate);
    product.low_stock_threshold = input.low_stock_threshold.unwrap_or(product.low_stock_threshold);
    product.updated_at = Utc::now();

    state.store.update_product(&product, input.qty).await?;
    info!("Shop {} updated product {id}", session.owner_id);

    let product = state
        .store
        .product(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Product not found"))?;

    Ok(Json(json!({ "success": true, "product": product })))
}

pub async fn delete_product_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    session.require_owner("Only owner can delete products")?;

    if !state.store.delete_product(session.owner_id, id).await? {
        return Err(AppError::NotFound("Product not found"));
    }
    info!("Shop {} deleted product {id}", session.owner_id);

    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    name: Option<String>,
    mobile: Option<String>,
    address: Option<String>,
    gst_number: Option<String>,
    dealer_id: Option<String>,
}

async fn check_dealer_id(
    state: &AppState,
    owner: Uuid,
    dealer_id: &str,
    except: Option<Uuid>,
) -> AppResult<()> {
    if dealer_id.is_empty() {
        return Ok(());
    }

    let taken = state
        .store
        .customers(owner)
        .await?
        .iter()
        .any(|c| c.dealer_id.eq_ignore_ascii_case(dealer_id) && Some(c.id) != except);

    if taken {
        return Err(AppError::BadRequest(format!(
            "Dealer ID {dealer_id} is already used by another customer"
        )));
    }

    Ok(())
}

pub async fn customers_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let mut customers = state.store.customers(session.owner_id).await?;
    customers.sort_by_cached_key(|c| c.name.to_lowercase());

    Ok(Json(json!({ "success": true, "customers": customers })))
}

pub async fn create_customer_handler(
    State(state): Shared,
    session: Session,
    Json(input): Json<CustomerInput>,
) -> AppResult<impl IntoResponse> {
    let name = input.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::BadRequest("Customer name is required".into()));
    }

    let trimmed = |v: Option<String>| v.map(|v| v.trim().to_string()).unwrap_or_default();
    let dealer_id = trimmed(input.dealer_id);
    check_dealer_id(&state, session.owner_id, &dealer_id, None).await?;

    let now = Utc::now();
    let customer = Customer {
        id: Uuid::new_v4(),
        owner_id: session.owner_id,
        name: name.to_string(),
        mobile: trimmed(input.mobile),
        address: trimmed(input.address),
        gst_number: trimmed(input.gst_number),
        dealer_id,
        total_due: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    };

    state.store.insert_customer(&customer).await?;
    info!("Shop {} added customer {} ({})", session.owner_id, customer.id, customer.name);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "customer": customer })),
    ))
}

pub async fn update_customer_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
    Json(input): Json<CustomerInput>,
) -> AppResult<Json<Value>> {
    let mut customer = state
        .store
        .customer(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Customer not found"))?;

    overwrite(&mut customer.name, input.name);
    let set = |field: &mut String, value: Option<String>| {
        if let Some(value) = value {
            *field = value.trim().to_string();
        }
    };
    set(&mut customer.mobile, input.mobile);
    set(&mut customer.address, input.address);
    set(&mut customer.gst_number, input.gst_number);
    set(&mut customer.dealer_id, input.dealer_id);
    customer.updated_at = Utc::now();

    check_dealer_id(&state, session.owner_id, &customer.dealer_id, Some(id)).await?;
    state.store.update_customer(&customer).await?;
    info!("Shop {} updated customer {id}", session.owner_id);

    let customer = state
        .store
        .customer(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Customer not found"))?;

    Ok(Json(json!({ "success": true, "customer": customer })))
}

pub async fn customer_transactions_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let transactions = billing::customer_transactions(state.store.as_ref(), &session, id).await?;

    Ok(Json(json!({ "success": true, "transactions": transactions })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccountInput {
    account_name: String,
    #[serde(default)]
    account_number: String,
    #[serde(default)]
    ifsc_code: String,
    #[serde(default)]
    upi_id: String,
    #[serde(default)]
    opening_balance: Decimal,
}

pub async fn bank_accounts_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let mut accounts = state.store.bank_accounts(session.owner_id).await?;
    accounts.sort_by_cached_key(|a| a.account_name.to_lowercase());

    Ok(Json(json!({ "success": true, "accounts": accounts })))
}

pub async fn create_bank_account_handler(
    State(state): Shared,
    session: Session,
    Json(input): Json<BankAccountInput>,
) -> AppResult<impl IntoResponse> {
    let account_name = input.account_name.trim();
    if account_name.is_empty() {
        return Err(AppError::BadRequest("Account name is required".into()));
    }

    let account = BankAccount {
        id: Uuid::new_v4(),
        owner_id: session.owner_id,
        account_name: account_name.to_string(),
        account_number: input.account_number.trim().to_string(),
        ifsc_code: input.ifsc_code.trim().to_uppercase(),
        upi_id: input.upi_id.trim().to_string(),
        opening_balance: input.opening_balance,
        created_at: Utc::now(),
    };

    state.store.insert_bank_account(&account).await?;
    info!("Shop {} added bank account {}", session.owner_id, account.id);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "account": account })),
    ))
}

pub async fn create_transaction_handler(
    State(state): Shared,
    session: Session,
    Json(draft): Json<TransactionDraft>,
) -> AppResult<impl IntoResponse> {
    let transaction = billing::create_transaction(state.store.as_ref(), &session, draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "transaction": transaction })),
    ))
}

pub async fn transactions_handler(
    State(state): Shared,
    session: Session,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Value>> {
    let transactions = billing::list_transactions(state.store.as_ref(), &session, &params).await?;

    Ok(Json(json!({ "success": true, "transactions": transactions })))
}

pub async fn transaction_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let transaction = state
        .store
        .transaction(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Transaction not found"))?;

    Ok(Json(json!({ "success": true, "transaction": transaction })))
}

pub async fn add_payments_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
    Json(update): Json<PaymentUpdate>,
) -> AppResult<Json<Value>> {
    let transaction = billing::add_payments(state.store.as_ref(), &session, id, update).await?;

    Ok(Json(json!({ "success": true, "transaction": transaction })))
}

pub async fn delete_transaction_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    billing::delete_transaction(state.store.as_ref(), &session, id).await?;

    Ok(Json(json!({ "success": true, "message": "Transaction deleted and stock reversed" })))
}

pub async fn invoice_handler(
    State(state): Shared,
    session: Session,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let transaction = state
        .store
        .transaction(session.owner_id, id)
        .await?
        .ok_or(AppError::NotFound("Transaction not found"))?;
    let owner = shop_owner(&state, &session).await?;

    Ok((
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        invoice::render(&owner.shop_config, &transaction),
    ))
}

pub async fn dashboard_stats_handler(
    State(state): Shared,
    session: Session,
) -> AppResult<Json<Value>> {
    let owner = session.owner_id;
    let today = TxnQuery {
        from: Some(start_of_today()),
        txn_type: Some(TxnType::Sale),
        ..Default::default()
    };

    let stats = reports::dashboard_stats(
        &state.store.transactions(owner, &today).await?,
        &state.store.customers(owner).await?,
        &state.store.products(owner).await?,
    );

    Ok(Json(json!({ "success": true, "stats": stats })))
}

pub async fn dues_handler(State(state): Shared, session: Session) -> AppResult<Json<Value>> {
    let customers = reports::dues(state.store.customers(session.owner_id).await?);

    Ok(Json(json!({ "success": true, "customers": customers })))
}

/// Reports cover every type over the whole range; `type` and `limit` are ignored.
fn report_query(params: &ListParams) -> TxnQuery {
    TxnQuery {
        txn_type: None,
        limit: None,
        ..params.to_query()
    }
}

pub async fn summary_handler(
    State(state): Shared,
    session: Session,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Value>> {
    let transactions = state
        .store
        .transactions(session.owner_id, &report_query(&params))
        .await?;

    Ok(Json(json!({ "success": true, "summary": reports::day_book(&transactions) })))
}

pub async fn export_handler(
    State(state): Shared,
    session: Session,
    Query(params): Query<ListParams>,
) -> AppResult<impl IntoResponse> {
    let transactions = state
        .store
        .transactions(session.owner_id, &report_query(&params))
        .await?;
    let body = reports::export_csv(&transactions)
        .map_err(|e| AppError::Internal(format!("csv export failed: {e}")))?;

    let filename = format!("attachment; filename=\"report-{}.csv\"", Utc::now().format("%Y-%m-%d"));

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (CONTENT_DISPOSITION, filename),
        ],
        body,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRequest {
    #[serde(default)]
    voice_text: String,
}

pub async fn process_voice_handler(
    State(state): Shared,
    session: Session,
    Json(request): Json<VoiceRequest>,
) -> AppResult<Json<Value>> {
    let voice_text = request.voice_text.trim();
    if voice_text.is_empty() {
        return Err(AppError::BadRequest("No voice text provided".into()));
    }

    let assistant = state.assistant.as_ref().ok_or(VoiceError::NotConfigured)?;

    let products = state.store.products(session.owner_id).await?;
    let customers = state.store.customers(session.owner_id).await?;

    let draft = assistant.extract(voice_text, &products, &customers).await?;
    let resolved = resolve(draft.clone(), &products, &customers);

    info!(
        "Voice bill for shop {}: {} item(s) matched, {} unmatched",
        session.owner_id,
        resolved.items.len(),
        resolved.unmatched_items.len()
    );

    Ok(Json(json!({ "success": true, "data": resolved, "heard": draft })))
}
