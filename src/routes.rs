use std::sync::Arc;

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use bson::oid::ObjectId;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{check_authorization_level, AuthorizationLevel, Identity};
use crate::balance::compute_balance_from_group;
use crate::events::{LedgerEvent, LedgerEvents};
use crate::invite::{issue_invite, verify_invite};
use crate::ledger::summarize_group;
use crate::schemas::{Amount, Group, GroupMember, MemberKey, Receipt, Role};
use crate::settlement::Threshold;
use crate::store::{LedgerStore, StoreError};

pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub events: LedgerEvents,
    pub auth_secret: String,
    pub service_token: Option<String>,
    pub threshold: Threshold,
    pub invite_ttl: Duration,
}

impl AppState {
    fn authorize(&self, request: &HttpRequest) -> Result<AuthorizationLevel, HttpResponse> {
        check_authorization_level(request, &self.auth_secret, self.service_token.as_deref())
            .map_err(|err| {
                tracing::debug!(%err, "rejected request");
                HttpResponse::Unauthorized().body(err.to_string())
            })
    }

    fn authorize_member(&self, request: &HttpRequest) -> Result<Identity, HttpResponse> {
        match self.authorize(request)? {
            AuthorizationLevel::Member(identity) => Ok(identity),
            AuthorizationLevel::Service => {
                Err(HttpResponse::Forbidden().body("This action needs a signed-in user"))
            }
        }
    }

    /// Loads a group the caller is allowed to see.
    async fn visible_group(
        &self,
        level: &AuthorizationLevel,
        id: &str,
    ) -> Result<Group, HttpResponse> {
        let group = match self.store.find_group(id).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                return Err(HttpResponse::NotFound().body("Couldn't find the desired group"))
            }
            Err(err) => return Err(internal_error(err)),
        };
        match level {
            AuthorizationLevel::Service => Ok(group),
            AuthorizationLevel::Member(identity) if group.has_member(&identity.email) => Ok(group),
            AuthorizationLevel::Member(_) => {
                Err(HttpResponse::Forbidden().body("You are not a member of this group"))
            }
        }
    }
}

fn internal_error(err: StoreError) -> HttpResponse {
    tracing::error!(%err, "store request failed");
    HttpResponse::InternalServerError().body(err.to_string())
}

macro_rules! try_response {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

#[derive(Deserialize, Serialize)]
pub struct NewGroupJson {
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[put("/groups/{id}")]
async fn add_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewGroupJson>,
) -> HttpResponse {
    let identity = try_response!(state.authorize_member(&request));
    let json = json.into_inner();
    let group = Group {
        id: id.into_inner(),
        name: json.name,
        emoji: json.emoji,
        created_by: identity.email.clone(),
        members: vec![GroupMember::Detailed {
            email: identity.email,
            role: Role::Admin,
        }],
    };
    let group_id = group.id.clone();
    match state.store.insert_group(group).await {
        Ok(()) => {
            tracing::info!(%group_id, "group created");
            state.events.publish(LedgerEvent::GroupCreated { group_id });
            HttpResponse::Ok().body("Group added")
        }
        Err(StoreError::DuplicateGroup(id)) => {
            HttpResponse::Conflict().body(format!("Group {id} already exists"))
        }
        Err(err) => internal_error(err),
    }
}

#[get("/groups/{id}")]
async fn get_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let group = try_response!(state.visible_group(&level, &id).await);
    HttpResponse::Ok().json(group)
}

#[derive(Deserialize, Serialize)]
pub struct InviteJson {
    pub token: String,
}

#[post("/groups/{id}/invites")]
async fn create_invite(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let identity = try_response!(state.authorize_member(&request));
    let group = try_response!(
        state
            .visible_group(&AuthorizationLevel::Member(identity), &id)
            .await
    );
    match issue_invite(&group.id, &state.auth_secret, Utc::now(), state.invite_ttl) {
        Ok(token) => HttpResponse::Ok().json(InviteJson { token }),
        Err(err) => {
            tracing::error!(group_id = %group.id, %err, "could not issue invite");
            HttpResponse::InternalServerError().body(err.to_string())
        }
    }
}

#[post("/groups/{id}/members")]
async fn join_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<InviteJson>,
) -> HttpResponse {
    let identity = try_response!(state.authorize_member(&request));
    if !identity.email_verified {
        return HttpResponse::Forbidden().body("Verify your email before joining a group");
    }
    let group_id = id.into_inner();
    if let Err(err) = verify_invite(&json.token, &group_id, &state.auth_secret, Utc::now()) {
        return HttpResponse::BadRequest().body(err.to_string());
    }
    let member = GroupMember::Detailed {
        email: identity.email.clone(),
        role: Role::Member,
    };
    match state.store.add_member(&group_id, member).await {
        Ok(true) => {
            tracing::info!(%group_id, email = %identity.email, "member joined");
            state
                .events
                .publish(LedgerEvent::MembershipChanged { group_id });
            HttpResponse::Ok().body("Joined group")
        }
        Ok(false) => HttpResponse::NotFound().body("Couldn't find the desired group"),
        Err(err) => internal_error(err),
    }
}

#[delete("/groups/{id}/members/{email}")]
async fn remove_member(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(String, MemberKey)>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let (group_id, email) = path.into_inner();
    let group = try_response!(state.visible_group(&level, &group_id).await);
    if let AuthorizationLevel::Member(identity) = &level {
        if !group.is_admin(&identity.email) {
            return HttpResponse::Forbidden().body("Only admins can remove members");
        }
    }
    if group.created_by == email {
        return HttpResponse::Conflict().body("The group creator cannot be removed");
    }
    if !group.has_member(&email) {
        return HttpResponse::NotFound().body("No such member in this group");
    }
    match state.store.remove_member(&group_id, &email).await {
        Ok(true) => {
            tracing::info!(%group_id, %email, "member removed");
            state
                .events
                .publish(LedgerEvent::MembershipChanged { group_id });
            HttpResponse::Ok().body("Member removed")
        }
        Ok(false) => HttpResponse::NotFound().body("Couldn't find the desired group"),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReceiptJson {
    #[serde(alias = "total")]
    pub amount: Amount,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_by: Option<MemberKey>,
    #[serde(default)]
    pub split_with: Vec<MemberKey>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub date: Option<chrono::NaiveDate>,
    /// Only honoured for service callers.
    #[serde(default)]
    pub uploaded_by: Option<MemberKey>,
}

#[post("/groups/{id}/receipts")]
async fn add_receipt(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewReceiptJson>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let group = try_response!(state.visible_group(&level, &id).await);
    let json = json.into_inner();
    let uploaded_by = match level {
        AuthorizationLevel::Member(identity) => Some(identity.email),
        AuthorizationLevel::Service => json.uploaded_by,
    };
    let receipt_id = ObjectId::new().to_hex();
    let receipt = Receipt {
        id: Some(receipt_id.clone()),
        group_id: Some(group.id.clone()),
        amount: Some(json.amount),
        currency: json.currency,
        paid_by: json.paid_by.or_else(|| uploaded_by.clone()),
        split_with: Some(json.split_with),
        category: json.category,
        merchant: json.merchant,
        date: json.date,
        created_at: Some(Utc::now()),
        uploaded_by,
    };
    match state.store.insert_receipt(receipt.clone()).await {
        Ok(()) => {
            tracing::info!(group_id = %group.id, %receipt_id, "receipt added");
            state.events.publish(LedgerEvent::ReceiptAdded {
                group_id: group.id,
                receipt_id,
            });
            HttpResponse::Ok().json(receipt)
        }
        Err(err) => internal_error(err),
    }
}

#[get("/groups/{id}/receipts")]
async fn list_receipts(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let group = try_response!(state.visible_group(&level, &id).await);
    match state.store.receipts_for_group(&group.id).await {
        Ok(receipts) => HttpResponse::Ok().json(receipts),
        Err(err) => internal_error(err),
    }
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let group = try_response!(state.visible_group(&level, &id).await);
    match state.store.receipts_for_group(&group.id).await {
        Ok(receipts) => HttpResponse::Ok().json(compute_balance_from_group(&group, &receipts)),
        Err(err) => internal_error(err),
    }
}

#[get("/groups/{id}/settlement")]
async fn get_settlement(
    state: web::Data<AppState>,
    request: HttpRequest,
    id: web::Path<String>,
) -> HttpResponse {
    let level = try_response!(state.authorize(&request));
    let group = try_response!(state.visible_group(&level, &id).await);
    match state.store.receipts_for_group(&group.id).await {
        Ok(receipts) => {
            HttpResponse::Ok().json(summarize_group(&group, &receipts, state.threshold))
        }
        Err(err) => internal_error(err),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(add_group)
        .service(get_group)
        .service(create_invite)
        .service(join_group)
        .service(remove_member)
        .service(add_receipt)
        .service(list_receipts)
        .service(get_balance)
        .service(get_settlement);
}
