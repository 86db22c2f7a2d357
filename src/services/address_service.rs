use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    dto::addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
    entity::{
        addresses::{
            ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses,
            Model as AddressModel,
        },
        orders::{Column as OrderCol, Entity as Orders},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Address,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn list_addresses(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AddressList>> {
    let items = Addresses::find()
        .filter(AddressCol::UserId.eq(user.user_id))
        .order_by_desc(AddressCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(address_from_entity)
        .collect();

    Ok(ApiResponse::success("OK", AddressList { items }, None))
}

pub async fn create_address(
    state: &AppState,
    user: &AuthUser,
    payload: CreateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        recipient: Set(payload.recipient),
        line1: Set(payload.line1),
        line2: Set(payload.line2),
        city: Set(payload.city),
        region: Set(payload.region),
        postal_code: Set(payload.postal_code),
        country: Set(payload.country),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Address created",
        address_from_entity(address),
        Some(Meta::empty()),
    ))
}

pub async fn update_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let existing = Addresses::find_by_id(id)
        .filter(AddressCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: AddressActive = existing.into();
    if let Some(recipient) = payload.recipient {
        active.recipient = Set(recipient);
    }
    if let Some(line1) = payload.line1 {
        active.line1 = Set(line1);
    }
    if let Some(line2) = payload.line2 {
        active.line2 = Set(Some(line2));
    }
    if let Some(city) = payload.city {
        active.city = Set(city);
    }
    if let Some(region) = payload.region {
        active.region = Set(region);
    }
    if let Some(postal_code) = payload.postal_code {
        active.postal_code = Set(postal_code);
    }
    if let Some(country) = payload.country {
        active.country = Set(country);
    }
    let address = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Address updated",
        address_from_entity(address),
        Some(Meta::empty()),
    ))
}

/// Delete an address unless an order still references it, mirroring the
/// RESTRICT foreign keys on the orders table. The check applies regardless
/// of order status.
pub async fn delete_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;

    let existing = Addresses::find_by_id(id)
        .filter(AddressCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let referenced = Orders::find()
        .filter(
            Condition::any()
                .add(OrderCol::ShippingAddressId.eq(existing.id))
                .add(OrderCol::BillingAddressId.eq(existing.id)),
        )
        .count(&txn)
        .await?;
    if referenced > 0 {
        return Err(AppError::BadRequest(
            "Address is referenced by existing orders".into(),
        ));
    }

    Addresses::delete_by_id(existing.id).exec(&txn).await?;
    txn.commit().await?;

    Ok(ApiResponse::success(
        "Address deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn address_from_entity(model: AddressModel) -> Address {
    Address {
        id: model.id,
        user_id: model.user_id,
        recipient: model.recipient,
        line1: model.line1,
        line2: model.line2,
        city: model.city,
        region: model.region,
        postal_code: model.postal_code,
        country: model.country,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
