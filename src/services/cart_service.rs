use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddItemRequest, CartItemView, CartView, UpdateQuantityRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::CartItem,
    response::{ApiResponse, Meta},
    services::product_service::product_from_entity,
    state::AppState,
};

/// Per-item quantity ceiling, applied on add and update.
pub const MAX_ITEM_QUANTITY: i32 = 100;

/// Fetch the caller's cart with items; the cart row is created lazily on
/// first access, so repeated calls are idempotent.
pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let cart = get_or_create_cart(&state.orm, user.user_id).await?;

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_desc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(&state.orm)
        .await?;

    let items = rows
        .into_iter()
        .filter_map(|(item, product)| {
            product.map(|p| CartItemView {
                id: item.id,
                product: product_from_entity(p),
                quantity: item.quantity,
            })
        })
        .collect();

    Ok(ApiResponse::success(
        "OK",
        CartView {
            id: cart.id,
            items,
        },
        None,
    ))
}

/// Add a product to the cart. An existing line for the same product has its
/// quantity overwritten with the requested value; a non-positive quantity
/// removes the line instead.
pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddItemRequest,
) -> AppResult<ApiResponse<Option<CartItem>>> {
    let txn = state.orm.begin().await?;

    let cart = get_or_create_cart(&txn, user.user_id).await?;

    let product = Products::find_by_id(payload.product_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Product not found".into()))?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?;

    if payload.quantity <= 0 {
        let item = existing.ok_or_else(|| {
            AppError::BadRequest("Quantity must be greater than 0".to_string())
        })?;
        CartItems::delete_by_id(item.id).exec(&txn).await?;
        txn.commit().await?;

        audit_cart(state, user, "cart_remove", payload.product_id, 0).await;
        return Ok(ApiResponse::success("Removed from cart", None, None));
    }

    validate_quantity(payload.quantity, product.stock)?;

    let item = match existing {
        Some(item) => {
            let mut active: CartItemActive = item.into();
            active.quantity = Set(payload.quantity);
            active.update(&txn).await?
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?
        }
    };

    txn.commit().await?;

    audit_cart(state, user, "cart_add", payload.product_id, payload.quantity).await;

    Ok(ApiResponse::success(
        "OK",
        Some(cart_item_from_entity(item)),
        None,
    ))
}

/// Set the quantity of a cart line. Zero or negative removes it; anything
/// above the product's stock is rejected and the stored quantity stays put.
pub async fn update_item_quantity(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateQuantityRequest,
) -> AppResult<ApiResponse<Option<CartItem>>> {
    let txn = state.orm.begin().await?;

    let cart = find_cart(&txn, user.user_id).await?.ok_or(AppError::NotFound)?;

    let item = CartItems::find_by_id(item_id)
        .filter(CartItemCol::CartId.eq(cart.id))
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if payload.quantity <= 0 {
        let product_id = item.product_id;
        CartItems::delete_by_id(item.id).exec(&txn).await?;
        txn.commit().await?;

        audit_cart(state, user, "cart_remove", product_id, 0).await;
        return Ok(ApiResponse::success("Removed from cart", None, None));
    }

    let product = Products::find_by_id(item.product_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Product not found".into()))?;

    validate_quantity(payload.quantity, product.stock)?;

    let product_id = item.product_id;
    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    let item = active.update(&txn).await?;

    txn.commit().await?;

    audit_cart(state, user, "cart_update", product_id, payload.quantity).await;

    Ok(ApiResponse::success(
        "OK",
        Some(cart_item_from_entity(item)),
        None,
    ))
}

/// Ownership-checked delete; a missing line is reported as 404, not ignored.
pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart = find_cart(&state.orm, user.user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let result = CartItems::delete_many()
        .filter(CartItemCol::Id.eq(item_id))
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Delete every line in the caller's cart. A user without a cart simply has
/// nothing to clear; that is a success, not an error.
pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let cart = match find_cart(&state.orm, user.user_id).await? {
        Some(cart) => cart,
        None => {
            return Ok(ApiResponse::success(
                "Cart already empty",
                serde_json::json!({}),
                Some(Meta::empty()),
            ));
        }
    };

    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&state.orm)
        .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        Some("cart_items"),
        Some(serde_json::json!({ "removed": result.rows_affected })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn find_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<Option<CartModel>> {
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?;
    Ok(cart)
}

async fn get_or_create_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<CartModel> {
    if let Some(cart) = find_cart(conn, user_id).await? {
        return Ok(cart);
    }

    // Two first-touch requests can race on the user_id unique index; the
    // loser's insert is a no-op and the re-select below picks up the winner's
    // row.
    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(Utc::now().into()),
    };
    Carts::insert(cart)
        .on_conflict(
            OnConflict::column(CartCol::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart row missing after insert")))
}

fn validate_quantity(quantity: i32, stock: i32) -> AppResult<()> {
    if quantity > MAX_ITEM_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "Quantity exceeds the per-item limit of {MAX_ITEM_QUANTITY}"
        )));
    }
    if quantity > stock {
        return Err(AppError::BadRequest(format!(
            "Requested quantity exceeds available stock ({stock})"
        )));
    }
    Ok(())
}

async fn audit_cart(state: &AppState, user: &AuthUser, action: &str, product_id: Uuid, qty: i32) {
    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        action,
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id, "quantity": qty })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        product_id: model.product_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
