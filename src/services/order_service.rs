use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{
        AddOrderItemRequest, CreateOrderRequest, OrderList, OrderWithItems, PayOrderRequest,
        UpdateStatusRequest,
    },
    entity::{
        addresses::{Column as AddressCol, Entity as Addresses},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
        products::{Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<Order>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "OK",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Create an empty PENDING order after verifying both addresses belong to
/// the caller. The supplied total is provisional; it is overwritten by
/// recomputation as soon as an item is added.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    verify_address(&txn, user.user_id, payload.shipping_address_id, "Shipping").await?;
    verify_address(&txn, user.user_id, payload.billing_address_id, "Billing").await?;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        shipping_address_id: Set(payload.shipping_address_id),
        billing_address_id: Set(payload.billing_address_id),
        total_amount: Set(payload.total_amount.unwrap_or(0)),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    audit_order(state, user, "order_create", order.id).await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: Vec::new(),
        },
        Some(Meta::empty()),
    ))
}

/// Add a line item to a PENDING order. A line for the same product has its
/// quantity summed and its price snapshot overwritten. Stock is reserved
/// here: the product row is decremented in the same transaction that writes
/// the item and recomputes the order total.
pub async fn add_order_item(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: AddOrderItemRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "Quantity must be greater than 0".into(),
        ));
    }
    if payload.price <= 0 {
        return Err(AppError::BadRequest("Price must be greater than 0".into()));
    }

    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let status = parse_status(&order.status)?;
    if status != OrderStatus::Pending {
        return Err(AppError::BadRequest(
            "Cannot add items to an order already being processed".into(),
        ));
    }

    let product = Products::find_by_id(payload.product_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::BadRequest("Product not found".into()))?;

    if payload.quantity > product.stock {
        return Err(AppError::BadRequest(format!(
            "Requested quantity exceeds available stock ({})",
            product.stock
        )));
    }

    let existing = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .filter(OrderItemCol::ProductId.eq(payload.product_id))
        .one(&txn)
        .await?;

    match existing {
        Some(item) => {
            let summed = item.quantity + payload.quantity;
            let mut active: OrderItemActive = item.into();
            active.quantity = Set(summed);
            active.price = Set(payload.price);
            active.update(&txn).await?;
        }
        None => {
            OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                price: Set(payload.price),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
    }

    // Reserve stock for the requested quantity.
    Products::update_many()
        .col_expr(
            ProdCol::Stock,
            Expr::col(ProdCol::Stock).sub(payload.quantity),
        )
        .filter(ProdCol::Id.eq(payload.product_id))
        .exec(&txn)
        .await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;

    let total: i64 = items
        .iter()
        .map(|item| item.price * item.quantity as i64)
        .sum();

    let mut active: OrderActive = order.into();
    active.total_amount = Set(total);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    audit_order(state, user, "order_item_add", order.id).await;

    Ok(ApiResponse::success(
        "Item added",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

/// Apply a status change, guarded by the fixed transition table.
pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: UpdateStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let from = parse_status(&order.status)?;
    let to = payload.status;
    if !from.can_transition(to) {
        return Err(AppError::BadRequest(format!(
            "Invalid status transition from {from} to {to}"
        )));
    }

    // Cancelling through the status endpoint must also return the stock
    // reserved by the order's items.
    if to == OrderStatus::Cancelled {
        restock_items(&txn, order.id).await?;
    }

    let mut active: OrderActive = order.into();
    active.status = Set(to.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    audit_order(state, user, "order_status_update", order.id).await;

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

/// Cancel a PENDING, unpaid order. The row is kept and flipped to CANCELLED,
/// and the stock reserved by its items is returned to the catalog.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let status = parse_status(&order.status)?;
    if status != OrderStatus::Pending {
        return Err(AppError::BadRequest(
            "Only pending orders can be cancelled".into(),
        ));
    }

    let paid = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .count(&txn)
        .await?;
    if paid > 0 {
        return Err(AppError::BadRequest(
            "Cannot cancel order with existing payment, request a refund".into(),
        ));
    }

    restock_items(&txn, order.id).await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Cancelled.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    txn.commit().await?;

    audit_order(state, user, "order_cancel", order.id).await;

    Ok(ApiResponse::success(
        "Order cancelled",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

/// Record a payment for the order total and move it to PROCESSING. No real
/// payment processing happens here; the row exists so the cancel rule has
/// something to check.
pub async fn pay_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: PayOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::Id.eq(order_id))
                .add(OrderCol::UserId.eq(user.user_id)),
        )
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let paid = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .count(&txn)
        .await?;
    if paid > 0 {
        return Err(AppError::BadRequest("Order already paid".into()));
    }

    let from = parse_status(&order.status)?;
    if !from.can_transition(OrderStatus::Processing) {
        return Err(AppError::BadRequest("Order is not awaiting payment".into()));
    }

    PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        amount: Set(order.total_amount),
        method: Set(payload.method),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut active: OrderActive = order.into();
    active.status = Set(OrderStatus::Processing.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    txn.commit().await?;

    audit_order(state, user, "order_paid", order.id).await;

    Ok(ApiResponse::success(
        "Payment recorded",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Return the stock reserved by an order's items to the catalog. Runs inside
/// the caller's transaction; both cancellation paths go through here.
async fn restock_items<C: sea_orm::ConnectionTrait>(conn: &C, order_id: Uuid) -> AppResult<()> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .all(conn)
        .await?;

    for item in &items {
        Products::update_many()
            .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(item.quantity))
            .filter(ProdCol::Id.eq(item.product_id))
            .exec(conn)
            .await?;
    }

    Ok(())
}

async fn verify_address<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    address_id: Uuid,
    which: &str,
) -> AppResult<()> {
    let found = Addresses::find_by_id(address_id)
        .filter(AddressCol::UserId.eq(user_id))
        .one(conn)
        .await?;
    if found.is_none() {
        return Err(AppError::BadRequest(format!("{which} address not found")));
    }
    Ok(())
}

fn parse_status(raw: &str) -> AppResult<OrderStatus> {
    OrderStatus::parse(raw)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown order status: {raw}")))
}

async fn audit_order(state: &AppState, user: &AuthUser, action: &str, order_id: Uuid) {
    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        action,
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        shipping_address_id: model.shipping_address_id,
        billing_address_id: model.billing_address_id,
        total_amount: model.total_amount,
        status: parse_status(&model.status)?,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        price: model.price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
