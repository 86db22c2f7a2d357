use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::products::{CreateProductRequest, ProductList, SearchRequest, UpdateProductRequest},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        products::{
            ActiveModel as ProductActive, Column as ProdCol, Entity as Products,
            Model as ProductModel,
        },
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{Pagination, ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(q) = query.q.as_ref().filter(|q| !q.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(ProdCol::Name.contains(q.as_str()))
                .add(ProdCol::Description.contains(q.as_str())),
        );
    }
    if let Some(min) = query.min_price {
        condition = condition.add(ProdCol::Price.gte(min));
    }
    if let Some(max) = query.max_price {
        condition = condition.add(ProdCol::Price.lte(max));
    }

    let sort_by = query.sort_by.unwrap_or(ProductSortBy::CreatedAt);
    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Products::find().filter(condition);
    let column = match sort_by {
        ProductSortBy::CreatedAt => ProdCol::CreatedAt,
        ProductSortBy::Price => ProdCol::Price,
        ProductSortBy::Name => ProdCol::Name,
    };
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(column),
        SortOrder::Desc => finder.order_by_desc(column),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(meta),
    ))
}

/// Keyword search over name and description. Ranking beyond recency is a
/// collaborator's concern; this endpoint only filters.
pub async fn search_products(
    state: &AppState,
    payload: SearchRequest,
) -> AppResult<ApiResponse<ProductList>> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(AppError::BadRequest("Search query must not be empty".into()));
    }
    let limit = payload.limit.unwrap_or(20).clamp(1, 50);

    let items = Products::find()
        .filter(
            Condition::any()
                .add(ProdCol::Name.contains(query))
                .add(ProdCol::Description.contains(query)),
        )
        .order_by_desc(ProdCol::CreatedAt)
        .limit(limit as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Search results",
        ProductList { items },
        None,
    ))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success(
        "Product",
        product_from_entity(product),
        None,
    ))
}

pub async fn my_products(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = pagination.normalize();

    let finder = Products::find()
        .filter(ProdCol::OwnerId.eq(user.user_id))
        .order_by_desc(ProdCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(product_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "My products",
        ProductList { items },
        Some(meta),
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    validate_price_stock(payload.price, payload.stock)?;

    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(user.user_id),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_create",
        Some("products"),
        Some(serde_json::json!({ "product_id": product.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Product created",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if existing.owner_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let price = payload.price.unwrap_or(existing.price);
    let stock = payload.stock.unwrap_or(existing.stock);
    validate_price_stock(price, stock)?;

    let mut active: ProductActive = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    active.price = Set(price);
    active.stock = Set(stock);
    let product = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Updated",
        product_from_entity(product),
        Some(Meta::empty()),
    ))
}

/// Delete one of the caller's products. Products referenced by order items
/// stay put; order history keeps pointing at a real row.
pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;

    let existing = Products::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    if existing.owner_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let referenced = OrderItems::find()
        .filter(OrderItemCol::ProductId.eq(id))
        .count(&txn)
        .await?;
    if referenced > 0 {
        return Err(AppError::BadRequest(
            "Product is referenced by existing orders".into(),
        ));
    }

    Products::delete_by_id(id).exec(&txn).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "product_delete",
        Some("products"),
        Some(serde_json::json!({ "product_id": id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_price_stock(price: i64, stock: i32) -> AppResult<()> {
    if price <= 0 {
        return Err(AppError::BadRequest("Price must be greater than 0".into()));
    }
    if stock < 0 {
        return Err(AppError::BadRequest("Stock must not be negative".into()));
    }
    Ok(())
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        owner_id: model.owner_id,
        name: model.name,
        description: model.description,
        price: model.price,
        stock: model.stock,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
