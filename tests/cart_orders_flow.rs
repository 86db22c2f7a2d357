use axum_storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::{AddItemRequest, UpdateQuantityRequest},
        orders::{AddOrderItemRequest, CreateOrderRequest, PayOrderRequest, UpdateStatusRequest},
    },
    entity::{
        addresses::ActiveModel as AddressActive, payments::ActiveModel as PaymentActive,
        products::ActiveModel as ProductActive, products::Entity as Products,
        users::ActiveModel as UserActive,
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::OrderStatus,
    routes::params::{OrderListQuery, Pagination},
    services::{address_service, cart_service, order_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

// Integration tests run against a real database; they skip when neither
// TEST_DATABASE_URL nor DATABASE_URL is configured, like the rest of the
// suite's DB-backed tests.
async fn setup() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests."
                );
                return Ok(None);
            }
        };

    let pool = create_pool(&database_url).await?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    Ok(Some(AppState {
        pool,
        orm,
        jwt_secret: "integration-test-secret".into(),
    }))
}

async fn create_user(state: &AppState) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.com", Uuid::new_v4())),
        password_hash: Set("dummy".into()),
        role: Set("user".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: user.role,
    })
}

async fn create_address(state: &AppState, user_id: Uuid) -> anyhow::Result<Uuid> {
    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        recipient: Set("Test Recipient".into()),
        line1: Set("1 Test Street".into()),
        line2: Set(None),
        city: Set("Testville".into()),
        region: Set("TS".into()),
        postal_code: Set("12345".into()),
        country: Set("US".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(address.id)
}

async fn create_product(
    state: &AppState,
    owner_id: Uuid,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        name: Set(format!("Widget {}", Uuid::new_v4())),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        stock: Set(stock),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}

async fn create_pending_order(
    state: &AppState,
    user: &AuthUser,
) -> anyhow::Result<Uuid> {
    let shipping = create_address(state, user.user_id).await?;
    let billing = create_address(state, user.user_id).await?;
    let resp = order_service::create_order(
        state,
        user,
        CreateOrderRequest {
            shipping_address_id: shipping,
            billing_address_id: billing,
            total_amount: None,
        },
    )
    .await?;
    Ok(resp.data.unwrap().order.id)
}

async fn product_stock(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    Ok(product.stock)
}

fn assert_bad_request(err: AppError, needle: &str) {
    match err {
        AppError::BadRequest(msg) => {
            assert!(msg.contains(needle), "unexpected message: {msg}")
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn cart_add_overwrites_and_zero_removes() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 10).await?;

    cart_service::add_item(
        &state,
        &user,
        AddItemRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;

    // Same product again: the quantity is replaced, not summed.
    cart_service::add_item(
        &state,
        &user,
        AddItemRequest {
            product_id,
            quantity: 5,
        },
    )
    .await?;

    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);

    // Zero quantity on an existing line removes it.
    let resp = cart_service::add_item(
        &state,
        &user,
        AddItemRequest {
            product_id,
            quantity: 0,
        },
    )
    .await?;
    assert!(resp.data.unwrap().is_none());

    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn cart_add_rejects_quantity_above_stock() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 3).await?;

    let err = cart_service::add_item(
        &state,
        &user,
        AddItemRequest {
            product_id,
            quantity: 4,
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "available stock");

    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn cart_update_above_stock_leaves_quantity_unchanged() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 5).await?;

    let item = cart_service::add_item(
        &state,
        &user,
        AddItemRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?
    .data
    .unwrap()
    .unwrap();

    let err = cart_service::update_item_quantity(
        &state,
        &user,
        item.id,
        UpdateQuantityRequest { quantity: 6 },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "available stock");

    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items[0].quantity, 2);

    // Zero via the update path removes the line.
    let resp = cart_service::update_item_quantity(
        &state,
        &user,
        item.id,
        UpdateQuantityRequest { quantity: 0 },
    )
    .await?;
    assert!(resp.data.unwrap().is_none());

    // And removing a line that is gone is a 404, not a silent no-op.
    let err = cart_service::remove_item(&state, &user, item.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    Ok(())
}

#[tokio::test]
async fn clear_cart_without_cart_is_a_no_op() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let resp = cart_service::clear_cart(&state, &user).await?;
    assert_eq!(resp.message, "Cart already empty");

    Ok(())
}

#[tokio::test]
async fn order_items_sum_quantities_and_recompute_total() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 10).await?;
    let order_id = create_pending_order(&state, &user).await?;

    order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 2,
            price: 1000,
        },
    )
    .await?;

    // Same product again: quantities sum, the price snapshot is overwritten.
    let resp = order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 3,
            price: 1200,
        },
    )
    .await?;

    let data = resp.data.unwrap();
    assert_eq!(data.items.len(), 1);
    assert_eq!(data.items[0].quantity, 5);
    assert_eq!(data.items[0].price, 1200);
    assert_eq!(data.order.total_amount, 5 * 1200);

    // Stock was reserved inside the same transactions.
    assert_eq!(product_stock(&state, product_id).await?, 5);

    Ok(())
}

#[tokio::test]
async fn order_item_rejected_when_quantity_exceeds_stock() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 2).await?;
    let order_id = create_pending_order(&state, &user).await?;

    let err = order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 3,
            price: 1000,
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "available stock");

    let order = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .unwrap();
    assert!(order.items.is_empty());
    assert_eq!(product_stock(&state, product_id).await?, 2);

    Ok(())
}

#[tokio::test]
async fn add_item_rejected_once_order_is_processing() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 10).await?;
    let order_id = create_pending_order(&state, &user).await?;

    order_service::update_status(
        &state,
        &user,
        order_id,
        UpdateStatusRequest {
            status: OrderStatus::Processing,
        },
    )
    .await?;

    let err = order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 1,
            price: 1000,
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "already being processed");

    let order = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .unwrap();
    assert!(order.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn status_transitions_follow_the_table() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let order_id = create_pending_order(&state, &user).await?;

    // Skipping straight to DELIVERED is rejected and leaves the status alone.
    let err = order_service::update_status(
        &state,
        &user,
        order_id,
        UpdateStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "Invalid status transition from PENDING to DELIVERED");

    let order = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Pending);

    // The stepwise path succeeds.
    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        let resp =
            order_service::update_status(&state, &user, order_id, UpdateStatusRequest { status })
                .await?;
        assert_eq!(resp.data.unwrap().status, status);
    }

    Ok(())
}

#[tokio::test]
async fn cancel_rules_cover_status_payment_and_stock() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 10).await?;

    // PENDING with no payment: cancel succeeds and restores reserved stock.
    let order_id = create_pending_order(&state, &user).await?;
    order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 4,
            price: 1000,
        },
    )
    .await?;
    assert_eq!(product_stock(&state, product_id).await?, 6);

    let resp = order_service::cancel_order(&state, &user, order_id).await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Cancelled);
    assert_eq!(product_stock(&state, product_id).await?, 10);

    // SHIPPED orders cannot be cancelled.
    let shipped_id = create_pending_order(&state, &user).await?;
    for status in [OrderStatus::Processing, OrderStatus::Shipped] {
        order_service::update_status(&state, &user, shipped_id, UpdateStatusRequest { status })
            .await?;
    }
    let err = order_service::cancel_order(&state, &user, shipped_id)
        .await
        .unwrap_err();
    assert_bad_request(err, "Only pending orders can be cancelled");

    // A PENDING order with a payment row cannot be cancelled either.
    let paid_id = create_pending_order(&state, &user).await?;
    PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(paid_id),
        amount: Set(0),
        method: Set("card".into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    let err = order_service::cancel_order(&state, &user, paid_id)
        .await
        .unwrap_err();
    assert_bad_request(err, "existing payment");

    Ok(())
}

#[tokio::test]
async fn cancelling_through_the_status_endpoint_restores_stock() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 1000, 10).await?;
    let order_id = create_pending_order(&state, &user).await?;

    order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 4,
            price: 1000,
        },
    )
    .await?;
    assert_eq!(product_stock(&state, product_id).await?, 6);

    // PENDING -> CANCELLED straight through the status endpoint must return
    // the reserved quantities, same as the cancel endpoint.
    let resp = order_service::update_status(
        &state,
        &user,
        order_id,
        UpdateStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Cancelled);
    assert_eq!(product_stock(&state, product_id).await?, 10);

    Ok(())
}

#[tokio::test]
async fn status_endpoint_cancels_paid_processing_orders_and_restocks() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 500, 10).await?;
    let order_id = create_pending_order(&state, &user).await?;
    order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 3,
            price: 500,
        },
    )
    .await?;

    order_service::pay_order(
        &state,
        &user,
        order_id,
        PayOrderRequest {
            method: "card".into(),
        },
    )
    .await?;
    assert_eq!(product_stock(&state, product_id).await?, 7);

    // The transition table allows PROCESSING -> CANCELLED even with a
    // payment on file; only the dedicated cancel endpoint applies the
    // payment guard (refunds are handled out of band). Stock still comes
    // back.
    let resp = order_service::update_status(
        &state,
        &user,
        order_id,
        UpdateStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().status, OrderStatus::Cancelled);
    assert_eq!(product_stock(&state, product_id).await?, 10);

    Ok(())
}

#[tokio::test]
async fn concurrent_first_cart_access_is_idempotent() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;

    // Three first-touch fetches racing on the unique user_id index must all
    // succeed and agree on one cart row.
    let (a, b, c) = tokio::join!(
        cart_service::get_cart(&state, &user),
        cart_service::get_cart(&state, &user),
        cart_service::get_cart(&state, &user),
    );

    let a = a?.data.unwrap();
    let b = b?.data.unwrap();
    let c = c?.data.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(b.id, c.id);

    Ok(())
}

#[tokio::test]
async fn paying_moves_a_pending_order_to_processing() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let product_id = create_product(&state, user.user_id, 500, 10).await?;
    let order_id = create_pending_order(&state, &user).await?;
    order_service::add_order_item(
        &state,
        &user,
        order_id,
        AddOrderItemRequest {
            product_id,
            quantity: 2,
            price: 500,
        },
    )
    .await?;

    let resp = order_service::pay_order(
        &state,
        &user,
        order_id,
        PayOrderRequest {
            method: "card".into(),
        },
    )
    .await?;
    assert_eq!(resp.data.unwrap().order.status, OrderStatus::Processing);

    // Paying twice is rejected.
    let err = order_service::pay_order(
        &state,
        &user,
        order_id,
        PayOrderRequest {
            method: "card".into(),
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "already paid");

    Ok(())
}

#[tokio::test]
async fn order_rejects_addresses_of_other_users() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let stranger = create_user(&state).await?;
    let own_address = create_address(&state, user.user_id).await?;
    let foreign_address = create_address(&state, stranger.user_id).await?;

    let err = order_service::create_order(
        &state,
        &user,
        CreateOrderRequest {
            shipping_address_id: own_address,
            billing_address_id: foreign_address,
            total_amount: None,
        },
    )
    .await
    .unwrap_err();
    assert_bad_request(err, "Billing address not found");

    Ok(())
}

#[tokio::test]
async fn address_delete_blocked_while_order_references_it() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    let order_id = create_pending_order(&state, &user).await?;

    // Even after cancellation the reference keeps the address pinned.
    order_service::cancel_order(&state, &user, order_id).await?;

    let order = order_service::get_order(&state, &user, order_id)
        .await?
        .data
        .unwrap();
    let err = address_service::delete_address(&state, &user, order.order.shipping_address_id)
        .await
        .unwrap_err();
    assert_bad_request(err, "referenced by existing orders");

    // An unreferenced address deletes fine.
    let spare = create_address(&state, user.user_id).await?;
    address_service::delete_address(&state, &user, spare).await?;

    Ok(())
}

#[tokio::test]
async fn order_listing_paginates_newest_first() -> anyhow::Result<()> {
    let Some(state) = setup().await? else { return Ok(()) };

    let user = create_user(&state).await?;
    for _ in 0..25 {
        create_pending_order(&state, &user).await?;
    }

    let resp = order_service::list_orders(
        &state,
        &user,
        OrderListQuery {
            pagination: Pagination {
                page: Some(2),
                limit: Some(10),
            },
            status: None,
            sort_order: None,
        },
    )
    .await?;

    let meta = resp.meta.unwrap();
    assert_eq!(resp.data.unwrap().items.len(), 10);
    assert_eq!(meta.total, Some(25));
    assert_eq!(meta.total_pages, Some(3));

    Ok(())
}
