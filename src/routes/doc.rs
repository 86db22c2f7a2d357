use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
        auth::{LoginRequest, LoginResponse, RegisterRequest, UpdateProfileRequest},
        cart::{AddItemRequest, CartItemView, CartView, UpdateQuantityRequest},
        orders::{
            AddOrderItemRequest, CreateOrderRequest, OrderList, OrderWithItems, PayOrderRequest,
            UpdateStatusRequest,
        },
        products::{CreateProductRequest, ProductList, SearchRequest, UpdateProductRequest},
    },
    models::{Address, CartItem, Order, OrderItem, OrderStatus, Payment, Product, UserProfile},
    response::{ApiResponse, Meta},
    routes::{addresses, auth, cart, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::get_profile,
        auth::update_profile,
        products::list_products,
        products::search_products,
        products::my_products,
        products::get_product,
        products::create_product,
        products::update_product,
        products::delete_product,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        orders::list_orders,
        orders::create_order,
        orders::get_order,
        orders::update_status,
        orders::add_order_item,
        orders::pay_order,
        orders::cancel_order,
        addresses::list_addresses,
        addresses::create_address,
        addresses::update_address,
        addresses::delete_address
    ),
    components(
        schemas(
            UserProfile,
            Product,
            Address,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Payment,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            UpdateProfileRequest,
            CreateProductRequest,
            UpdateProductRequest,
            SearchRequest,
            ProductList,
            AddItemRequest,
            UpdateQuantityRequest,
            CartItemView,
            CartView,
            CreateOrderRequest,
            AddOrderItemRequest,
            UpdateStatusRequest,
            PayOrderRequest,
            OrderList,
            OrderWithItems,
            CreateAddressRequest,
            UpdateAddressRequest,
            AddressList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<AddressList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Addresses", description = "Address endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
