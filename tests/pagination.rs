use axum_storefront_api::{response::Meta, routes::params::Pagination};

#[test]
fn normalize_defaults() {
    let pagination = Pagination {
        page: None,
        limit: None,
    };
    assert_eq!(pagination.normalize(), (1, 20, 0));
}

#[test]
fn normalize_clamps_out_of_range_values() {
    let pagination = Pagination {
        page: Some(0),
        limit: Some(1000),
    };
    assert_eq!(pagination.normalize(), (1, 100, 0));

    let pagination = Pagination {
        page: Some(-3),
        limit: Some(0),
    };
    assert_eq!(pagination.normalize(), (1, 1, 0));
}

#[test]
fn normalize_computes_offset() {
    let pagination = Pagination {
        page: Some(3),
        limit: Some(10),
    };
    assert_eq!(pagination.normalize(), (3, 10, 20));
}

#[test]
fn meta_total_pages_rounds_up() {
    let meta = Meta::new(2, 10, 25);
    assert_eq!(meta.page, Some(2));
    assert_eq!(meta.limit, Some(10));
    assert_eq!(meta.total, Some(25));
    assert_eq!(meta.total_pages, Some(3));

    assert_eq!(Meta::new(1, 10, 30).total_pages, Some(3));
    assert_eq!(Meta::new(1, 10, 0).total_pages, Some(0));
    assert_eq!(Meta::new(1, 10, 1).total_pages, Some(1));
}
