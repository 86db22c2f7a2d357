use axum_storefront_api::models::OrderStatus;

const ALL: [OrderStatus; 5] = [
    OrderStatus::Pending,
    OrderStatus::Processing,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
];

const LEGAL: [(OrderStatus, OrderStatus); 5] = [
    (OrderStatus::Pending, OrderStatus::Processing),
    (OrderStatus::Pending, OrderStatus::Cancelled),
    (OrderStatus::Processing, OrderStatus::Shipped),
    (OrderStatus::Processing, OrderStatus::Cancelled),
    (OrderStatus::Shipped, OrderStatus::Delivered),
];

#[test]
fn legal_transitions_are_allowed() {
    for (from, to) in LEGAL {
        assert!(from.can_transition(to), "{from} -> {to} should be allowed");
    }
}

#[test]
fn every_pair_outside_the_table_is_rejected() {
    for from in ALL {
        for to in ALL {
            let legal = LEGAL.contains(&(from, to));
            assert_eq!(
                from.can_transition(to),
                legal,
                "{from} -> {to} should be {}",
                if legal { "allowed" } else { "rejected" }
            );
        }
    }
}

#[test]
fn same_state_transitions_are_rejected() {
    for status in ALL {
        assert!(!status.can_transition(status));
    }
}

#[test]
fn pending_cannot_skip_to_delivered() {
    assert!(!OrderStatus::Pending.can_transition(OrderStatus::Delivered));
}

#[test]
fn terminal_states_have_no_outgoing_transitions() {
    for to in ALL {
        assert!(!OrderStatus::Delivered.can_transition(to));
        assert!(!OrderStatus::Cancelled.can_transition(to));
    }
}

#[test]
fn parse_round_trips_display() {
    for status in ALL {
        assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(OrderStatus::parse("pending"), None);
    assert_eq!(OrderStatus::parse("REFUNDED"), None);
}
