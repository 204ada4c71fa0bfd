use crate::domain::Order;

/// Subscriber roles the pull/push surfaces project orders for. Applies uniformly to pull reads and push
/// broadcasts, though the push payload itself carries nothing to redact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Kitchen,
    Courier,
    Admin,
    Default,
}

impl Role {
    pub fn parse(s: &str) -> Role {
        match s {
            "kitchen" => Role::Kitchen,
            "courier" => Role::Courier,
            "admin" => Role::Admin,
            _ => Role::Default,
        }
    }
}

/// Strips the fields a role must never see, in place.
pub fn project_for_role(order: &mut Order, role: Role) {
    match role {
        Role::Kitchen | Role::Default => order.strip_for_kitchen(),
        Role::Courier => order.strip_for_courier(),
        Role::Admin => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{Customer, LineItem, OrderStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample() -> Order {
        Order {
            id: Uuid::new_v4(),
            display_id: "0001".into(),
            items: vec![LineItem {
                sku: "margherita".into(),
                quantity: 1,
                unit_price: 1000,
                extras: vec!["extra_cheese".into()],
                pizza_price: 800,
                extras_price: 200,
            }],
            total_price: 1000,
            final_price: 1000,
            is_pickup: false,
            customer: Customer {
                phone: "15551234567".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                delivery_address: Some("221B Baker St".into()),
            },
            created_at: Utc::now(),
            visible_at: Utc::now(),
            slot_id: "20260301T0900".into(),
            slot_start: Utc::now(),
            status: OrderStatus::Pending,
        }
    }

    #[test]
    fn kitchen_role_never_sees_customer_contact_or_pricing() {
        let mut order = sample();
        project_for_role(&mut order, Role::Kitchen);
        assert!(order.customer.phone.is_empty());
        assert!(order.customer.delivery_address.is_none());
        assert_eq!(order.final_price, 0);
    }

    #[test]
    fn courier_role_never_sees_extras_or_final_price() {
        let mut order = sample();
        project_for_role(&mut order, Role::Courier);
        assert_eq!(order.final_price, 0);
        assert!(order.items[0].extras.is_empty());
        assert!(order.customer.delivery_address.is_some());
    }

    #[test]
    fn default_role_is_projected_the_same_as_kitchen() {
        let mut order = sample();
        project_for_role(&mut order, Role::Default);
        assert!(order.customer.phone.is_empty());
        assert!(order.customer.delivery_address.is_none());
        assert_eq!(order.final_price, 0);
    }

    #[test]
    fn admin_role_sees_everything() {
        let mut order = sample();
        let original_phone = order.customer.phone.clone();
        project_for_role(&mut order, Role::Admin);
        assert_eq!(order.customer.phone, original_phone);
    }
}
